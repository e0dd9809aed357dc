// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template rendering for sing-box inbounds and the Caddy site
//!
//! Templates are plain text with `{{ name }}` placeholders. A [`TemplateSet`]
//! is parsed once, checked against the catalog, and then only read.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::catalog::InboundKind;
use crate::error::{DeployError, Result};
use crate::spec::InboundSpec;

const EMBEDDED_INBOUNDS: &[(&str, &str)] = &[
    (
        "vless-h2-tls",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/sing-box/inbounds/vless-h2-tls.json.tmpl")),
    ),
    (
        "vless-httpupgrade-tls",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/templates/sing-box/inbounds/vless-httpupgrade-tls.json.tmpl"
        )),
    ),
    (
        "vless-ws-tls",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/sing-box/inbounds/vless-ws-tls.json.tmpl")),
    ),
    (
        "vmess-h2-tls",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/sing-box/inbounds/vmess-h2-tls.json.tmpl")),
    ),
    (
        "vmess-httpupgrade-tls",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/templates/sing-box/inbounds/vmess-httpupgrade-tls.json.tmpl"
        )),
    ),
    (
        "vmess-ws-tls",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/sing-box/inbounds/vmess-ws-tls.json.tmpl")),
    ),
];

const EMBEDDED_CADDY_SITE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/caddy/site.caddy.tmpl"));

const EMBEDDED_CADDY_ROUTE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/caddy/route.caddy.tmpl"));

/// Everything templates may refer to for one deployment
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub domain: String,
    pub email: String,
    pub inbounds: BTreeMap<InboundKind, InboundSpec>,
    pub tls_key_path: PathBuf,
    pub tls_cert_path: PathBuf,
}

impl RenderContext {
    fn base_vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("domain", self.domain.clone()),
            ("email", self.email.clone()),
            ("tls_key_path", self.tls_key_path.display().to_string()),
            ("tls_cert_path", self.tls_cert_path.display().to_string()),
        ])
    }

    /// Inbound templates are JSON, so every value is escaped for a string literal
    fn inbound_vars(&self, spec: &InboundSpec) -> Result<HashMap<&'static str, String>> {
        let mut vars = self.base_vars();
        vars.insert("tag", spec.tag.clone());
        vars.insert("listen", spec.listen.clone());
        vars.insert("listen_port", spec.listen_port.to_string());
        vars.insert("uuid", spec.uuid.clone());
        vars.insert("path", spec.path.clone());
        vars.insert("host", spec.host.clone());

        vars.into_iter()
            .map(|(name, value)| json_escape(&value).map(|escaped| (name, escaped)))
            .collect()
    }
}

/// Body of the JSON string literal for `value`, without the quotes
fn json_escape(value: &str) -> Result<String> {
    let quoted = serde_json::to_string(value)?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A parsed template body
#[derive(Debug, Clone)]
struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| DeployError::TemplateRender {
                template: name.clone(),
                message: "unterminated '{{'".to_string(),
            })?;
            let var = after[..close].trim();
            if var.is_empty() {
                return Err(DeployError::TemplateRender {
                    template: name,
                    message: "empty placeholder".to_string(),
                });
            }
            segments.push(Segment::Var(var.to_string()));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { name, segments })
    }

    fn render(&self, vars: &HashMap<&'static str, String>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(var) => {
                    let value = vars.get(var.as_str()).ok_or_else(|| DeployError::TemplateRender {
                        template: self.name.clone(),
                        message: format!("unknown placeholder '{var}'"),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Immutable collection of parsed templates
#[derive(Debug, Clone)]
pub struct TemplateSet {
    inbounds: HashMap<InboundKind, Template>,
    caddy_site: Template,
    caddy_route: Template,
}

impl TemplateSet {
    /// The templates compiled into this binary
    pub fn embedded() -> Result<Self> {
        Self::from_sources(EMBEDDED_INBOUNDS.iter().copied(), EMBEDDED_CADDY_SITE, EMBEDDED_CADDY_ROUTE)
    }

    /// Parse a template set from raw bodies keyed by catalog key
    pub fn from_sources<'a>(
        inbounds: impl IntoIterator<Item = (&'a str, &'a str)>,
        caddy_site: &str,
        caddy_route: &str,
    ) -> Result<Self> {
        let mut parsed = HashMap::new();
        for (key, body) in inbounds {
            let kind = InboundKind::from_key(key).ok_or_else(|| DeployError::TemplateRender {
                template: key.to_string(),
                message: "no catalog entry for this template".to_string(),
            })?;
            parsed.insert(kind, Template::parse(key, body)?);
        }

        Ok(Self {
            inbounds: parsed,
            caddy_site: Template::parse("caddy/site", caddy_site)?,
            caddy_route: Template::parse("caddy/route", caddy_route)?,
        })
    }

    /// Fail when any catalog entry lacks an inbound template
    pub fn validate(&self) -> Result<()> {
        for kind in InboundKind::ALL {
            if !self.inbounds.contains_key(&kind) {
                return Err(DeployError::MissingTemplate {
                    key: kind.key().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render one inbound object per spec in the context
    pub fn render_inbounds(&self, ctx: &RenderContext) -> Result<BTreeMap<InboundKind, String>> {
        let mut outputs = BTreeMap::new();
        for (kind, spec) in &ctx.inbounds {
            let template = self.inbounds.get(kind).ok_or_else(|| DeployError::MissingTemplate {
                key: kind.key().to_string(),
            })?;
            let rendered = template.render(&ctx.inbound_vars(spec)?)?;
            outputs.insert(*kind, rendered.trim().to_string());
        }
        Ok(outputs)
    }

    /// Render the Caddy site with one route per inbound
    pub fn render_caddy(&self, ctx: &RenderContext) -> Result<String> {
        let mut routes = String::new();
        for (kind, spec) in &ctx.inbounds {
            let mut vars = ctx.base_vars();
            vars.insert("key", kind.key().to_string());
            vars.insert("tag", spec.tag.clone());
            vars.insert("path", spec.path.clone());
            vars.insert("upstream", upstream(spec));
            routes.push_str(&self.caddy_route.render(&vars)?);
        }

        let mut vars = ctx.base_vars();
        vars.insert("routes", routes.trim_end_matches('\n').to_string());
        self.caddy_site.render(&vars)
    }
}

/// HTTP/2 inbounds take cleartext h2 from the proxy
fn upstream(spec: &InboundSpec) -> String {
    if spec.transport.eq_ignore_ascii_case("http") {
        format!("h2c://{}:{}", spec.listen, spec.listen_port)
    } else {
        format!("{}:{}", spec.listen, spec.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(kinds: &[InboundKind]) -> RenderContext {
        let inbounds = kinds
            .iter()
            .map(|kind| (*kind, InboundSpec::generate(*kind, "example.com").unwrap()))
            .collect();
        RenderContext {
            domain: "example.com".to_string(),
            email: "info@example.com".to_string(),
            inbounds,
            tls_key_path: PathBuf::from("/etc/sing-box/tls.key"),
            tls_cert_path: PathBuf::from("/etc/sing-box/tls.cer"),
        }
    }

    #[test]
    fn test_embedded_set_covers_catalog() {
        let set = TemplateSet::embedded().unwrap();
        set.validate().unwrap();
    }

    #[test]
    fn test_missing_template_fails_validation() {
        let set = TemplateSet::from_sources([("vless-ws-tls", "{}")], "", "").unwrap();
        let err = set.validate().unwrap_err();
        assert!(matches!(err, DeployError::MissingTemplate { .. }));

        let ctx = context(&[InboundKind::VmessWsTls]);
        let err = set.render_inbounds(&ctx).unwrap_err();
        assert!(matches!(err, DeployError::MissingTemplate { key } if key == "vmess-ws-tls"));
    }

    #[test]
    fn test_template_for_unknown_key_is_rejected() {
        let err = TemplateSet::from_sources([("trojan-tls", "{}")], "", "").unwrap_err();
        assert!(matches!(err, DeployError::TemplateRender { .. }));
    }

    #[test]
    fn test_render_inbounds_produces_json() {
        let set = TemplateSet::embedded().unwrap();
        let ctx = context(&InboundKind::ALL);
        let rendered = set.render_inbounds(&ctx).unwrap();
        assert_eq!(rendered.len(), InboundKind::ALL.len());

        for (kind, body) in &rendered {
            let spec = &ctx.inbounds[kind];
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(value["type"], spec.protocol);
            assert_eq!(value["tag"], spec.tag);
            assert_eq!(value["listen"], "127.0.0.1");
            assert_eq!(value["listen_port"], spec.listen_port);
            assert_eq!(value["users"][0]["uuid"], spec.uuid);
            assert_eq!(value["transport"]["type"], spec.transport);
            assert_eq!(value["transport"]["path"], spec.path);
            assert_eq!(body.trim(), body);
        }
    }

    #[test]
    fn test_render_inbounds_escapes_values() {
        let set = TemplateSet::embedded().unwrap();
        let mut ctx = context(&[InboundKind::VlessWsTls, InboundKind::VmessH2Tls]);
        ctx.email = "Ops \"Team\" <ops@example.com>\\\n".to_string();

        let rendered = set.render_inbounds(&ctx).unwrap();
        for body in rendered.values() {
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(value["users"][0]["name"], ctx.email.as_str());
        }
    }

    #[test]
    fn test_json_escape() {
        assert_eq!(json_escape("plain").unwrap(), "plain");
        assert_eq!(json_escape("a\"b\\c\n").unwrap(), "a\\\"b\\\\c\\n");
    }

    #[test]
    fn test_render_caddy_routes_every_inbound() {
        let set = TemplateSet::embedded().unwrap();
        let ctx = context(&[InboundKind::VlessH2Tls, InboundKind::VmessWsTls]);
        let caddy = set.render_caddy(&ctx).unwrap();

        assert!(caddy.contains("email info@example.com"));
        assert!(caddy.contains("example.com {"));
        assert!(caddy.contains("tls /etc/sing-box/tls.cer /etc/sing-box/tls.key"));

        let h2 = &ctx.inbounds[&InboundKind::VlessH2Tls];
        let ws = &ctx.inbounds[&InboundKind::VmessWsTls];
        assert!(caddy.contains(&format!("handle {}*", h2.path)));
        assert!(caddy.contains(&format!("reverse_proxy h2c://127.0.0.1:{}", h2.listen_port)));
        assert!(caddy.contains(&format!("reverse_proxy 127.0.0.1:{}", ws.listen_port)));
        assert!(!caddy.contains("{{"));
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        let set = TemplateSet::from_sources(
            InboundKind::ALL.iter().map(|kind| (kind.key(), "{{ nope }}")),
            "",
            "",
        )
        .unwrap();
        let err = set.render_inbounds(&context(&[InboundKind::VlessWsTls])).unwrap_err();
        assert!(matches!(err, DeployError::TemplateRender { message, .. } if message.contains("nope")));
    }

    #[test]
    fn test_unterminated_placeholder_fails_parse() {
        assert!(Template::parse("broken", "hello {{ name").is_err());
        assert!(Template::parse("empty", "hello {{ }}").is_err());
    }

    #[test]
    fn test_plain_substitution() {
        let template = Template::parse("t", "a={{a}}, b={{ b }}.").unwrap();
        let vars = HashMap::from([("a", "1".to_string()), ("b", "two".to_string())]);
        assert_eq!(template.render(&vars).unwrap(), "a=1, b=two.");
    }
}
