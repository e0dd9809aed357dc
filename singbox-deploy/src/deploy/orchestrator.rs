// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment pipeline
//!
//! Stages run in a fixed order and the first failure aborts the run. Files
//! written by earlier stages are left in place.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::{DeploymentOptions, ResolvedOptions};
use crate::artifacts::{
    common_config, ensure_dir, to_json_bytes, wrap_inbound, write_file, COMMON_CONFIG_NAME, CONFIG_MODE, DIR_MODE,
    INBOUND_FILE_PREFIX, SHARED_DIR_MODE,
};
use crate::catalog::{normalize_keys, InboundKind};
use crate::error::{Result, Stage, StageContext};
use crate::share::build_link;
use crate::spec::InboundSpec;
use crate::state::{Inbound, State};
use crate::templates::{RenderContext, TemplateSet};
use crate::tls::{KeyPairGenerator, KeyPairRequest, SingBoxKeyPairGenerator, TlsProvisioner};

/// Runs deployments against a fixed template set
pub struct Deployer {
    templates: TemplateSet,
    generator: Option<Arc<dyn KeyPairGenerator>>,
}

impl Deployer {
    /// Create a deployer; fails if the templates do not cover the catalog
    pub fn new(templates: TemplateSet) -> Result<Self> {
        templates.validate()?;
        Ok(Self {
            templates,
            generator: None,
        })
    }

    /// Use `generator` instead of invoking the configured sing-box binary
    pub fn with_generator(mut self, generator: Arc<dyn KeyPairGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Render, write and record a full deployment
    pub async fn run(&self, options: &DeploymentOptions) -> Result<State> {
        let start_time = Instant::now();
        let opts = options.resolve().in_stage(Stage::Validate)?;

        let kinds = normalize_keys(&opts.inbound_keys).in_stage(Stage::Normalize)?;
        info!(
            domain = %opts.domain,
            inbounds = kinds.len(),
            root = %opts.root_dir.display(),
            "Starting deployment"
        );

        let mut specs = BTreeMap::new();
        for kind in &kinds {
            let spec = InboundSpec::generate(*kind, &opts.domain).in_stage(Stage::BuildSpecs)?;
            debug!(key = %kind, tag = %spec.tag, port = spec.listen_port, "Built inbound spec");
            specs.insert(*kind, spec);
        }

        let ctx = RenderContext {
            domain: opts.domain.clone(),
            email: opts.email.clone(),
            inbounds: specs,
            tls_key_path: opts.tls_key_path.clone(),
            tls_cert_path: opts.tls_cert_path.clone(),
        };
        let rendered = self.templates.render_inbounds(&ctx).in_stage(Stage::Render)?;
        let caddy = self.templates.render_caddy(&ctx).in_stage(Stage::Render)?;

        write_inbound_files(&opts.root_dir, &ctx.inbounds, &rendered).in_stage(Stage::WriteInbounds)?;
        write_common_config(&opts.root_dir).in_stage(Stage::WriteCommon)?;

        let status = self
            .provisioner(&opts)
            .ensure_key_pair(&KeyPairRequest {
                domain: &opts.domain,
                key_path: &opts.tls_key_path,
                cert_path: &opts.tls_cert_path,
                key_bits: opts.key_bits,
            })
            .await
            .in_stage(Stage::TlsKeyPair)?;
        debug!(?status, "TLS key pair ready");

        write_caddy_file(&opts.caddy_file, &caddy).in_stage(Stage::WriteCaddy)?;

        let mut inbounds = Vec::with_capacity(kinds.len());
        let mut body = format!("# Subscriptions for {}\n\n", opts.domain);
        for kind in &kinds {
            let spec = &ctx.inbounds[kind];
            let link = build_link(spec, &opts.domain).in_stage(Stage::ShareLinks)?;
            body.push_str(&format!("[{}]\n{}\n\n", spec.tag, link));
            inbounds.push(Inbound {
                key: spec.key.clone(),
                tag: spec.tag.clone(),
                protocol: spec.protocol.clone(),
                transport: spec.transport.clone(),
                listen_port: spec.listen_port,
                uuid: spec.uuid.clone(),
                path: spec.path.clone(),
                host: spec.host.clone(),
                share_url: link,
            });
        }

        let subscription_file = opts.subscription_file();
        write_subscription(&opts.subscription_dir, &subscription_file, &body).in_stage(Stage::WriteSubscription)?;

        let mut state = State {
            domain: opts.domain.clone(),
            email: opts.email.clone(),
            root_dir: opts.root_dir.clone(),
            caddy_file: opts.caddy_file.clone(),
            subscription_file,
            inbounds,
            last_updated: chrono::Utc::now(),
        };
        state.save(&opts.state_file).in_stage(Stage::SaveState)?;

        info!(
            domain = %state.domain,
            inbounds = state.inbounds.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Deployment completed"
        );
        Ok(state)
    }

    fn provisioner(&self, opts: &ResolvedOptions) -> TlsProvisioner {
        let generator = match &self.generator {
            Some(generator) => Arc::clone(generator),
            None => Arc::new(SingBoxKeyPairGenerator::new(
                opts.sing_box_bin.clone(),
                opts.generate_timeout,
            )),
        };
        TlsProvisioner::new(generator)
    }
}

fn write_inbound_files(
    root: &Path,
    specs: &BTreeMap<InboundKind, InboundSpec>,
    rendered: &BTreeMap<InboundKind, String>,
) -> Result<()> {
    ensure_dir(root, DIR_MODE)?;
    for (kind, content) in rendered {
        let spec = &specs[kind];
        let file = root.join(format!("{INBOUND_FILE_PREFIX}{}", spec.file_name));
        write_file(&file, &wrap_inbound(content)?, CONFIG_MODE)?;
        info!(key = %kind, path = %file.display(), "Wrote inbound config");
    }
    Ok(())
}

fn write_common_config(root: &Path) -> Result<()> {
    ensure_dir(root, DIR_MODE)?;
    let path = root.join(COMMON_CONFIG_NAME);
    write_file(&path, &to_json_bytes(&common_config())?, CONFIG_MODE)?;
    info!(path = %path.display(), "Wrote common config");
    Ok(())
}

fn write_caddy_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent, SHARED_DIR_MODE)?;
    }
    let mut bytes = content.as_bytes().to_vec();
    bytes.push(b'\n');
    write_file(path, &bytes, CONFIG_MODE)?;
    info!(path = %path.display(), "Wrote Caddy config");
    Ok(())
}

fn write_subscription(dir: &Path, file: &Path, body: &str) -> Result<()> {
    ensure_dir(dir, DIR_MODE)?;
    write_file(file, body.as_bytes(), CONFIG_MODE)?;
    info!(path = %file.display(), "Wrote subscription file");
    Ok(())
}
