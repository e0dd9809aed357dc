// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription share links
//!
//! Clients always reach the inbound through the TLS front end on port 443.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use url::form_urlencoded;

use crate::catalog::Protocol;
use crate::error::Result;
use crate::spec::InboundSpec;

const PUBLIC_PORT: &str = "443";
const QR_ENDPOINT: &str = "https://api.qrserver.com/v1/create-qr-code/?size=220x220&data=";

/// VMess share payload; field order is the order clients expect
#[derive(Debug, Serialize)]
struct VmessPayload<'a> {
    v: &'a str,
    ps: &'a str,
    add: &'a str,
    port: &'a str,
    id: &'a str,
    aid: &'a str,
    net: String,
    #[serde(rename = "type")]
    kind: &'a str,
    host: &'a str,
    path: &'a str,
    tls: &'a str,
}

/// Build the share URI for an inbound
pub fn build_link(spec: &InboundSpec, domain: &str) -> Result<String> {
    match spec.protocol.parse::<Protocol>()? {
        Protocol::Vmess => build_vmess(spec, domain),
        Protocol::Vless => Ok(build_vless(spec, domain)),
    }
}

fn build_vmess(spec: &InboundSpec, domain: &str) -> Result<String> {
    let payload = VmessPayload {
        v: "2",
        ps: &spec.tag,
        add: domain,
        port: PUBLIC_PORT,
        id: &spec.uuid,
        aid: "0",
        net: transport_alias(&spec.transport),
        kind: "none",
        host: domain,
        path: &spec.path,
        tls: "tls",
    };
    let raw = serde_json::to_vec(&payload)?;
    Ok(format!("vmess://{}", STANDARD.encode(raw)))
}

fn build_vless(spec: &InboundSpec, domain: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("encryption", "none")
        .append_pair("security", "tls")
        .append_pair("type", &transport_alias(&spec.transport))
        .append_pair("host", domain)
        .append_pair("path", &spec.path)
        .finish();
    format!(
        "vless://{}@{}:{}?{}#{}",
        spec.uuid, domain, PUBLIC_PORT, query, spec.tag
    )
}

/// Client-facing name of a transport
pub fn transport_alias(transport: &str) -> String {
    match transport.to_lowercase().as_str() {
        "http" => "h2".to_string(),
        "ws" => "ws".to_string(),
        _ => transport.to_string(),
    }
}

/// URL of a QR code image encoding `link`
pub fn qr_code_url(link: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(link.as_bytes()).collect();
    format!("{QR_ENDPOINT}{encoded}")
}
