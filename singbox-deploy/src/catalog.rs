// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound catalog
//!
//! The closed set of inbound variants this tool can deploy. Every variant
//! has a matching template body in [`crate::templates::TemplateSet`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Proxy protocol spoken by an inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Vmess,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vless" => Ok(Protocol::Vless),
            "vmess" => Ok(Protocol::Vmess),
            other => Err(DeployError::UnsupportedProtocol {
                protocol: other.to_string(),
            }),
        }
    }
}

/// Transport layer between the reverse proxy and the inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Http,
    HttpUpgrade,
    Ws,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::HttpUpgrade => "httpupgrade",
            Transport::Ws => "ws",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub protocol: Protocol,
    pub transport: Transport,
    /// Tag format; `{domain}` is replaced by the deployment domain
    pub tag_format: &'static str,
}

impl Definition {
    pub fn tag(&self, domain: &str) -> String {
        self.tag_format.replace("{domain}", domain)
    }
}

/// A deployable inbound variant; ordering follows catalog order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InboundKind {
    VlessH2Tls,
    VlessHttpUpgradeTls,
    VlessWsTls,
    VmessH2Tls,
    VmessHttpUpgradeTls,
    VmessWsTls,
}

impl InboundKind {
    /// Every catalog entry, in catalog order
    pub const ALL: [InboundKind; 6] = [
        InboundKind::VlessH2Tls,
        InboundKind::VlessHttpUpgradeTls,
        InboundKind::VlessWsTls,
        InboundKind::VmessH2Tls,
        InboundKind::VmessHttpUpgradeTls,
        InboundKind::VmessWsTls,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            InboundKind::VlessH2Tls => "vless-h2-tls",
            InboundKind::VlessHttpUpgradeTls => "vless-httpupgrade-tls",
            InboundKind::VlessWsTls => "vless-ws-tls",
            InboundKind::VmessH2Tls => "vmess-h2-tls",
            InboundKind::VmessHttpUpgradeTls => "vmess-httpupgrade-tls",
            InboundKind::VmessWsTls => "vmess-ws-tls",
        }
    }

    pub fn definition(&self) -> Definition {
        let (protocol, transport, tag_format) = match self {
            InboundKind::VlessH2Tls => (Protocol::Vless, Transport::Http, "VLESS-H2-TLS-{domain}.json"),
            InboundKind::VlessHttpUpgradeTls => (
                Protocol::Vless,
                Transport::HttpUpgrade,
                "VLESS-HTTPUpgrade-TLS-{domain}.json",
            ),
            InboundKind::VlessWsTls => (Protocol::Vless, Transport::Ws, "VLESS-WS-TLS-{domain}.json"),
            InboundKind::VmessH2Tls => (Protocol::Vmess, Transport::Http, "VMess-H2-TLS-{domain}.json"),
            InboundKind::VmessHttpUpgradeTls => (
                Protocol::Vmess,
                Transport::HttpUpgrade,
                "VMess-HTTPUpgrade-TLS-{domain}.json",
            ),
            InboundKind::VmessWsTls => (Protocol::Vmess, Transport::Ws, "VMess-WS-TLS-{domain}.json"),
        };
        Definition {
            protocol,
            transport,
            tag_format,
        }
    }

    /// Look up a kind by its exact catalog key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// All supported inbound keys, in catalog order
pub fn supported_keys() -> Vec<&'static str> {
    InboundKind::ALL.iter().map(InboundKind::key).collect()
}

/// Whether `key` names a catalog entry
pub fn exists(key: &str) -> bool {
    InboundKind::from_key(key).is_some()
}

/// Normalize a requested key list
///
/// Keys are trimmed and lower-cased, blanks are skipped and duplicates
/// collapse onto their first occurrence. An empty request selects the
/// whole catalog.
pub fn normalize_keys<S: AsRef<str>>(requested: &[S]) -> Result<Vec<InboundKind>> {
    if requested.is_empty() {
        return Ok(InboundKind::ALL.to_vec());
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::new();

    for raw in requested {
        let key = raw.as_ref().trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        let kind = InboundKind::from_key(&key).ok_or_else(|| DeployError::InvalidInbound {
            key: raw.as_ref().to_string(),
        })?;
        if seen.insert(kind) {
            normalized.push(kind);
        }
    }

    Ok(normalized)
}
