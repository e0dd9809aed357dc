// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound spec generation
//!
//! Credentials and listen ports come from the operating system's secure
//! random source. A failing source is an error, never a fallback.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Builder;

use crate::catalog::InboundKind;
use crate::error::{DeployError, Result};

/// Lowest listen port handed out (inclusive)
pub const PORT_RANGE_START: u16 = 32768;
/// Upper bound of the listen port range (exclusive)
pub const PORT_RANGE_END: u16 = u16::MAX;

/// Inbounds always bind to loopback; the reverse proxy fronts them
pub const LISTEN_ADDRESS: &str = "127.0.0.1";

/// A fully populated inbound instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundSpec {
    pub key: String,
    pub tag: String,
    pub file_name: String,
    pub protocol: String,
    pub transport: String,
    pub listen: String,
    pub listen_port: u16,
    pub uuid: String,
    pub path: String,
    pub host: String,
}

impl InboundSpec {
    /// Generate a spec for a catalog entry with fresh credentials
    pub fn generate(kind: InboundKind, domain: &str) -> Result<Self> {
        let definition = kind.definition();
        let uuid = random_uuid()?;
        let listen_port = random_high_port()?;
        let tag = definition.tag(domain);

        Ok(Self {
            key: kind.key().to_string(),
            file_name: tag.clone(),
            tag,
            protocol: definition.protocol.as_str().to_string(),
            transport: definition.transport.as_str().to_string(),
            listen: LISTEN_ADDRESS.to_string(),
            listen_port,
            path: format!("/{uuid}"),
            uuid,
            host: domain.to_string(),
        })
    }
}

/// Build a spec for `key`, failing when the catalog does not know it
pub fn build_spec(key: &str, domain: &str) -> Result<InboundSpec> {
    let kind = InboundKind::from_key(key).ok_or_else(|| DeployError::UnsupportedInbound {
        key: key.to_string(),
    })?;
    InboundSpec::generate(kind, domain)
}

/// Version 4 UUID from 16 bytes of OS randomness
pub fn random_uuid() -> Result<String> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string())
}

/// Uniform port in `[PORT_RANGE_START, PORT_RANGE_END)`
pub fn random_high_port() -> Result<u16> {
    let span = u32::from(PORT_RANGE_END - PORT_RANGE_START);
    // Largest multiple of span below 2^16; draws above it are rejected so
    // the modulo stays unbiased.
    let zone = (1u32 << 16) / span * span;
    loop {
        let mut bytes = [0u8; 2];
        OsRng.try_fill_bytes(&mut bytes)?;
        let draw = u32::from(u16::from_be_bytes(bytes));
        if draw < zone {
            let offset = (draw % span) as u16;
            return Ok(PORT_RANGE_START + offset);
        }
    }
}
