// SPDX-License-Identifier: AGPL-3.0-or-later
//! singbox-deploy: sing-box inbound deployment behind a Caddy TLS front
//!
//! A deployment picks inbounds from a fixed catalog, renders their sing-box
//! configs and the Caddy site that reverse-proxies them, provisions a TLS key
//! pair, and records share links in a subscription file and a JSON state file.
//!
//! # Features
//!
//! * **Catalog:** VLESS and VMess over WebSocket, HTTP/2 and HTTPUpgrade, all TLS-terminated by Caddy
//! * **Templates:** embedded, validated once against the catalog
//! * **Share links:** `vless://` and `vmess://` URLs plus QR-code links
//! * **State:** JSON record consumed by the `list` and `url` commands

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod deploy;
pub mod error;
pub mod selection;
pub mod share;
pub mod spec;
pub mod state;
pub mod templates;
pub mod tls;

pub use config::Config;
pub use deploy::{Deployer, DeploymentOptions};
pub use error::{DeployError, Result};
pub use state::State;
pub use templates::TemplateSet;
