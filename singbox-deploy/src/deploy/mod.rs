// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment options and orchestration
//!
//! [`DeploymentOptions`] carries what the caller asked for; [`resolve`]
//! fills in defaults and validates it before [`Deployer::run`] touches disk.
//!
//! [`resolve`]: DeploymentOptions::resolve

mod orchestrator;

pub use orchestrator::Deployer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DeployError, Result};

/// Default sing-box configuration root
pub const DEFAULT_ROOT_DIR: &str = "/etc/sing-box";
/// Default Caddyfile location
pub const DEFAULT_CADDY_FILE: &str = "/etc/caddy/Caddyfile";
/// Default sing-box binary, resolved through `PATH`
pub const DEFAULT_SING_BOX_BIN: &str = "sing-box";
/// Default RSA key size passed to the generator
pub const DEFAULT_KEY_BITS: u32 = 1024;
/// Default bound on the key generator's run time
pub const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for one deployment run
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    pub domain: String,
    /// Contact email; `info@<domain>` when unset
    pub email: Option<String>,
    /// Requested catalog keys; empty selects every inbound
    pub inbound_keys: Vec<String>,
    pub root_dir: Option<PathBuf>,
    pub caddy_file: Option<PathBuf>,
    /// `<root>/subscriptions` when unset
    pub subscription_dir: Option<PathBuf>,
    pub state_file: PathBuf,
    pub sing_box_bin: Option<PathBuf>,
    /// `<root>/tls.key` when unset
    pub tls_key_path: Option<PathBuf>,
    /// `<root>/tls.cer` when unset
    pub tls_cert_path: Option<PathBuf>,
    pub key_bits: u32,
    pub generate_timeout: Duration,
}

impl DeploymentOptions {
    pub fn new(domain: impl Into<String>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            domain: domain.into(),
            email: None,
            inbound_keys: Vec::new(),
            root_dir: None,
            caddy_file: None,
            subscription_dir: None,
            state_file: state_file.into(),
            sing_box_bin: None,
            tls_key_path: None,
            tls_cert_path: None,
            key_bits: DEFAULT_KEY_BITS,
            generate_timeout: DEFAULT_GENERATE_TIMEOUT,
        }
    }

    /// Validate and apply defaults
    pub fn resolve(&self) -> Result<ResolvedOptions> {
        let domain = self.domain.trim().to_lowercase();
        if domain.is_empty() {
            return Err(invalid("domain is required"));
        }
        if !is_host_name(&domain) {
            return Err(invalid(format!("domain {domain:?} is not a host name")));
        }
        if is_blank(&self.state_file) {
            return Err(invalid("state file path is required"));
        }
        if self.key_bits == 0 {
            return Err(invalid("key bits must be greater than zero"));
        }
        if self.generate_timeout.is_zero() {
            return Err(invalid("generate timeout must be greater than zero"));
        }

        let email = match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => format!("info@{domain}"),
        };
        // rendered as a single Caddyfile token
        if email.contains(|c: char| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\\' | '{' | '}')) {
            return Err(invalid(format!("email {email:?} is not a plain address")));
        }
        let root_dir = non_blank(&self.root_dir).unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR));
        let caddy_file = non_blank(&self.caddy_file).unwrap_or_else(|| PathBuf::from(DEFAULT_CADDY_FILE));
        let subscription_dir =
            non_blank(&self.subscription_dir).unwrap_or_else(|| root_dir.join("subscriptions"));
        let sing_box_bin =
            non_blank(&self.sing_box_bin).unwrap_or_else(|| PathBuf::from(DEFAULT_SING_BOX_BIN));
        let tls_key_path = non_blank(&self.tls_key_path).unwrap_or_else(|| root_dir.join("tls.key"));
        let tls_cert_path = non_blank(&self.tls_cert_path).unwrap_or_else(|| root_dir.join("tls.cer"));

        Ok(ResolvedOptions {
            domain,
            email,
            inbound_keys: self.inbound_keys.clone(),
            root_dir,
            caddy_file,
            subscription_dir,
            state_file: self.state_file.clone(),
            sing_box_bin,
            tls_key_path,
            tls_cert_path,
            key_bits: self.key_bits,
            generate_timeout: self.generate_timeout,
        })
    }
}

/// Options with every default applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub domain: String,
    pub email: String,
    pub inbound_keys: Vec<String>,
    pub root_dir: PathBuf,
    pub caddy_file: PathBuf,
    pub subscription_dir: PathBuf,
    pub state_file: PathBuf,
    pub sing_box_bin: PathBuf,
    pub tls_key_path: PathBuf,
    pub tls_cert_path: PathBuf,
    pub key_bits: u32,
    pub generate_timeout: Duration,
}

impl ResolvedOptions {
    /// Subscription listing for this domain
    pub fn subscription_file(&self) -> PathBuf {
        self.subscription_dir.join(format!("{}.txt", self.domain))
    }
}

fn invalid(message: impl Into<String>) -> DeployError {
    DeployError::Validation {
        message: message.into(),
    }
}

/// Dot-separated labels of ASCII letters, digits and inner hyphens
fn is_host_name(domain: &str) -> bool {
    domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn non_blank(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref().filter(|p| !is_blank(p)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let resolved = DeploymentOptions::new("  Example.COM ", "/tmp/state.json")
            .resolve()
            .unwrap();

        assert_eq!(resolved.domain, "example.com");
        assert_eq!(resolved.email, "info@example.com");
        assert_eq!(resolved.root_dir, PathBuf::from("/etc/sing-box"));
        assert_eq!(resolved.caddy_file, PathBuf::from("/etc/caddy/Caddyfile"));
        assert_eq!(resolved.subscription_dir, PathBuf::from("/etc/sing-box/subscriptions"));
        assert_eq!(resolved.sing_box_bin, PathBuf::from("sing-box"));
        assert_eq!(resolved.tls_key_path, PathBuf::from("/etc/sing-box/tls.key"));
        assert_eq!(resolved.tls_cert_path, PathBuf::from("/etc/sing-box/tls.cer"));
        assert_eq!(
            resolved.subscription_file(),
            PathBuf::from("/etc/sing-box/subscriptions/example.com.txt")
        );
    }

    #[test]
    fn test_resolve_keeps_explicit_values() {
        let mut options = DeploymentOptions::new("example.com", "/tmp/state.json");
        options.email = Some("ops@example.com".to_string());
        options.root_dir = Some(PathBuf::from("/srv/box"));
        options.tls_cert_path = Some(PathBuf::from("/srv/certs/site.pem"));
        options.subscription_dir = Some(PathBuf::new());

        let resolved = options.resolve().unwrap();
        assert_eq!(resolved.email, "ops@example.com");
        assert_eq!(resolved.tls_key_path, PathBuf::from("/srv/box/tls.key"));
        assert_eq!(resolved.tls_cert_path, PathBuf::from("/srv/certs/site.pem"));
        assert_eq!(resolved.subscription_dir, PathBuf::from("/srv/box/subscriptions"));
    }

    #[test]
    fn test_resolve_rejects_missing_required() {
        let err = DeploymentOptions::new("   ", "/tmp/state.json").resolve().unwrap_err();
        assert!(matches!(err, DeployError::Validation { .. }));

        let err = DeploymentOptions::new("example.com", "").resolve().unwrap_err();
        assert!(err.to_string().contains("state file"));

        let err = DeploymentOptions::new("../etc", "/tmp/state.json").resolve().unwrap_err();
        assert!(matches!(err, DeployError::Validation { .. }));

        let mut options = DeploymentOptions::new("example.com", "/tmp/state.json");
        options.key_bits = 0;
        assert!(options.resolve().is_err());
    }

    #[test]
    fn test_resolve_rejects_unsafe_values() {
        for domain in ["exa\"mple.com", "example..com", "-example.com", "example.com\n}", "exa mple.com"] {
            let err = DeploymentOptions::new(domain, "/tmp/state.json").resolve().unwrap_err();
            assert!(matches!(err, DeployError::Validation { .. }), "accepted {domain:?}");
        }

        for email in ["Ops \"Team\" <ops@example.com>", "ops@example.com\n}", "ops\\@example.com"] {
            let mut options = DeploymentOptions::new("example.com", "/tmp/state.json");
            options.email = Some(email.to_string());
            let err = options.resolve().unwrap_err();
            assert!(matches!(err, DeployError::Validation { .. }), "accepted {email:?}");
        }

        let resolved = DeploymentOptions::new("sub-1.Example.com", "/tmp/state.json")
            .resolve()
            .unwrap();
        assert_eq!(resolved.domain, "sub-1.example.com");
    }
}
