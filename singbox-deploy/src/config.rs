// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for singbox-deploy

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::{
    DeploymentOptions, DEFAULT_CADDY_FILE, DEFAULT_GENERATE_TIMEOUT, DEFAULT_KEY_BITS, DEFAULT_ROOT_DIR,
    DEFAULT_SING_BOX_BIN,
};
use crate::error::{DeployError, Result};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "sbdeploy.toml";

/// State file name inside the root directory when none is configured
pub const DEFAULT_STATE_FILE_NAME: &str = "deploy-state.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// sing-box configuration root
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Caddyfile output path
    #[serde(default = "default_caddy_file")]
    pub caddy_file: PathBuf,

    /// Subscription directory (defaults to `<root_dir>/subscriptions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_dir: Option<PathBuf>,

    /// State file (defaults to `<root_dir>/deploy-state.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// TLS key pair settings
    #[serde(default)]
    pub tls: TlsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TLS key pair configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// sing-box binary used to generate the key pair
    #[serde(default = "default_sing_box_bin")]
    pub sing_box_bin: PathBuf,

    /// Key size passed to `generate tls-keypair -m`
    #[serde(default = "default_key_bits")]
    pub key_bits: u32,

    /// Upper bound on the generator's run time
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    /// Private key path (defaults to `<root_dir>/tls.key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Certificate path (defaults to `<root_dir>/tls.cer`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            sing_box_bin: default_sing_box_bin(),
            key_bits: default_key_bits(),
            generate_timeout_secs: default_generate_timeout_secs(),
            key_path: None,
            cert_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            caddy_file: default_caddy_file(),
            subscription_dir: None,
            state_file: None,
            tls: TlsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DeployError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(DeployError::InvalidConfig {
                message: "root_dir cannot be empty".to_string(),
            });
        }

        if self.caddy_file.as_os_str().is_empty() {
            return Err(DeployError::InvalidConfig {
                message: "caddy_file cannot be empty".to_string(),
            });
        }

        if self.tls.key_bits == 0 {
            return Err(DeployError::InvalidConfig {
                message: "tls.key_bits must be greater than zero".to_string(),
            });
        }

        if self.tls.generate_timeout_secs == 0 {
            return Err(DeployError::InvalidConfig {
                message: "tls.generate_timeout_secs must be greater than zero".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(DeployError::InvalidConfig {
                message: format!("unknown logging.format '{}'", self.logging.format),
            });
        }

        Ok(())
    }

    /// Effective state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join(DEFAULT_STATE_FILE_NAME))
    }

    /// Project this configuration onto options for one deployment
    pub fn deployment_options(
        &self,
        domain: impl Into<String>,
        email: Option<String>,
        inbound_keys: Vec<String>,
    ) -> DeploymentOptions {
        let mut options = DeploymentOptions::new(domain, self.state_path());
        options.email = email;
        options.inbound_keys = inbound_keys;
        options.root_dir = Some(self.root_dir.clone());
        options.caddy_file = Some(self.caddy_file.clone());
        options.subscription_dir = self.subscription_dir.clone();
        options.sing_box_bin = Some(self.tls.sing_box_bin.clone());
        options.tls_key_path = self.tls.key_path.clone();
        options.tls_cert_path = self.tls.cert_path.clone();
        options.key_bits = self.tls.key_bits;
        options.generate_timeout = Duration::from_secs(self.tls.generate_timeout_secs);
        options
    }
}

// Default value functions

fn default_root_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT_DIR)
}

fn default_caddy_file() -> PathBuf {
    PathBuf::from(DEFAULT_CADDY_FILE)
}

fn default_sing_box_bin() -> PathBuf {
    PathBuf::from(DEFAULT_SING_BOX_BIN)
}

fn default_key_bits() -> u32 {
    DEFAULT_KEY_BITS
}

fn default_generate_timeout_secs() -> u64 {
    DEFAULT_GENERATE_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
