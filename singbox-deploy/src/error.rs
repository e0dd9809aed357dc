// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for singbox-deploy

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Pipeline stage a failure occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Normalize,
    BuildSpecs,
    Render,
    WriteInbounds,
    WriteCommon,
    TlsKeyPair,
    WriteCaddy,
    ShareLinks,
    WriteSubscription,
    SaveState,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate options",
            Stage::Normalize => "normalize inbound keys",
            Stage::BuildSpecs => "build inbound specs",
            Stage::Render => "render templates",
            Stage::WriteInbounds => "write inbound configs",
            Stage::WriteCommon => "write common config",
            Stage::TlsKeyPair => "provision tls key pair",
            Stage::WriteCaddy => "write caddy config",
            Stage::ShareLinks => "build share links",
            Stage::WriteSubscription => "write subscription file",
            Stage::SaveState => "save state",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while deploying
#[derive(Error, Debug)]
pub enum DeployError {
    /// A required option is missing or malformed
    #[error("Invalid options: {message}")]
    Validation { message: String },

    /// Requested inbound key is not in the catalog
    #[error("Unknown inbound type {key:?}")]
    InvalidInbound { key: String },

    /// Spec requested for a key the catalog does not define
    #[error("Unsupported inbound type: {key}")]
    UnsupportedInbound { key: String },

    /// Template set has no body for a catalog key
    #[error("No template for key {key}")]
    MissingTemplate { key: String },

    /// Template body could not be rendered
    #[error("Failed to render template '{template}': {message}")]
    TemplateRender { template: String, message: String },

    /// Filesystem failure with the path involved
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// External process failed to spawn, exited non-zero or timed out
    #[error("Command '{command}' failed: {message}")]
    ExternalProcess { command: String, message: String },

    /// Expected PEM delimiter absent from generator output
    #[error("Unable to find {delimiter} in generated output")]
    Extraction { delimiter: String },

    /// Share link requested for a protocol outside the supported set
    #[error("Share link for protocol {protocol} is not supported")]
    UnsupportedProtocol { protocol: String },

    /// State file does not exist
    #[error("State file not found: {path}")]
    StateNotFound { path: String },

    /// State file exists but is not valid state JSON
    #[error("Failed to parse state '{path}': {message}")]
    StateParse { path: String, message: String },

    /// Secure random source failed
    #[error("Random source failure: {0}")]
    RandomSource(#[from] rand::Error),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration contents
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure inside a named pipeline stage
    #[error("{stage} failed: {error}")]
    Stage { stage: Stage, error: Box<DeployError> },
}

impl DeployError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        DeployError::Stage {
            stage,
            error: Box::new(self),
        }
    }

    /// The underlying error with any stage wrappers removed
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::Stage { error, .. } => error.root(),
            other => other,
        }
    }

    /// Stage the error was raised in, if it came out of a deployment run
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DeployError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Attach a pipeline stage to a failing result
pub(crate) trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn in_stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.in_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_stages() {
        let err = DeployError::Extraction {
            delimiter: "-----BEGIN CERTIFICATE-----".to_string(),
        }
        .in_stage(Stage::TlsKeyPair);

        assert_eq!(err.stage(), Some(Stage::TlsKeyPair));
        assert!(matches!(err.root(), DeployError::Extraction { .. }));
        assert!(err.to_string().starts_with("provision tls key pair failed"));
        assert!(err.to_string().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_io_error_names_path() {
        let err = DeployError::io(
            "/tmp/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing"));
        assert_eq!(err.stage(), None);
    }
}
