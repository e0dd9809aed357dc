// SPDX-License-Identifier: AGPL-3.0-or-later
//! TLS key pair provisioning
//!
//! The key pair is generated by `sing-box generate tls-keypair` the first
//! time a deployment needs it and reused afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::artifacts::{ensure_dir, write_file, DIR_MODE};
use crate::error::{DeployError, Result};

const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

/// Source of a freshly generated PEM key pair
#[async_trait]
pub trait KeyPairGenerator: Send + Sync {
    /// Produce the raw tool output containing both PEM blocks
    async fn generate(&self, domain: &str, key_bits: u32) -> Result<String>;
}

/// Runs `<binary> generate tls-keypair <domain> -m <bits>`
#[derive(Debug, Clone)]
pub struct SingBoxKeyPairGenerator {
    binary: PathBuf,
    timeout: Duration,
}

impl SingBoxKeyPairGenerator {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl KeyPairGenerator for SingBoxKeyPairGenerator {
    async fn generate(&self, domain: &str, key_bits: u32) -> Result<String> {
        let bits = key_bits.to_string();
        let args = ["generate", "tls-keypair", domain, "-m", bits.as_str()];
        let command_line = format!("{} {}", self.binary.display(), args.join(" "));
        info!(command = %command_line, "Generating TLS key pair");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| DeployError::ExternalProcess {
            command: command_line.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if output.status.success() {
                    Ok(format!("{stdout}{stderr}"))
                } else {
                    Err(DeployError::ExternalProcess {
                        command: command_line,
                        message: format!("exited with {}: {}", output.status, stderr.trim()),
                    })
                }
            }
            Ok(Err(e)) => Err(DeployError::ExternalProcess {
                command: command_line,
                message: format!("failed to collect output: {e}"),
            }),
            Err(_) => Err(DeployError::ExternalProcess {
                command: command_line,
                message: format!("timed out after {} seconds", self.timeout.as_secs()),
            }),
        }
    }
}

/// Outcome of [`TlsProvisioner::ensure_key_pair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPairStatus {
    /// Both files were already present
    Existing,
    /// The generator ran and both files were written
    Generated,
}

/// Where the key pair lives and how to make one
#[derive(Debug, Clone)]
pub struct KeyPairRequest<'a> {
    pub domain: &'a str,
    pub key_path: &'a Path,
    pub cert_path: &'a Path,
    pub key_bits: u32,
}

/// Ensures a key pair exists on disk
pub struct TlsProvisioner {
    generator: Arc<dyn KeyPairGenerator>,
}

impl TlsProvisioner {
    pub fn new(generator: Arc<dyn KeyPairGenerator>) -> Self {
        Self { generator }
    }

    /// Generate and write the key pair unless both files already exist
    pub async fn ensure_key_pair(&self, request: &KeyPairRequest<'_>) -> Result<KeyPairStatus> {
        if key_pair_present(request.key_path, request.cert_path) {
            debug!(
                key = %request.key_path.display(),
                cert = %request.cert_path.display(),
                "TLS key pair already present"
            );
            return Ok(KeyPairStatus::Existing);
        }

        let output = self.generator.generate(request.domain, request.key_bits).await?;
        let key_pem = extract_pem(&output, "PRIVATE KEY")?;
        let cert_pem = extract_pem(&output, "CERTIFICATE")?;

        for path in [request.key_path, request.cert_path] {
            if let Some(parent) = path.parent() {
                ensure_dir(parent, DIR_MODE)?;
            }
        }
        write_file(request.key_path, key_pem.as_bytes(), KEY_MODE)?;
        write_file(request.cert_path, cert_pem.as_bytes(), CERT_MODE)?;

        info!(
            domain = %request.domain,
            key = %request.key_path.display(),
            cert = %request.cert_path.display(),
            "TLS key pair written"
        );
        Ok(KeyPairStatus::Generated)
    }
}

/// Cut the first `label` PEM block out of `raw`, delimiters included
pub fn extract_pem(raw: &str, label: &str) -> Result<String> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = raw
        .find(&begin)
        .ok_or_else(|| DeployError::Extraction { delimiter: begin.clone() })?;
    let finish = raw[start..]
        .find(&end)
        .ok_or_else(|| DeployError::Extraction { delimiter: end.clone() })?;

    let block = &raw[start..start + finish + end.len()];
    Ok(format!("{}\n", block.trim()))
}

fn key_pair_present(key_path: &Path, cert_path: &Path) -> bool {
    fs::metadata(key_path).is_ok() && fs::metadata(cert_path).is_ok()
}
