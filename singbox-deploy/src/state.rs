// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted record of the last successful deployment
//!
//! The JSON layout is read by other tooling; field names must stay stable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifacts::{ensure_dir, to_json_bytes, write_file, SHARED_DIR_MODE};
use crate::error::{DeployError, Result};

const STATE_MODE: u32 = 0o644;

/// One deployed inbound and its share link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub key: String,
    pub tag: String,
    pub protocol: String,
    pub transport: String,
    pub listen_port: u16,
    pub uuid: String,
    pub path: String,
    pub host: String,
    pub share_url: String,
}

/// Deployment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub domain: String,
    pub email: String,
    pub root_dir: PathBuf,
    pub caddy_file: PathBuf,
    pub subscription_file: PathBuf,
    pub inbounds: Vec<Inbound>,
    pub last_updated: DateTime<Utc>,
}

impl State {
    /// Load state from `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DeployError::StateNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(DeployError::io(path, e)),
        };

        serde_json::from_slice(&data).map_err(|e| DeployError::StateParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Stamp `last_updated` and replace the file at `path`
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            ensure_dir(parent, SHARED_DIR_MODE)?;
        }

        self.last_updated = Utc::now();
        let payload = to_json_bytes(self)?;
        write_file(path, &payload, STATE_MODE)?;

        debug!(path = %path.display(), inbounds = self.inbounds.len(), "Saved state");
        Ok(())
    }

    /// Inbounds ordered by tag
    pub fn sorted_by_tag(&self) -> Vec<&Inbound> {
        let mut inbounds: Vec<&Inbound> = self.inbounds.iter().collect();
        inbounds.sort_by(|a, b| a.tag.cmp(&b.tag));
        inbounds
    }

    /// Inbounds whose tag contains `tag` and whose key equals `key`
    ///
    /// Both filters are case-insensitive; empty or absent filters match all.
    pub fn filter(&self, tag: Option<&str>, key: Option<&str>) -> Vec<&Inbound> {
        let tag = tag.map(str::to_lowercase).filter(|t| !t.is_empty());
        let key = key.map(str::to_lowercase).filter(|k| !k.is_empty());

        self.inbounds
            .iter()
            .filter(|inbound| {
                tag.as_ref()
                    .map_or(true, |t| inbound.tag.to_lowercase().contains(t.as_str()))
            })
            .filter(|inbound| key.as_ref().map_or(true, |k| inbound.key.to_lowercase() == *k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn inbound(key: &str, tag: &str) -> Inbound {
        Inbound {
            key: key.to_string(),
            tag: tag.to_string(),
            protocol: "vless".to_string(),
            transport: "ws".to_string(),
            listen_port: 40000,
            uuid: "0b6f1c3e-2f4a-4d2b-9e1a-5c7d8e9f0a1b".to_string(),
            path: "/0b6f1c3e-2f4a-4d2b-9e1a-5c7d8e9f0a1b".to_string(),
            host: "example.com".to_string(),
            share_url: "vless://example".to_string(),
        }
    }

    fn sample_state() -> State {
        State {
            domain: "example.com".to_string(),
            email: "info@example.com".to_string(),
            root_dir: PathBuf::from("/etc/sing-box"),
            caddy_file: PathBuf::from("/etc/caddy/Caddyfile"),
            subscription_file: PathBuf::from("/etc/sing-box/subscriptions/example.com.txt"),
            inbounds: vec![
                inbound("vmess-ws-tls", "VMess-WS-TLS-example.com.json"),
                inbound("vless-ws-tls", "VLESS-WS-TLS-example.com.json"),
            ],
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_round_trip_refreshes_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let mut state = sample_state();

        let before = Utc::now();
        state.save(&path).unwrap();
        assert!(state.last_updated >= before);

        let loaded = State::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_ne!(loaded.last_updated, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_save_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = sample_state();
        state.save(&path).unwrap();

        state.inbounds.truncate(1);
        state.domain = "other.example".to_string();
        state.save(&path).unwrap();

        let loaded = State::load(&path).unwrap();
        assert_eq!(loaded.inbounds.len(), 1);
        assert_eq!(loaded.domain, "other.example");
    }

    #[test]
    fn test_json_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        sample_state().save(&path).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        for field in [
            "domain",
            "email",
            "root_dir",
            "caddy_file",
            "subscription_file",
            "inbounds",
            "last_updated",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        let first = &value["inbounds"][0];
        for field in [
            "key",
            "tag",
            "protocol",
            "transport",
            "listen_port",
            "uuid",
            "path",
            "host",
            "share_url",
        ] {
            assert!(first.get(field).is_some(), "missing inbound {field}");
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = State::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DeployError::StateNotFound { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"domain\": 42").unwrap();
        let err = State::load(&path).unwrap_err();
        assert!(matches!(err, DeployError::StateParse { .. }));
    }

    #[test]
    fn test_sorted_by_tag() {
        let state = sample_state();
        let sorted = state.sorted_by_tag();
        let tags: Vec<&str> = sorted.iter().map(|i| i.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec!["VLESS-WS-TLS-example.com.json", "VMess-WS-TLS-example.com.json"]
        );
    }

    #[test]
    fn test_filter() {
        let state = sample_state();
        assert_eq!(state.filter(None, None).len(), 2);
        assert_eq!(state.filter(Some("vmess"), None).len(), 1);
        assert_eq!(state.filter(None, Some("VLESS-WS-TLS")).len(), 1);
        assert_eq!(state.filter(Some("example.com"), Some("vless-ws-tls"))[0].key, "vless-ws-tls");
        assert!(state.filter(Some("h2"), None).is_empty());
        assert_eq!(state.filter(Some(""), Some("")).len(), 2);
    }
}
