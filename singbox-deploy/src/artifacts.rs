// SPDX-License-Identifier: AGPL-3.0-or-later
//! File writing helpers
//!
//! Every artifact is a plain overwrite; nothing here is transactional.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{DeployError, Result};

/// Directories this tool creates for its own artifacts
pub const DIR_MODE: u32 = 0o750;
/// Directories shared with other services (Caddy, state)
pub const SHARED_DIR_MODE: u32 = 0o755;
/// Config files readable by the service group
pub const CONFIG_MODE: u32 = 0o640;

/// Name of the shared sing-box config in the root directory
pub const COMMON_CONFIG_NAME: &str = "00_common.json";
/// Prefix for per-inbound config files
pub const INBOUND_FILE_PREFIX: &str = "02_inbounds_";

/// Create `dir` and its parents
pub fn ensure_dir(dir: &Path, mode: u32) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(dir).map_err(|e| DeployError::io(dir, e))
}

/// Replace the contents of `path`, applying `mode` on Unix
pub fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(|e| DeployError::io(path, e))?;

    // open() only applies the mode on creation; tighten an existing file
    // before any new contents land in it
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| DeployError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(contents).map_err(|e| DeployError::io(path, e))?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

/// Pretty JSON with a trailing newline
pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec_pretty(value)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Wrap a rendered inbound object as a standalone config file body
pub fn wrap_inbound(rendered: &str) -> Result<Vec<u8>> {
    let inbound: Value = serde_json::from_str(rendered)?;
    to_json_bytes(&json!({ "inbounds": [inbound] }))
}

/// The shared base config: logging plus direct/block outbounds
pub fn common_config() -> Value {
    json!({
        "log": {
            "level": "info",
            "timestamp": true,
            "output": "/var/log/sing-box/sing-box.log"
        },
        "outbounds": [
            { "type": "direct", "tag": "direct" },
            { "type": "block", "tag": "block" }
        ],
        "route": {
            "final": "direct"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_file_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        write_file(&path, b"first contents", CONFIG_MODE).unwrap();
        write_file(&path, b"second", CONFIG_MODE).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_file_resets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        write_file(&path, b"y", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_ensure_dir_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested, DIR_MODE).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested, DIR_MODE).unwrap();
    }

    #[test]
    fn test_wrap_inbound() {
        let wrapped = wrap_inbound(r#"{"type": "vless", "listen_port": 40000}"#).unwrap();
        let value: Value = serde_json::from_slice(&wrapped).unwrap();
        assert_eq!(value["inbounds"][0]["type"], "vless");
        assert_eq!(value["inbounds"][0]["listen_port"], 40000);
        assert_eq!(wrapped.last(), Some(&b'\n'));
    }

    #[test]
    fn test_wrap_inbound_rejects_invalid_json() {
        assert!(matches!(wrap_inbound("{not json"), Err(DeployError::Json(_))));
    }

    #[test]
    fn test_common_config_routes_direct() {
        let config = common_config();
        assert_eq!(config["route"]["final"], "direct");
        assert_eq!(config["outbounds"].as_array().unwrap().len(), 2);
    }
}
