// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interactive inbound selection

use crate::error::{DeployError, Result};

fn is_separator(c: char) -> bool {
    matches!(c, ',' | '，' | ';' | ' ' | '\t')
}

/// Parse a line of 1-based indices into catalog keys
///
/// An empty line or `all` selects every entry of `supported`. Indices may be
/// separated by commas (ASCII or full-width), semicolons or whitespace;
/// repeated indices collapse to their first occurrence.
pub fn parse_selection(line: &str, supported: &[&str]) -> Result<Vec<String>> {
    let line = line.trim();
    if line.is_empty() || line.eq_ignore_ascii_case("all") {
        return Ok(supported.iter().map(|key| key.to_string()).collect());
    }

    let mut picked: Vec<String> = Vec::new();
    for token in line.split(is_separator).filter(|t| !t.is_empty()) {
        let index: usize = token.parse().map_err(|_| DeployError::Validation {
            message: format!("invalid selection {token:?}"),
        })?;
        if index == 0 || index > supported.len() {
            return Err(DeployError::Validation {
                message: format!("selection {index} is out of range 1-{}", supported.len()),
            });
        }

        let key = supported[index - 1];
        if !picked.iter().any(|k| k == key) {
            picked.push(key.to_string());
        }
    }

    if picked.is_empty() {
        return Err(DeployError::Validation {
            message: "no inbounds selected".to_string(),
        });
    }

    Ok(picked)
}

/// Numbered menu shown before prompting
pub fn menu(supported: &[&str]) -> String {
    supported
        .iter()
        .enumerate()
        .map(|(i, key)| format!("  {}) {key}\n", i + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 3] = ["vless-h2-tls", "vless-ws-tls", "vmess-ws-tls"];

    #[test]
    fn test_empty_and_all_select_everything() {
        assert_eq!(parse_selection("", &KEYS).unwrap(), KEYS.to_vec());
        assert_eq!(parse_selection("  ALL \n", &KEYS).unwrap(), KEYS.to_vec());
    }

    #[test]
    fn test_mixed_separators_and_duplicates() {
        let picked = parse_selection("3，1; 3\t1,2", &KEYS).unwrap();
        assert_eq!(picked, vec!["vmess-ws-tls", "vless-h2-tls", "vless-ws-tls"]);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(parse_selection("0", &KEYS).is_err());
        assert!(parse_selection("4", &KEYS).is_err());
        assert!(parse_selection("1,x", &KEYS).is_err());
        assert!(parse_selection("-1", &KEYS).is_err());
        assert!(parse_selection(" ,，; ", &KEYS).is_err());
    }

    #[test]
    fn test_menu_is_one_based() {
        let menu = menu(&KEYS);
        assert!(menu.starts_with("  1) vless-h2-tls\n"));
        assert!(menu.contains("  3) vmess-ws-tls\n"));
    }
}
