//! Magnet URI validation.

use serde::Serialize;

use super::EngineError;

/// Display name used until the engine has fetched real metadata.
pub const PLACEHOLDER_NAME: &str = "Loading metadata...";

/// What can be learned from a magnet URI without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MagnetInfo {
    /// Lowercased `btih` value (hex or base32, as given).
    pub info_hash: String,
    /// URL-decoded `dn`, or the placeholder.
    pub name: String,
    /// Tracker URLs (`tr`).
    pub trackers: Vec<String>,
}

/// Validate a magnet URI and extract its hash and display name.
pub fn parse_magnet(uri: &str) -> Result<MagnetInfo, EngineError> {
    let query = uri
        .trim()
        .strip_prefix("magnet:?")
        .ok_or_else(|| EngineError::InvalidTorrent("not a magnet URI".to_string()))?;

    let mut info_hash = None;
    let mut name = None;
    let mut trackers = Vec::new();

    for param in query.split('&') {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key {
            "xt" => {
                if let Some(hash) = value.strip_prefix("urn:btih:") {
                    if !hash.is_empty() {
                        info_hash = Some(hash.to_lowercase());
                    }
                }
            }
            "dn" => name = Some(decode(value)),
            "tr" => trackers.push(decode(value)),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(|| {
        EngineError::InvalidTorrent("magnet URI has no urn:btih: hash".to_string())
    })?;

    Ok(MagnetInfo {
        info_hash,
        name: name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string()),
        trackers,
    })
}

fn decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_magnet() {
        let info = parse_magnet(
            "magnet:?xt=urn:btih:ABC123DEF456&dn=Big%20Buck+Bunny&tr=udp%3A%2F%2Ftracker.example%3A80",
        )
        .unwrap();
        assert_eq!(info.info_hash, "abc123def456");
        assert_eq!(info.name, "Big Buck Bunny");
        assert_eq!(info.trackers, vec!["udp://tracker.example:80"]);
    }

    #[test]
    fn test_missing_name_uses_placeholder() {
        let info = parse_magnet("magnet:?xt=urn:btih:abc").unwrap();
        assert_eq!(info.name, PLACEHOLDER_NAME);
    }

    #[test]
    fn test_rejects_non_magnet() {
        assert!(parse_magnet("http://example.com/file.torrent").is_err());
        assert!(parse_magnet("").is_err());
    }

    #[test]
    fn test_rejects_missing_hash() {
        assert!(parse_magnet("magnet:?dn=Test").is_err());
        assert!(parse_magnet("magnet:?xt=urn:btih:&dn=Test").is_err());
        assert!(parse_magnet("magnet:?xt=urn:sha1:abc").is_err());
    }
}
