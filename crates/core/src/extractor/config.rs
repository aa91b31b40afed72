//! Configuration for the media extractor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the yt-dlp based extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Path to the yt-dlp binary.
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,

    /// Format selector used when a job does not name one.
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Timeout for metadata extraction in seconds.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Timeout for a whole download in seconds.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Timeout for fetching a remote thumbnail in seconds.
    #[serde(default = "default_thumbnail_timeout")]
    pub thumbnail_timeout_secs: u64,

    /// Additional arguments passed to every yt-dlp invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_format() -> String {
    // Prefer MP4
    "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string()
}

fn default_metadata_timeout() -> u64 {
    60
}

fn default_download_timeout() -> u64 {
    6 * 3600
}

fn default_thumbnail_timeout() -> u64 {
    10
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            default_format: default_format(),
            metadata_timeout_secs: default_metadata_timeout(),
            download_timeout_secs: default_download_timeout(),
            thumbnail_timeout_secs: default_thumbnail_timeout(),
            extra_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExtractorConfig::default();
        assert_eq!(config.ytdlp_path, PathBuf::from("yt-dlp"));
        assert!(config.default_format.starts_with("bestvideo"));
        assert_eq!(config.metadata_timeout_secs, 60);
    }

    #[test]
    fn test_partial_toml() {
        let config: ExtractorConfig = toml::from_str(r#"ytdlp_path = "/opt/yt-dlp""#).unwrap();
        assert_eq!(config.ytdlp_path, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(config.thumbnail_timeout_secs, 10);
    }
}
