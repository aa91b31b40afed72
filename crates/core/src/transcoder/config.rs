//! Configuration for the transcoder backends.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the in-process ffmpeg transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegTranscoderConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Timeout for a single conversion in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for thumbnail extraction in seconds.
    #[serde(default = "default_thumbnail_timeout")]
    pub thumbnail_timeout_secs: u64,

    /// FFmpeg log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Additional ffmpeg output arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_timeout() -> u64 {
    3600 // 1 hour
}

fn default_thumbnail_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for FfmpegTranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            timeout_secs: default_timeout(),
            thumbnail_timeout_secs: default_thumbnail_timeout(),
            log_level: default_log_level(),
            extra_args: Vec::new(),
        }
    }
}

/// Configuration for a remote converter service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTranscoderConfig {
    /// Base URL, e.g. `http://converter:8000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for HttpTranscoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}
