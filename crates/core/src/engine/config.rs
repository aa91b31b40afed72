//! Configuration for engine backends.

use serde::{Deserialize, Serialize};

/// qBittorrent WebUI connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QBittorrentConfig {
    #[serde(default = "default_qb_url")]
    pub url: String,
    #[serde(default = "default_qb_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Timeout for a single API call.
    #[serde(default = "default_qb_timeout")]
    pub timeout_secs: u64,
    /// Save path passed on add; qBittorrent's default when unset.
    #[serde(default)]
    pub download_path: Option<String>,
}

fn default_qb_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_qb_username() -> String {
    "admin".to_string()
}

fn default_qb_timeout() -> u64 {
    30
}

impl Default for QBittorrentConfig {
    fn default() -> Self {
        Self {
            url: default_qb_url(),
            username: default_qb_username(),
            password: String::new(),
            timeout_secs: default_qb_timeout(),
            download_path: None,
        }
    }
}

/// Embedded librqbit session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrqbitConfig {
    #[serde(default = "default_rqbit_download_path")]
    pub download_path: String,
    #[serde(default = "default_enable_dht")]
    pub enable_dht: bool,
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Session state folder; no persistence when unset.
    #[serde(default)]
    pub persistence_path: Option<String>,
}

fn default_rqbit_download_path() -> String {
    "storage/torrents".to_string()
}

fn default_enable_dht() -> bool {
    true
}

impl Default for LibrqbitConfig {
    fn default() -> Self {
        Self {
            download_path: default_rqbit_download_path(),
            enable_dht: default_enable_dht(),
            listen_port: None,
            persistence_path: None,
        }
    }
}
