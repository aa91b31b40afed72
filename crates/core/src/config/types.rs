use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::engine::{LibrqbitConfig, QBittorrentConfig};
use crate::extractor::ExtractorConfig;
use crate::transcoder::{FfmpegTranscoderConfig, HttpTranscoderConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Where downloaded, converted and thumbnail files live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

impl StorageConfig {
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join("converted")
    }
}

/// Job store backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("jobhub.db")
}

/// Polling cadence and record retention for monitoring tasks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Poll interval for transfer and torrent monitoring (default 1s).
    #[serde(default = "default_transfer_poll_interval")]
    pub transfer_poll_interval_ms: u64,
    /// Poll interval while watching a conversion sub-job (default 2s).
    #[serde(default = "default_conversion_poll_interval")]
    pub conversion_poll_interval_ms: u64,
    /// Retention of single-file jobs (default 24h).
    #[serde(default = "default_simple_retention")]
    pub simple_retention_secs: u64,
    /// Retention of multi-file jobs (default 7 days).
    #[serde(default = "default_multi_file_retention")]
    pub multi_file_retention_secs: u64,
    /// How often expired records are purged (default 10 minutes).
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    /// Capacity of each job's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_transfer_poll_interval() -> u64 {
    1000
}

fn default_conversion_poll_interval() -> u64 {
    2000
}

fn default_simple_retention() -> u64 {
    24 * 60 * 60
}

fn default_multi_file_retention() -> u64 {
    7 * 24 * 60 * 60
}

fn default_purge_interval() -> u64 {
    600
}

fn default_command_buffer() -> usize {
    8
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transfer_poll_interval_ms: default_transfer_poll_interval(),
            conversion_poll_interval_ms: default_conversion_poll_interval(),
            simple_retention_secs: default_simple_retention(),
            multi_file_retention_secs: default_multi_file_retention(),
            purge_interval_secs: default_purge_interval(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// Completion pipeline tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Files smaller than this are never used for thumbnails.
    #[serde(default = "default_thumbnail_min_bytes")]
    pub thumbnail_min_bytes: u64,
    /// Transfer progress (percent) after which an early thumbnail is attempted.
    #[serde(default = "default_early_thumbnail_threshold")]
    pub early_thumbnail_threshold_pct: f64,
    /// Offset into the media where the thumbnail frame is taken.
    #[serde(default = "default_thumbnail_timestamp")]
    pub thumbnail_timestamp_secs: u64,
}

fn default_thumbnail_min_bytes() -> u64 {
    1024 * 1024
}

fn default_early_thumbnail_threshold() -> f64 {
    10.0
}

fn default_thumbnail_timestamp() -> u64 {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thumbnail_min_bytes: default_thumbnail_min_bytes(),
            early_thumbnail_threshold_pct: default_early_thumbnail_threshold(),
            thumbnail_timestamp_secs: default_thumbnail_timestamp(),
        }
    }
}

/// Available peer-to-peer engine backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    #[default]
    #[serde(rename = "qbittorrent")]
    QBittorrent,
    Librqbit,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,
    #[serde(default)]
    pub qbittorrent: QBittorrentConfig,
    #[serde(default)]
    pub librqbit: LibrqbitConfig,
}

/// Available transcoder backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscoderBackend {
    #[default]
    Ffmpeg,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TranscoderConfig {
    #[serde(default)]
    pub backend: TranscoderBackend,
    #[serde(default)]
    pub ffmpeg: FfmpegTranscoderConfig,
    #[serde(default)]
    pub http: HttpTranscoderConfig,
}

/// Real-time notification fanout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// Capacity of the in-process broadcast channel feeding WebSocket clients.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Optional endpoint receiving every job update as a POST.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_webhook_timeout() -> u64 {
    5
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub lifecycle: LifecycleConfig,
    pub pipeline: PipelineConfig,
    pub engine: SanitizedEngineConfig,
    pub extractor: ExtractorConfig,
    pub transcoder: TranscoderConfig,
    pub notify: SanitizedNotifyConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEngineConfig {
    pub backend: EngineBackend,
    pub qbittorrent_url: String,
    pub qbittorrent_password_configured: bool,
    pub librqbit_download_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifyConfig {
    pub channel_capacity: usize,
    pub webhook_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            storage: config.storage.clone(),
            store: config.store.clone(),
            lifecycle: config.lifecycle.clone(),
            pipeline: config.pipeline.clone(),
            engine: SanitizedEngineConfig {
                backend: config.engine.backend,
                qbittorrent_url: config.engine.qbittorrent.url.clone(),
                qbittorrent_password_configured: !config.engine.qbittorrent.password.is_empty(),
                librqbit_download_path: config.engine.librqbit.download_path.clone(),
            },
            extractor: config.extractor.clone(),
            transcoder: config.transcoder.clone(),
            notify: SanitizedNotifyConfig {
                channel_capacity: config.notify.channel_capacity,
                webhook_configured: config.notify.webhook_url.is_some(),
            },
        }
    }
}
