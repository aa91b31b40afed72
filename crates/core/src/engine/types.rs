//! Types shared by peer-to-peer engine backends.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::FilePriority;
use crate::progress::PieceBitfield;

/// Errors that can occur during engine operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The engine no longer knows the torrent (removed, or the engine restarted).
    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("File index {index} out of range ({count} files)")]
    InvalidFileIndex { index: usize, count: usize },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse state of a torrent as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Waiting for the info dictionary.
    FetchingMetadata,
    /// Verifying data already on disk.
    Checking,
    Downloading,
    Paused,
    /// All selected data is on disk.
    Finished,
    Seeding,
    Error,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::FetchingMetadata => "fetching_metadata",
            EngineState::Checking => "checking",
            EngineState::Downloading => "downloading",
            EngineState::Paused => "paused",
            EngineState::Finished => "finished",
            EngineState::Seeding => "seeding",
            EngineState::Error => "error",
        }
    }

    /// Whether the selected data is fully on disk.
    pub fn is_complete(&self) -> bool {
        matches!(self, EngineState::Finished | EngineState::Seeding)
    }
}

/// Point-in-time status of one torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Global piece completion ratio (0.0 - 1.0).
    pub global_progress: f64,
    /// Bytes per second.
    pub download_rate: u64,
    /// Bytes per second.
    pub upload_rate: u64,
    pub peers: u32,
    pub seeds: u32,
    /// Owned pieces, when the engine exposes them.
    pub pieces: Option<PieceBitfield>,
    /// Downloaded bytes per file index, for engines without a bitfield.
    pub file_bytes: Option<Vec<u64>>,
    /// Engine-side error text.
    pub error: Option<String>,
}

impl EngineStatus {
    pub fn new(state: EngineState) -> Self {
        Self {
            state,
            global_progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            peers: 0,
            seeds: 0,
            pieces: None,
            file_bytes: None,
            error: None,
        }
    }
}

/// A file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub index: usize,
    /// Path relative to the torrent's save directory.
    pub path: String,
    pub size: u64,
    /// Byte offset of the file within the torrent's concatenated data.
    pub offset: u64,
}

/// Structural metadata of a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    pub name: String,
    /// Lowercase hex.
    pub info_hash: String,
    pub total_size: u64,
    /// Unknown for engines that do not expose it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece_length: Option<u64>,
    pub files: Vec<TorrentFile>,
}

impl TorrentMetadata {
    /// Assign offsets from file order, as laid out in the torrent.
    pub fn with_sequential_offsets(mut self) -> Self {
        let mut offset = 0;
        for file in &mut self.files {
            file.offset = offset;
            offset += file.size;
        }
        self
    }
}

/// What to add to the engine.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    Magnet(String),
    TorrentFile {
        data: Vec<u8>,
        filename: Option<String>,
    },
}

/// Request to add a torrent on behalf of a job.
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    pub job_id: String,
    pub source: TorrentSource,
    pub start_paused: bool,
    pub download_path: Option<PathBuf>,
}

impl AddTorrentRequest {
    pub fn new(job_id: impl Into<String>, source: TorrentSource) -> Self {
        Self {
            job_id: job_id.into(),
            source,
            start_paused: true,
            download_path: None,
        }
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_path = Some(path.into());
        self
    }
}

/// A peer-to-peer engine backend.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add a torrent and return the handle controlling it.
    async fn add(&self, request: AddTorrentRequest) -> Result<Box<dyn EngineHandle>, EngineError>;
}

/// Control over one torrent inside an engine.
///
/// Owned by exclusively one monitoring task; never shared.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Engine-side identifier (info hash), once known.
    fn id(&self) -> Option<String>;

    async fn status(&self) -> Result<EngineStatus, EngineError>;

    /// `None` until the engine has the info dictionary.
    async fn metadata(&self) -> Result<Option<TorrentMetadata>, EngineError>;

    async fn set_file_priority(
        &self,
        index: usize,
        priority: FilePriority,
    ) -> Result<(), EngineError> {
        self.set_file_priorities(&[(index, priority)]).await
    }

    /// Apply several priorities at once.
    async fn set_file_priorities(
        &self,
        priorities: &[(usize, FilePriority)],
    ) -> Result<(), EngineError>;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    /// Remove the torrent from the engine. The handle is unusable afterwards.
    async fn remove(&self, delete_files: bool) -> Result<(), EngineError>;

    /// Directory the torrent's files are written to.
    fn save_path(&self) -> PathBuf;
}
