//! Mock peer-to-peer engine for testing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::{
    AddTorrentRequest, EngineError, EngineHandle, EngineState, EngineStatus, PeerEngine,
    TorrentMetadata, TorrentSource,
};
use crate::job::FilePriority;
use crate::progress::PieceBitfield;

/// State of one torrent held by the mock, keyed by job id.
#[derive(Debug, Clone)]
struct MockTorrent {
    metadata: Option<TorrentMetadata>,
    status: EngineStatus,
    priorities: HashMap<usize, FilePriority>,
    priority_calls: usize,
    pause_calls: usize,
    resume_calls: usize,
    removed: Option<bool>,
}

type Torrents = Arc<RwLock<HashMap<String, MockTorrent>>>;

/// Mock implementation of the PeerEngine trait.
///
/// Provides controllable behavior for testing:
/// - Script metadata arrival, progress, piece bitfields and engine errors
/// - Record priority, pause, resume and remove calls for assertions
/// - Simulate failures of the next call
///
/// Torrents are keyed by the job id of the add request.
///
/// # Example
///
/// ```rust,ignore
/// let engine = MockPeerEngine::new();
/// engine.set_default_metadata(metadata).await;
///
/// // ... submit a torrent job "job1" ...
///
/// engine.set_progress("job1", 0.5).await;
/// engine.set_progress("job1", 1.0).await; // Seeding
/// assert_eq!(engine.resume_calls("job1").await, 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockPeerEngine {
    torrents: Torrents,
    /// Metadata given to newly added torrents.
    default_metadata: Arc<RwLock<Option<TorrentMetadata>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<EngineError>>>,
    added: Arc<RwLock<Vec<AddTorrentRequest>>>,
    save_path: PathBuf,
}

impl Default for MockPeerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeerEngine {
    pub fn new() -> Self {
        Self::with_save_path("/mock/downloads")
    }

    /// Create a mock engine writing (nominally) under `save_path`.
    pub fn with_save_path(save_path: impl Into<PathBuf>) -> Self {
        Self {
            torrents: Arc::new(RwLock::new(HashMap::new())),
            default_metadata: Arc::new(RwLock::new(None)),
            next_error: Arc::new(RwLock::new(None)),
            added: Arc::new(RwLock::new(Vec::new())),
            save_path: save_path.into(),
        }
    }

    pub async fn set_default_metadata(&self, metadata: TorrentMetadata) {
        *self.default_metadata.write().await = Some(metadata);
    }

    /// Make metadata available for an added torrent.
    pub async fn set_metadata(&self, job_id: &str, metadata: TorrentMetadata) {
        self.with_torrent(job_id, |t| t.metadata = Some(metadata))
            .await;
    }

    /// Set the global progress (0.0 to 1.0).
    ///
    /// At 1.0 the torrent switches to Seeding.
    pub async fn set_progress(&self, job_id: &str, progress: f64) {
        self.with_torrent(job_id, |t| {
            let progress = progress.clamp(0.0, 1.0);
            t.status.global_progress = progress;
            if progress >= 1.0 {
                t.status.state = EngineState::Seeding;
            } else if t.status.state != EngineState::Paused {
                t.status.state = EngineState::Downloading;
            }
        })
        .await;
    }

    pub async fn set_state(&self, job_id: &str, state: EngineState) {
        self.with_torrent(job_id, |t| t.status.state = state).await;
    }

    pub async fn set_pieces(&self, job_id: &str, pieces: PieceBitfield) {
        self.with_torrent(job_id, |t| t.status.pieces = Some(pieces))
            .await;
    }

    pub async fn set_rates(&self, job_id: &str, download: u64, upload: u64, peers: u32, seeds: u32) {
        self.with_torrent(job_id, |t| {
            t.status.download_rate = download;
            t.status.upload_rate = upload;
            t.status.peers = peers;
            t.status.seeds = seeds;
        })
        .await;
    }

    /// Make the engine report an error state for this torrent.
    pub async fn set_error(&self, job_id: &str, message: &str) {
        self.with_torrent(job_id, |t| {
            t.status.state = EngineState::Error;
            t.status.error = Some(message.to_string());
        })
        .await;
    }

    /// Drop a torrent behind the handle's back, as a user of the engine's own UI would.
    pub async fn forget(&self, job_id: &str) {
        self.torrents.write().await.remove(job_id);
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: EngineError) {
        *self.next_error.write().await = Some(error);
    }

    /// All add requests received.
    pub async fn added(&self) -> Vec<AddTorrentRequest> {
        self.added.read().await.clone()
    }

    pub async fn has_torrent(&self, job_id: &str) -> bool {
        self.torrents
            .read()
            .await
            .get(job_id)
            .is_some_and(|t| t.removed.is_none())
    }

    /// Current priority per file index.
    pub async fn priorities(&self, job_id: &str) -> HashMap<usize, FilePriority> {
        self.torrents
            .read()
            .await
            .get(job_id)
            .map(|t| t.priorities.clone())
            .unwrap_or_default()
    }

    pub async fn priority_calls(&self, job_id: &str) -> usize {
        self.read_torrent(job_id, |t| t.priority_calls).await
    }

    pub async fn pause_calls(&self, job_id: &str) -> usize {
        self.read_torrent(job_id, |t| t.pause_calls).await
    }

    pub async fn resume_calls(&self, job_id: &str) -> usize {
        self.read_torrent(job_id, |t| t.resume_calls).await
    }

    /// `Some(delete_files)` once the torrent was removed.
    pub async fn removed(&self, job_id: &str) -> Option<bool> {
        self.torrents
            .read()
            .await
            .get(job_id)
            .and_then(|t| t.removed)
    }

    async fn with_torrent(&self, job_id: &str, f: impl FnOnce(&mut MockTorrent)) {
        if let Some(torrent) = self.torrents.write().await.get_mut(job_id) {
            f(torrent);
        }
    }

    async fn read_torrent(&self, job_id: &str, f: impl FnOnce(&MockTorrent) -> usize) -> usize {
        self.torrents.read().await.get(job_id).map(f).unwrap_or(0)
    }
}

#[async_trait]
impl PeerEngine for MockPeerEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn add(&self, request: AddTorrentRequest) -> Result<Box<dyn EngineHandle>, EngineError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let mut status = EngineStatus::new(EngineState::FetchingMetadata);
        if request.start_paused {
            status.state = EngineState::Paused;
        }
        // Like qBittorrent, a stopped magnet never learns its files
        let stalled = request.start_paused && matches!(request.source, TorrentSource::Magnet(_));
        let metadata = if stalled {
            None
        } else {
            self.default_metadata.read().await.clone()
        };
        let torrent = MockTorrent {
            metadata,
            status,
            priorities: HashMap::new(),
            priority_calls: 0,
            pause_calls: 0,
            resume_calls: 0,
            removed: None,
        };
        self.torrents
            .write()
            .await
            .insert(request.job_id.clone(), torrent);
        self.added.write().await.push(request.clone());

        Ok(Box::new(MockEngineHandle {
            job_id: request.job_id.clone(),
            torrents: Arc::clone(&self.torrents),
            next_error: Arc::clone(&self.next_error),
            save_path: request
                .download_path
                .unwrap_or_else(|| self.save_path.join(&request.job_id)),
        }))
    }
}

/// Handle over one torrent of a [`MockPeerEngine`].
pub struct MockEngineHandle {
    job_id: String,
    torrents: Torrents,
    next_error: Arc<RwLock<Option<EngineError>>>,
    save_path: PathBuf,
}

impl MockEngineHandle {
    async fn take_error(&self) -> Result<(), EngineError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update<T>(&self, f: impl FnOnce(&mut MockTorrent) -> T) -> Result<T, EngineError> {
        self.take_error().await?;
        let mut torrents = self.torrents.write().await;
        match torrents.get_mut(&self.job_id) {
            Some(torrent) if torrent.removed.is_none() => Ok(f(torrent)),
            _ => Err(EngineError::TorrentNotFound(self.job_id.clone())),
        }
    }
}

#[async_trait]
impl EngineHandle for MockEngineHandle {
    fn id(&self) -> Option<String> {
        Some(format!("mock-{}", self.job_id))
    }

    async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.update(|t| t.status.clone()).await
    }

    async fn metadata(&self) -> Result<Option<TorrentMetadata>, EngineError> {
        self.update(|t| t.metadata.clone()).await
    }

    async fn set_file_priorities(
        &self,
        priorities: &[(usize, FilePriority)],
    ) -> Result<(), EngineError> {
        self.update(|t| {
            let count = t.metadata.as_ref().map(|m| m.files.len()).unwrap_or(0);
            if let Some((index, _)) = priorities.iter().find(|(i, _)| *i >= count) {
                return Err(EngineError::InvalidFileIndex {
                    index: *index,
                    count,
                });
            }
            t.priorities.extend(priorities.iter().copied());
            t.priority_calls += 1;
            Ok(())
        })
        .await?
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.update(|t| {
            t.pause_calls += 1;
            if !t.status.state.is_complete() && t.status.state != EngineState::Error {
                t.status.state = EngineState::Paused;
            }
        })
        .await
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.update(|t| {
            t.resume_calls += 1;
            if t.status.state == EngineState::Paused {
                t.status.state = EngineState::Downloading;
            }
        })
        .await
    }

    async fn remove(&self, delete_files: bool) -> Result<(), EngineError> {
        self.update(|t| t.removed = Some(delete_files)).await
    }

    fn save_path(&self) -> PathBuf {
        self.save_path.clone()
    }
}
