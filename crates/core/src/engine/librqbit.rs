//! librqbit embedded engine backend.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use librqbit::{
    AddTorrent as RqbitAddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session,
    SessionOptions, SessionPersistenceConfig, TorrentStatsState,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AddTorrentRequest, EngineError, EngineHandle, EngineState, EngineStatus, LibrqbitConfig,
    PeerEngine, TorrentFile, TorrentMetadata, TorrentSource,
};
use crate::job::FilePriority;

/// Embedded librqbit engine.
pub struct LibrqbitEngine {
    session: Arc<Session>,
    download_path: PathBuf,
}

impl LibrqbitEngine {
    /// Start a librqbit session from configuration.
    pub async fn new(config: &LibrqbitConfig) -> Result<Self, EngineError> {
        let download_path = PathBuf::from(&config.download_path);

        std::fs::create_dir_all(&download_path).map_err(|e| {
            EngineError::ConnectionFailed(format!("Failed to create download directory: {}", e))
        })?;

        let mut opts = SessionOptions::default();

        if !config.enable_dht {
            opts.disable_dht = true;
        }

        // Range, not RangeInclusive
        if let Some(port) = config.listen_port {
            opts.listen_port_range = Some(port..(port + 1));
        }

        if let Some(ref persistence_path) = config.persistence_path {
            let persistence_dir = PathBuf::from(persistence_path);
            std::fs::create_dir_all(&persistence_dir).map_err(|e| {
                EngineError::ConnectionFailed(format!(
                    "Failed to create persistence directory: {}",
                    e
                ))
            })?;
            opts.persistence = Some(SessionPersistenceConfig::Json {
                folder: Some(persistence_dir),
            });
        }

        info!(
            download_path = %download_path.display(),
            dht_enabled = !opts.disable_dht,
            "Initializing librqbit session"
        );

        let session = Session::new_with_opts(download_path.clone(), opts)
            .await
            .map_err(|e| {
                EngineError::ConnectionFailed(format!(
                    "Failed to initialize librqbit session: {}",
                    e
                ))
            })?;

        if let Some(port) = session.tcp_listen_port() {
            info!(port = port, "librqbit listening on TCP port");
        }

        Ok(Self {
            session,
            download_path,
        })
    }
}

#[async_trait]
impl PeerEngine for LibrqbitEngine {
    fn name(&self) -> &str {
        "librqbit"
    }

    /// Hand the torrent to the session and return at once.
    ///
    /// The session resolves magnet metadata inside `add_torrent`, so that call
    /// runs in the background; until it returns the handle reports
    /// `FetchingMetadata`.
    async fn add(&self, request: AddTorrentRequest) -> Result<Box<dyn EngineHandle>, EngineError> {
        let add_torrent = match request.source {
            TorrentSource::Magnet(ref uri) => RqbitAddTorrent::from_url(uri.clone()),
            TorrentSource::TorrentFile { ref data, .. } => RqbitAddTorrent::from_bytes(data.clone()),
        };

        // One folder per job keeps file paths unambiguous
        let output_folder = request
            .download_path
            .clone()
            .unwrap_or_else(|| self.download_path.join(&request.job_id));

        // Metadata is resolved before the torrent starts, so it can always
        // be added paused; the monitoring task resumes it on selection
        let opts = AddTorrentOptions {
            paused: true,
            output_folder: Some(output_folder.display().to_string()),
            ..Default::default()
        };

        let added = Arc::new(Mutex::new(Added::Resolving));
        let adding = {
            let session = Arc::clone(&self.session);
            let added = Arc::clone(&added);
            let job_id = request.job_id.clone();
            tokio::spawn(async move {
                let outcome = match session.add_torrent(add_torrent, Some(opts)).await {
                    Ok(AddTorrentResponse::Added(_, handle)) => Added::Ready(handle),
                    Ok(AddTorrentResponse::AlreadyManaged(_, handle)) => {
                        warn!(job_id = %job_id, "Torrent already managed by librqbit");
                        Added::Ready(handle)
                    }
                    Ok(AddTorrentResponse::ListOnly(_)) => {
                        Added::Failed("Torrent was added in list-only mode".to_string())
                    }
                    Err(e) => Added::Failed(format!("Failed to add torrent: {}", e)),
                };
                match &outcome {
                    Added::Ready(handle) => {
                        debug!(job_id = %job_id, hash = %handle.info_hash().as_string(), "Torrent added to librqbit")
                    }
                    Added::Failed(reason) => warn!(job_id = %job_id, error = %reason, "librqbit add failed"),
                    Added::Resolving => {}
                }
                if let Ok(mut slot) = added.lock() {
                    *slot = outcome;
                }
            })
        };

        Ok(Box::new(LibrqbitHandle {
            session: Arc::clone(&self.session),
            added,
            adding,
            save_path: output_folder,
            priorities: Mutex::new(Vec::new()),
        }))
    }
}

/// Where a torrent handed to the session stands.
enum Added {
    /// `add_torrent` has not returned yet.
    Resolving,
    Ready(Arc<ManagedTorrent>),
    Failed(String),
}

/// One torrent inside the librqbit session.
///
/// Dropping the handle abandons an add that is still resolving.
pub struct LibrqbitHandle {
    session: Arc<Session>,
    added: Arc<Mutex<Added>>,
    adding: JoinHandle<()>,
    save_path: PathBuf,
    /// Last priorities applied, by file index.
    priorities: Mutex<Vec<FilePriority>>,
}

impl LibrqbitHandle {
    /// librqbit only knows included/excluded, so priorities collapse to a set.
    fn selected_set(priorities: &[FilePriority]) -> HashSet<usize> {
        priorities
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_selected())
            .map(|(i, _)| i)
            .collect()
    }

    /// The session's torrent, once the add has gone through.
    fn ready(&self) -> Result<Option<Arc<ManagedTorrent>>, EngineError> {
        let added = self
            .added
            .lock()
            .map_err(|_| EngineError::Internal("torrent state poisoned".to_string()))?;
        match &*added {
            Added::Resolving => Ok(None),
            Added::Ready(torrent) => Ok(Some(Arc::clone(torrent))),
            Added::Failed(reason) => Err(EngineError::ApiError(reason.clone())),
        }
    }

    /// Like [`ready`](Self::ready), for calls that need the torrent itself.
    fn torrent(&self) -> Result<Arc<ManagedTorrent>, EngineError> {
        self.ready()?.ok_or_else(|| {
            EngineError::Internal("torrent metadata is still being resolved".to_string())
        })
    }
}

impl Drop for LibrqbitHandle {
    fn drop(&mut self) {
        self.adding.abort();
    }
}

/// Status reported before the session returned a torrent.
fn unresolved_status(failure: Option<&str>) -> EngineStatus {
    match failure {
        None => EngineStatus::new(EngineState::FetchingMetadata),
        Some(reason) => {
            let mut status = EngineStatus::new(EngineState::Error);
            status.error = Some(reason.to_string());
            status
        }
    }
}

fn map_state(state: &TorrentStatsState, finished: bool, has_error: bool) -> EngineState {
    if has_error {
        return EngineState::Error;
    }
    match state {
        TorrentStatsState::Initializing => EngineState::Checking,
        TorrentStatsState::Live if finished => EngineState::Seeding,
        TorrentStatsState::Live => EngineState::Downloading,
        TorrentStatsState::Paused => EngineState::Paused,
        TorrentStatsState::Error => EngineState::Error,
    }
}

#[async_trait]
impl EngineHandle for LibrqbitHandle {
    fn id(&self) -> Option<String> {
        match self.ready() {
            Ok(Some(torrent)) => Some(torrent.info_hash().as_string()),
            _ => None,
        }
    }

    async fn status(&self) -> Result<EngineStatus, EngineError> {
        let torrent = match self.ready() {
            Ok(Some(torrent)) => torrent,
            Ok(None) => return Ok(unresolved_status(None)),
            Err(EngineError::ApiError(reason)) => return Ok(unresolved_status(Some(&reason))),
            Err(e) => return Err(e),
        };
        let stats = torrent.stats();

        let state = map_state(&stats.state, stats.finished, stats.error.is_some());
        let global_progress = if stats.total_bytes > 0 {
            stats.progress_bytes as f64 / stats.total_bytes as f64
        } else {
            0.0
        };

        let (download_rate, upload_rate, peers) = stats
            .live
            .as_ref()
            .map(|live| {
                // `mbps` is actually MiB/s
                let dl = (live.download_speed.mbps * 1024.0 * 1024.0) as u64;
                let ul = (live.upload_speed.mbps * 1024.0 * 1024.0) as u64;
                (dl, ul, live.snapshot.peer_stats.live as u32)
            })
            .unwrap_or((0, 0, 0));

        Ok(EngineStatus {
            state,
            global_progress,
            download_rate,
            upload_rate,
            peers,
            // librqbit does not tell seeds from leechers
            seeds: 0,
            pieces: None,
            file_bytes: Some(stats.file_progress.clone()),
            error: stats.error.clone(),
        })
    }

    async fn metadata(&self) -> Result<Option<TorrentMetadata>, EngineError> {
        let Some(torrent) = self.ready()? else {
            return Ok(None);
        };
        let hash = torrent.info_hash().as_string();
        let files = torrent.with_metadata(|meta| {
            meta.file_infos
                .iter()
                .enumerate()
                .map(|(index, file)| TorrentFile {
                    index,
                    path: file.relative_filename.to_string_lossy().into_owned(),
                    size: file.len,
                    offset: file.offset_in_torrent,
                })
                .collect::<Vec<_>>()
        });

        let Ok(files) = files else {
            return Ok(None);
        };

        Ok(Some(TorrentMetadata {
            name: torrent
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("torrent-{}", &hash[..8.min(hash.len())])),
            info_hash: hash.clone(),
            total_size: files.iter().map(|f| f.size).sum(),
            piece_length: None,
            files,
        }))
    }

    async fn set_file_priorities(
        &self,
        priorities: &[(usize, FilePriority)],
    ) -> Result<(), EngineError> {
        let selected = {
            let mut cache = self
                .priorities
                .lock()
                .map_err(|_| EngineError::Internal("priority cache poisoned".to_string()))?;
            for (index, priority) in priorities {
                if cache.len() <= *index {
                    cache.resize(index + 1, FilePriority::Skip);
                }
                cache[*index] = *priority;
            }
            Self::selected_set(&cache)
        };

        // librqbit cannot exclude every file; the torrent stays paused instead
        if selected.is_empty() {
            return Ok(());
        }

        let torrent = self.torrent()?;
        self.session
            .update_only_files(&torrent, &selected)
            .await
            .map_err(|e| EngineError::ApiError(format!("Failed to update file selection: {}", e)))
    }

    async fn pause(&self) -> Result<(), EngineError> {
        let torrent = self.torrent()?;
        // The session refuses to pause a paused torrent
        if matches!(torrent.stats().state, TorrentStatsState::Paused) {
            return Ok(());
        }
        self.session
            .pause(&torrent)
            .await
            .map_err(|e| EngineError::ApiError(format!("Failed to pause torrent: {}", e)))
    }

    async fn resume(&self) -> Result<(), EngineError> {
        let torrent = self.torrent()?;
        if !matches!(torrent.stats().state, TorrentStatsState::Paused) {
            return Ok(());
        }
        self.session
            .unpause(&torrent)
            .await
            .map_err(|e| EngineError::ApiError(format!("Failed to resume torrent: {}", e)))
    }

    async fn remove(&self, delete_files: bool) -> Result<(), EngineError> {
        self.adding.abort();
        let torrent = match self.ready() {
            Ok(Some(torrent)) => torrent,
            // Nothing reached the session
            Ok(None) | Err(EngineError::ApiError(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.session
            .delete(torrent.id().into(), delete_files)
            .await
            .map_err(|e| EngineError::ApiError(format!("Failed to remove torrent: {}", e)))?;
        debug!(hash = %torrent.info_hash().as_string(), delete_files = delete_files, "Torrent removed");
        Ok(())
    }

    fn save_path(&self) -> PathBuf {
        self.save_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(
            map_state(&TorrentStatsState::Initializing, false, false),
            EngineState::Checking
        );
        assert_eq!(
            map_state(&TorrentStatsState::Live, false, false),
            EngineState::Downloading
        );
        assert_eq!(
            map_state(&TorrentStatsState::Live, true, false),
            EngineState::Seeding
        );
        assert_eq!(
            map_state(&TorrentStatsState::Paused, true, false),
            EngineState::Paused
        );
        assert_eq!(
            map_state(&TorrentStatsState::Live, false, true),
            EngineState::Error
        );
    }

    #[test]
    fn test_unresolved_status() {
        let resolving = unresolved_status(None);
        assert_eq!(resolving.state, EngineState::FetchingMetadata);
        assert!(resolving.error.is_none());

        let failed = unresolved_status(Some("Failed to add torrent: no peers"));
        assert_eq!(failed.state, EngineState::Error);
        assert_eq!(failed.error.as_deref(), Some("Failed to add torrent: no peers"));
    }

    #[test]
    fn test_selected_set() {
        let priorities = [
            FilePriority::Skip,
            FilePriority::High,
            FilePriority::Normal,
            FilePriority::Skip,
        ];
        let selected = LibrqbitHandle::selected_set(&priorities);
        assert_eq!(selected, HashSet::from([1, 2]));
    }
}
