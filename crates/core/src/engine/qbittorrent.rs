//! qBittorrent engine backend (WebUI API v2).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::descriptor::parse_torrent_file;
use super::magnet::parse_magnet;
use super::{
    AddTorrentRequest, EngineError, EngineHandle, EngineState, EngineStatus, PeerEngine,
    QBittorrentConfig, TorrentFile, TorrentMetadata, TorrentSource,
};
use crate::job::FilePriority;
use crate::progress::PieceBitfield;

/// Authenticated access to the WebUI API, shared by every handle.
struct QBittorrentApi {
    client: Client,
    config: QBittorrentConfig,
    /// Set once logged in; the session cookie itself lives in the cookie jar.
    authenticated: RwLock<bool>,
}

impl QBittorrentApi {
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    async fn login(&self) -> Result<(), EngineError> {
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/api/v2/auth/login"))
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(EngineError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(EngineError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), EngineError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send a request, logging in again once if the session expired.
    async fn send<F>(&self, build: F) -> Result<String, EngineError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let mut response = build(&self.client).send().await.map_err(map_reqwest_error)?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;
            response = build(&self.client).send().await.map_err(map_reqwest_error)?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::TorrentNotFound(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(EngineError::ApiError(format!("HTTP {}", status)));
        }

        response.text().await.map_err(map_reqwest_error)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T, EngineError> {
        let url = self.url(endpoint);
        let body = self.send(|client| client.get(&url)).await?;
        serde_json::from_str(&body)
            .map_err(|e| EngineError::ApiError(format!("Failed to parse response: {}", e)))
    }

    async fn post_form(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<(), EngineError> {
        let url = self.url(endpoint);
        self.send(|client| client.post(&url).form(params)).await?;
        Ok(())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout
    } else if e.is_connect() {
        EngineError::ConnectionFailed(e.to_string())
    } else {
        EngineError::ApiError(e.to_string())
    }
}

/// qBittorrent engine.
pub struct QBittorrentEngine {
    api: Arc<QBittorrentApi>,
}

impl QBittorrentEngine {
    pub fn new(config: QBittorrentConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| EngineError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api: Arc::new(QBittorrentApi {
                client,
                config,
                authenticated: RwLock::new(false),
            }),
        })
    }

    /// Build one multipart form for `/torrents/add`.
    ///
    /// Multipart forms are consumed on send, so this is called per attempt.
    fn add_form(request: &AddTorrentRequest, save_path: Option<&str>) -> Result<multipart::Form, EngineError> {
        let mut form = match &request.source {
            TorrentSource::Magnet(uri) => multipart::Form::new().text("urls", uri.clone()),
            TorrentSource::TorrentFile { data, filename } => {
                let part = multipart::Part::bytes(data.clone())
                    .file_name(filename.clone().unwrap_or_else(|| "upload.torrent".to_string()))
                    .mime_str("application/x-bittorrent")
                    .map_err(|e| EngineError::InvalidTorrent(e.to_string()))?;
                multipart::Form::new().part("torrents", part)
            }
        };

        form = form.text("tags", request.job_id.clone());
        if let Some(path) = save_path {
            form = form.text("savepath", path.to_string());
        }
        if request.start_paused {
            // `paused` before qBittorrent 5, `stopped` after
            form = form.text("paused", "true").text("stopped", "true");
        }
        Ok(form)
    }
}

#[async_trait]
impl PeerEngine for QBittorrentEngine {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn add(&self, request: AddTorrentRequest) -> Result<Box<dyn EngineHandle>, EngineError> {
        let known_hash = match &request.source {
            TorrentSource::Magnet(uri) => Some(parse_magnet(uri)?.info_hash),
            TorrentSource::TorrentFile { data, .. } => Some(parse_torrent_file(data)?.info_hash),
        }
        // base32 magnets are reported as hex by qBittorrent; resolve those by tag
        .filter(|hash| hash.len() == 40);

        let save_path = request
            .download_path
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| self.api.config.download_path.clone());

        // Validate the form once up front so bad input fails before the request
        Self::add_form(&request, save_path.as_deref())?;

        let url = self.api.url("/api/v2/torrents/add");
        let body = self
            .api
            .send(|client| {
                let form = Self::add_form(&request, save_path.as_deref())
                    .unwrap_or_else(|_| multipart::Form::new());
                client.post(&url).multipart(form)
            })
            .await?;

        if body.contains("Fails.") {
            return Err(EngineError::ApiError(
                "qBittorrent rejected the torrent".to_string(),
            ));
        }

        debug!(job_id = %request.job_id, hash = ?known_hash, "Torrent added to qBittorrent");

        Ok(Box::new(QBittorrentHandle {
            api: Arc::clone(&self.api),
            tag: request.job_id,
            hash: Mutex::new(known_hash),
            save_path: Mutex::new(save_path.map(PathBuf::from).unwrap_or_default()),
        }))
    }
}

/// `/torrents/info` entry.
#[derive(Debug, Deserialize)]
struct QbTorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    upspeed: i64,
    #[serde(default)]
    num_seeds: i64,
    #[serde(default)]
    num_leechs: i64,
    #[serde(default)]
    save_path: String,
}

/// `/torrents/properties` subset.
#[derive(Debug, Deserialize)]
struct QbProperties {
    #[serde(default)]
    piece_size: i64,
}

/// `/torrents/files` entry.
#[derive(Debug, Deserialize)]
struct QbFile {
    name: String,
    size: i64,
}

/// Map a qBittorrent state string.
///
/// `pausedUP`/`stoppedUP` stay `Paused`: a torrent with every file skipped
/// looks complete to qBittorrent, and completion must only be seen once it
/// runs again.
fn parse_qb_state(state: &str) -> EngineState {
    match state {
        "metaDL" | "forcedMetaDL" => EngineState::FetchingMetadata,
        "downloading" | "forcedDL" | "allocating" | "stalledDL" | "queuedDL" => {
            EngineState::Downloading
        }
        "uploading" | "forcedUP" | "stalledUP" | "queuedUP" => EngineState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => EngineState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => EngineState::Checking,
        "error" | "missingFiles" => EngineState::Error,
        _ => EngineState::Downloading,
    }
}

/// qBittorrent's numeric file priorities.
fn qb_priority(priority: FilePriority) -> &'static str {
    match priority {
        FilePriority::Skip => "0",
        FilePriority::Normal => "1",
        FilePriority::High => "6",
    }
}

/// One torrent inside qBittorrent, tagged with its job id.
pub struct QBittorrentHandle {
    api: Arc<QBittorrentApi>,
    tag: String,
    hash: Mutex<Option<String>>,
    save_path: Mutex<PathBuf>,
}

impl QBittorrentHandle {
    fn cached_hash(&self) -> Option<String> {
        self.hash.lock().ok().and_then(|h| h.clone())
    }

    async fn resolve_hash(&self) -> Result<String, EngineError> {
        if let Some(hash) = self.cached_hash() {
            return Ok(hash);
        }

        let endpoint = format!(
            "/api/v2/torrents/info?tag={}",
            urlencoding::encode(&self.tag)
        );
        let torrents: Vec<QbTorrentInfo> = self.api.get_json(&endpoint).await?;
        let hash = torrents
            .into_iter()
            .next()
            .map(|t| t.hash.to_lowercase())
            .ok_or_else(|| EngineError::TorrentNotFound(self.tag.clone()))?;

        if let Ok(mut cached) = self.hash.lock() {
            *cached = Some(hash.clone());
        }
        Ok(hash)
    }

    async fn info(&self, hash: &str) -> Result<QbTorrentInfo, EngineError> {
        let torrents: Vec<QbTorrentInfo> = self
            .api
            .get_json(&format!("/api/v2/torrents/info?hashes={}", hash))
            .await?;
        torrents
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::TorrentNotFound(hash.to_string()))
    }
}

#[async_trait]
impl EngineHandle for QBittorrentHandle {
    fn id(&self) -> Option<String> {
        self.cached_hash()
    }

    async fn status(&self) -> Result<EngineStatus, EngineError> {
        let hash = self.resolve_hash().await?;
        let info = self.info(&hash).await?;

        if !info.save_path.is_empty() {
            if let Ok(mut path) = self.save_path.lock() {
                *path = PathBuf::from(&info.save_path);
            }
        }

        let state = parse_qb_state(&info.state);
        let pieces = if state == EngineState::FetchingMetadata {
            None
        } else {
            let states: Vec<i64> = self
                .api
                .get_json(&format!("/api/v2/torrents/pieceStates?hash={}", hash))
                .await?;
            Some(PieceBitfield::from_qbittorrent_states(&states))
        };

        Ok(EngineStatus {
            state,
            global_progress: info.progress,
            download_rate: info.dlspeed.max(0) as u64,
            upload_rate: info.upspeed.max(0) as u64,
            peers: info.num_leechs.max(0) as u32,
            seeds: info.num_seeds.max(0) as u32,
            pieces,
            file_bytes: None,
            error: (state == EngineState::Error)
                .then(|| format!("qBittorrent reports state '{}'", info.state)),
        })
    }

    async fn metadata(&self) -> Result<Option<TorrentMetadata>, EngineError> {
        let hash = self.resolve_hash().await?;
        let info = self.info(&hash).await?;
        if parse_qb_state(&info.state) == EngineState::FetchingMetadata {
            return Ok(None);
        }

        let files: Vec<QbFile> = self
            .api
            .get_json(&format!("/api/v2/torrents/files?hash={}", hash))
            .await?;
        if files.is_empty() {
            return Ok(None);
        }
        let properties: QbProperties = self
            .api
            .get_json(&format!("/api/v2/torrents/properties?hash={}", hash))
            .await?;

        let files: Vec<TorrentFile> = files
            .into_iter()
            .enumerate()
            .map(|(index, f)| TorrentFile {
                index,
                path: f.name,
                size: f.size.max(0) as u64,
                offset: 0,
            })
            .collect();

        Ok(Some(
            TorrentMetadata {
                name: info.name,
                info_hash: hash,
                total_size: files.iter().map(|f| f.size).sum(),
                piece_length: (properties.piece_size > 0).then_some(properties.piece_size as u64),
                files,
            }
            .with_sequential_offsets(),
        ))
    }

    async fn set_file_priorities(
        &self,
        priorities: &[(usize, FilePriority)],
    ) -> Result<(), EngineError> {
        let hash = self.resolve_hash().await?;

        for level in [FilePriority::Skip, FilePriority::Normal, FilePriority::High] {
            let ids: Vec<String> = priorities
                .iter()
                .filter(|(_, p)| *p == level)
                .map(|(i, _)| i.to_string())
                .collect();
            if ids.is_empty() {
                continue;
            }
            let ids = ids.join("|");
            self.api
                .post_form(
                    "/api/v2/torrents/filePrio",
                    &[("hash", &hash), ("id", &ids), ("priority", qb_priority(level))],
                )
                .await?;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        let hash = self.resolve_hash().await?;
        self.api
            .post_form("/api/v2/torrents/pause", &[("hashes", &hash)])
            .await
    }

    async fn resume(&self) -> Result<(), EngineError> {
        let hash = self.resolve_hash().await?;
        self.api
            .post_form("/api/v2/torrents/resume", &[("hashes", &hash)])
            .await
    }

    async fn remove(&self, delete_files: bool) -> Result<(), EngineError> {
        let hash = self.resolve_hash().await?;
        let delete = if delete_files { "true" } else { "false" };
        self.api
            .post_form(
                "/api/v2/torrents/delete",
                &[("hashes", &hash), ("deleteFiles", delete)],
            )
            .await
    }

    fn save_path(&self) -> PathBuf {
        self.save_path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}
