//! Job submission, query and control endpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use jobhub_core::{ConversionRequest, Job, TorrentRequest, TorrentSource, TransferRequest};

use super::error::ApiError;
use crate::state::AppState;

/// Default long-poll timeout of `GET /jobs/{id}/wait`.
const DEFAULT_WAIT_SECS: u64 = 30;
/// Upper bound of the long-poll timeout.
const MAX_WAIT_SECS: u64 = 300;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub url: String,
    /// Extractor format selector.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub target_format: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MagnetBody {
    pub uri: String,
    #[serde(default)]
    pub target_format: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranscodeBody {
    pub input_path: PathBuf,
    pub target_format: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
    pub files: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub delete_files: bool,
}

// ============================================================================
// Submission
// ============================================================================

pub async fn submit_transfer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TransferBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let request = TransferRequest {
        url: body.url,
        format: body.format,
        target_format: body.target_format,
        job_id: body.job_id,
    };
    let job = state.manager().submit_transfer(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn submit_magnet(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MagnetBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let request = TorrentRequest {
        source: TorrentSource::Magnet(body.uri),
        target_format: body.target_format,
        job_id: body.job_id,
    };
    let job = state.manager().submit_torrent(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Multipart upload: `file` (required), `target_format`, `job_id`.
pub async fn submit_torrent_file(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let form = read_torrent_form(multipart).await?;
    let request = TorrentRequest {
        source: TorrentSource::TorrentFile {
            data: form.data,
            filename: form.filename,
        },
        target_format: form.target_format,
        job_id: form.job_id,
    };
    let job = state.manager().submit_torrent(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn submit_transcode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TranscodeBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let request = ConversionRequest {
        input_path: body.input_path,
        target_format: body.target_format,
        job_id: body.job_id,
    };
    let job = state.manager().submit_conversion(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Fields of a `.torrent` upload form.
pub(crate) struct TorrentForm {
    pub data: Vec<u8>,
    pub filename: Option<String>,
    pub target_format: Option<String>,
    pub job_id: Option<String>,
}

pub(crate) async fn read_torrent_form(mut multipart: Multipart) -> Result<TorrentForm, ApiError> {
    let mut data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut target_format: Option<String> = None;
    let mut job_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
                data = Some(bytes.to_vec());
            }
            "target_format" => {
                if let Ok(text) = field.text().await {
                    if !text.is_empty() {
                        target_format = Some(text);
                    }
                }
            }
            "job_id" => {
                if let Ok(text) = field.text().await {
                    if !text.is_empty() {
                        job_id = Some(text);
                    }
                }
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::BadRequest("No torrent file provided".to_string()))?;
    Ok(TorrentForm {
        data,
        filename,
        target_format,
        job_id,
    })
}

// ============================================================================
// Queries
// ============================================================================

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.manager().list(query.prefix.as_deref())?))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.manager().get_status(&id)?))
}

/// Long-poll: the job's next write, or its current record on timeout.
pub async fn wait_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<Job>, ApiError> {
    let secs = query
        .timeout_secs
        .unwrap_or(DEFAULT_WAIT_SECS)
        .min(MAX_WAIT_SECS);
    let job = state
        .manager()
        .wait_for_change(&id, Duration::from_secs(secs))
        .await?;
    Ok(Json(job))
}

// ============================================================================
// Control
// ============================================================================

pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state.manager().delete(&id, query.delete_files).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn select_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SelectBody>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.manager().select_files(&id, body.files).await?))
}

pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.manager().pause(&id).await?))
}

pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.manager().resume(&id).await?))
}
