//! Client for a remote converter service.
//!
//! The service exposes `POST /convert`, `GET /status/{id}` and
//! `POST /thumbnail`. Thumbnails are written by the service onto shared
//! storage and read back from the returned path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::HttpTranscoderConfig;
use super::types::{SubJobState, SubJobStatus, TranscodeRequest, Transcoder, TranscoderError};

#[derive(Debug, Serialize)]
struct ConvertBody<'a> {
    input_path: &'a Path,
    output_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailResponse {
    thumbnail_path: String,
}

impl From<StatusResponse> for SubJobStatus {
    fn from(r: StatusResponse) -> Self {
        SubJobStatus {
            status: SubJobState::parse(&r.status),
            progress: r.progress.clamp(0.0, 100.0),
            output_path: r.output_path.filter(|p| !p.is_empty()).map(PathBuf::from),
            error: r.error.filter(|e| !e.is_empty()),
        }
    }
}

/// Formats seconds as `HH:MM:SS`.
fn format_timestamp(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Transcoder backed by a remote HTTP service.
pub struct HttpTranscoder {
    client: Client,
    base_url: String,
}

impl HttpTranscoder {
    pub fn new(config: &HttpTranscoderConfig) -> Result<Self, TranscoderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranscoderError::Service(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn service_error(response: reqwest::Response) -> TranscoderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        TranscoderError::Service(format!("HTTP {}: {}", status, body.trim()))
    }
}

fn request_error(e: reqwest::Error) -> TranscoderError {
    TranscoderError::Service(e.to_string())
}

#[async_trait]
impl Transcoder for HttpTranscoder {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: TranscodeRequest) -> Result<String, TranscoderError> {
        let body = ConvertBody {
            input_path: &request.input_path,
            output_format: &request.output_format,
            job_id: request.sub_job_id.as_deref(),
        };

        let response = self
            .client
            .post(self.url("/convert"))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            s if s.is_success() => {
                let parsed: ConvertResponse = response.json().await.map_err(request_error)?;
                debug!(sub_job_id = %parsed.job_id, "Remote conversion accepted");
                Ok(parsed.job_id)
            }
            StatusCode::NOT_FOUND => Err(TranscoderError::InputNotFound {
                path: request.input_path,
            }),
            _ => Err(Self::service_error(response).await),
        }
    }

    async fn poll_status(&self, sub_job_id: &str) -> Result<SubJobStatus, TranscoderError> {
        let response = self
            .client
            .get(self.url(&format!("/status/{}", urlencoding::encode(sub_job_id))))
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            s if s.is_success() => {
                let parsed: StatusResponse = response.json().await.map_err(request_error)?;
                Ok(parsed.into())
            }
            StatusCode::NOT_FOUND => Err(TranscoderError::UnknownSubJob(sub_job_id.to_string())),
            _ => Err(Self::service_error(response).await),
        }
    }

    async fn extract_thumbnail(
        &self,
        input_path: &Path,
        timestamp_secs: u64,
    ) -> Result<Vec<u8>, TranscoderError> {
        let input = input_path.to_string_lossy().to_string();
        let response = self
            .client
            .post(self.url("/thumbnail"))
            .query(&[
                ("input_path", input.as_str()),
                ("time", format_timestamp(timestamp_secs).as_str()),
            ])
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TranscoderError::InputNotFound {
                path: input_path.to_path_buf(),
            });
        }
        if !response.status().is_success() {
            let err = Self::service_error(response).await;
            return Err(TranscoderError::ThumbnailFailed(err.to_string()));
        }

        let parsed: ThumbnailResponse = response.json().await.map_err(request_error)?;
        let bytes = tokio::fs::read(&parsed.thumbnail_path).await?;
        // Service output is a temporary artifact
        let _ = tokio::fs::remove_file(&parsed.thumbnail_path).await;
        Ok(bytes)
    }
}
