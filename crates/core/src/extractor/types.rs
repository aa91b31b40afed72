//! Types for the media extractor.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::progress::{byte_progress, ByteTotal};

/// Errors from the link/media extractor.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Extractor binary not found at path: {path}")]
    BinaryNotFound { path: PathBuf },

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("Metadata extraction failed: {0}")]
    MetadataFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Extractor timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Thumbnail fetch failed: {0}")]
    ThumbnailFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One format offered by the remote site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
}

/// What the extractor knows about a URL before downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
}

/// Download of one URL on behalf of a job.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub job_id: String,
    pub url: String,
    /// Extractor format selector; the configured default when `None`.
    pub format: Option<String>,
    pub output_dir: PathBuf,
}

/// Byte counters of a running download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    /// The extractor finished writing; post-processing may still run.
    pub finished: bool,
}

/// Reported while the extractor has finished but the job has not.
pub const FINISHED_PROGRESS: f64 = 99.0;

impl TransferProgress {
    pub fn total(&self) -> ByteTotal {
        ByteTotal::from_parts(self.total_bytes, self.total_bytes_estimate)
    }

    pub fn percent(&self) -> f64 {
        if self.finished {
            FINISHED_PROGRESS
        } else {
            byte_progress(self.downloaded_bytes, self.total())
        }
    }
}

/// A link/media extractor backend.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, ExtractorError>;

    /// Download the media, publishing byte counters into `progress`.
    ///
    /// Returns the path of the downloaded file.
    async fn download(
        &self,
        request: DownloadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<PathBuf, ExtractorError>;

    /// Fetch a remote thumbnail image.
    async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, ExtractorError>;
}
