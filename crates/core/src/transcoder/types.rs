//! Types and trait for the transcoding collaborator.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while talking to a transcoder.
#[derive(Debug, Error)]
pub enum TranscoderError {
    /// Binary not found.
    #[error("Transcoder binary not found at path: {path}")]
    BinaryNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Unknown output format: {0}")]
    UnknownProfile(String),

    #[error("Unknown sub-job: {0}")]
    UnknownSubJob(String),

    #[error("Sub-job already running: {0}")]
    AlreadyRunning(String),

    #[error("Thumbnail extraction failed: {0}")]
    ThumbnailFailed(String),

    #[error("Transcoder timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Remote converter service unreachable or returned garbage.
    #[error("Transcoder service error: {0}")]
    Service(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of a transcoder sub-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubJobState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SubJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lenient parse for states reported by remote services.
    ///
    /// Anything unrecognised is treated as still pending.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "processing" | "running" => Self::Processing,
            "completed" | "done" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Snapshot of a sub-job as reported by `poll_status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubJobStatus {
    pub status: SubJobState,
    /// 0-100.
    pub progress: f64,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubJobStatus {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn processing(progress: f64) -> Self {
        Self {
            status: SubJobState::Processing,
            progress,
            ..Default::default()
        }
    }

    pub fn completed(output_path: PathBuf) -> Self {
        Self {
            status: SubJobState::Completed,
            progress: 100.0,
            output_path: Some(output_path),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SubJobState::Failed,
            progress: 0.0,
            output_path: None,
            error: Some(error.into()),
        }
    }
}

/// A conversion handed to the transcoder.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    /// Profile key or bare extension.
    pub output_format: String,
    /// Caller-chosen sub-job id; the backend generates one when `None`.
    pub sub_job_id: Option<String>,
}

impl TranscodeRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_format: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            output_format: output_format.into(),
            sub_job_id: None,
        }
    }

    pub fn with_sub_job_id(mut self, id: impl Into<String>) -> Self {
        self.sub_job_id = Some(id.into());
        self
    }
}

/// Sub-job id used when a transcode is spawned from a finished parent job.
pub fn derived_sub_job_id(parent_id: &str) -> String {
    format!("conv_{}", parent_id)
}

/// A transcoding backend.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Starts a conversion and returns its sub-job id.
    async fn submit(&self, request: TranscodeRequest) -> Result<String, TranscoderError>;

    async fn poll_status(&self, sub_job_id: &str) -> Result<SubJobStatus, TranscoderError>;

    /// Extracts a single JPEG frame at `timestamp_secs`.
    async fn extract_thumbnail(
        &self,
        input_path: &std::path::Path,
        timestamp_secs: u64,
    ) -> Result<Vec<u8>, TranscoderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_job_state_parse() {
        assert_eq!(SubJobState::parse("processing"), SubJobState::Processing);
        assert_eq!(SubJobState::parse("COMPLETED"), SubJobState::Completed);
        assert_eq!(SubJobState::parse("failed"), SubJobState::Failed);
        assert_eq!(SubJobState::parse("unknown"), SubJobState::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubJobState::Pending.is_terminal());
        assert!(!SubJobState::Processing.is_terminal());
        assert!(SubJobState::Completed.is_terminal());
        assert!(SubJobState::Failed.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let status = SubJobStatus::completed(PathBuf::from("/out/a.mp4"));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100.0);
    }

    #[test]
    fn test_derived_sub_job_id() {
        assert_eq!(derived_sub_job_id("abc"), "conv_abc");
    }
}
