//! Mock transcoder for testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::transcoder::{SubJobStatus, TranscodeRequest, Transcoder, TranscoderError};

/// Bytes returned by default for every thumbnail.
pub const MOCK_THUMBNAIL: &[u8] = b"\xFF\xD8\xFFmock-jpeg";

#[derive(Debug, Default)]
struct State {
    /// Status sequence handed to each new sub-job. `None` means
    /// `processing(50)` then `completed` next to the input.
    sequence: Option<Vec<SubJobStatus>>,
    submit_error: Option<String>,
    thumbnail_error: Option<String>,
    thumbnail_delay: Duration,
    submissions: Vec<TranscodeRequest>,
    /// Remaining statuses per sub-job; the last one repeats.
    sub_jobs: HashMap<String, Vec<SubJobStatus>>,
    polls: HashMap<String, usize>,
    thumbnail_calls: usize,
    next_id: u64,
}

/// Mock implementation of the Transcoder trait.
///
/// Each submitted sub-job walks through a scripted status sequence, one
/// step per poll. Thumbnail calls are counted.
#[derive(Debug, Clone, Default)]
pub struct MockTranscoder {
    state: Arc<RwLock<State>>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses reported by every sub-job submitted from now on.
    pub async fn set_sequence(&self, sequence: Vec<SubJobStatus>) {
        self.state.write().await.sequence = Some(sequence);
    }

    pub async fn fail_submit(&self, message: &str) {
        self.state.write().await.submit_error = Some(message.to_string());
    }

    pub async fn fail_thumbnails(&self, message: &str) {
        self.state.write().await.thumbnail_error = Some(message.to_string());
    }

    pub async fn restore_thumbnails(&self) {
        self.state.write().await.thumbnail_error = None;
    }

    /// Make every thumbnail extraction take this long.
    pub async fn set_thumbnail_delay(&self, delay: Duration) {
        self.state.write().await.thumbnail_delay = delay;
    }

    pub async fn submissions(&self) -> Vec<TranscodeRequest> {
        self.state.read().await.submissions.clone()
    }

    pub async fn thumbnail_calls(&self) -> usize {
        self.state.read().await.thumbnail_calls
    }

    pub async fn polls(&self, sub_job_id: &str) -> usize {
        self.state
            .read()
            .await
            .polls
            .get(sub_job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Where a default sub-job claims to have written its output.
    pub fn default_output(input: &Path, format: &str) -> PathBuf {
        input.with_extension(format)
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, request: TranscodeRequest) -> Result<String, TranscoderError> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.submit_error {
            return Err(TranscoderError::Service(message.clone()));
        }

        let sub_job_id = match &request.sub_job_id {
            Some(id) => id.clone(),
            None => {
                state.next_id += 1;
                format!("mock_{}", state.next_id)
            }
        };
        if state
            .sub_jobs
            .get(&sub_job_id)
            .and_then(|s| s.last())
            .is_some_and(|s| !s.status.is_terminal())
        {
            return Err(TranscoderError::AlreadyRunning(sub_job_id));
        }

        let sequence = state.sequence.clone().unwrap_or_else(|| {
            vec![
                SubJobStatus::processing(50.0),
                SubJobStatus::completed(Self::default_output(
                    &request.input_path,
                    &request.output_format,
                )),
            ]
        });
        state.sub_jobs.insert(sub_job_id.clone(), sequence);
        state.submissions.push(request);
        Ok(sub_job_id)
    }

    async fn poll_status(&self, sub_job_id: &str) -> Result<SubJobStatus, TranscoderError> {
        let mut state = self.state.write().await;
        *state.polls.entry(sub_job_id.to_string()).or_default() += 1;

        let sequence = state
            .sub_jobs
            .get_mut(sub_job_id)
            .ok_or_else(|| TranscoderError::UnknownSubJob(sub_job_id.to_string()))?;
        let status = if sequence.len() > 1 {
            sequence.remove(0)
        } else {
            sequence
                .first()
                .cloned()
                .unwrap_or_else(SubJobStatus::pending)
        };
        Ok(status)
    }

    async fn extract_thumbnail(
        &self,
        input_path: &Path,
        _timestamp_secs: u64,
    ) -> Result<Vec<u8>, TranscoderError> {
        let (delay, error) = {
            let mut state = self.state.write().await;
            state.thumbnail_calls += 1;
            (state.thumbnail_delay, state.thumbnail_error.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !input_path.exists() {
            return Err(TranscoderError::InputNotFound {
                path: input_path.to_path_buf(),
            });
        }
        match error {
            Some(message) => Err(TranscoderError::ThumbnailFailed(message)),
            None => Ok(MOCK_THUMBNAIL.to_vec()),
        }
    }
}
