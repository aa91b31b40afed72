//! Completion pipeline.
//!
//! Runs after the transfer itself finished: thumbnail first, then an
//! optional conversion watched until the sub-job ends. Both steps are
//! best-effort; the job completes either way.

mod conversion;
mod thumbnail;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::job::{JobPatch, JobStatus};
use crate::lifecycle::{JobTask, TaskExit};
use crate::metrics;
use crate::transcoder::Transcoder;

pub(crate) use conversion::ConversionOutcome;
pub use thumbnail::{is_media_file, select_candidate, ThumbnailClaim, ThumbnailGuard, MEDIA_EXTENSIONS};

/// URL prefix under which cached thumbnails are served.
pub const THUMBNAIL_URL_PREFIX: &str = "/api/thumbnails";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub thumbnail_min_bytes: u64,
    pub early_thumbnail_threshold_pct: f64,
    pub thumbnail_timestamp_secs: u64,
    pub thumbnails_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thumbnail_min_bytes: config.pipeline.thumbnail_min_bytes,
            early_thumbnail_threshold_pct: config.pipeline.early_thumbnail_threshold_pct,
            thumbnail_timestamp_secs: config.pipeline.thumbnail_timestamp_secs,
            thumbnails_dir: config.storage.thumbnails_dir(),
        }
    }
}

/// What triggered a thumbnail attempt; used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailTrigger {
    /// Transfer passed the early threshold.
    Early,
    /// Transfer finished.
    Completion,
    /// Remote image published by the extractor.
    Remote,
}

impl ThumbnailTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailTrigger::Early => "early",
            ThumbnailTrigger::Completion => "completion",
            ThumbnailTrigger::Remote => "remote",
        }
    }
}

/// Result of a finished transfer, handed to [`CompletionPipeline::complete`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Completion {
    /// What the job points at if nothing is converted.
    pub output_path: PathBuf,
    /// Thumbnail candidates, in file index order.
    pub media_files: Vec<PathBuf>,
    /// Input handed to the transcoder when a target format was requested.
    pub convert_input: Option<PathBuf>,
    pub target_format: Option<String>,
}

pub struct CompletionPipeline {
    transcoder: Arc<dyn Transcoder>,
    settings: PipelineSettings,
}

impl CompletionPipeline {
    pub fn new(transcoder: Arc<dyn Transcoder>, settings: PipelineSettings) -> Self {
        Self {
            transcoder,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Store image bytes as the job's thumbnail and return its reference.
    pub async fn persist_thumbnail(
        &self,
        job_id: &str,
        bytes: &[u8],
    ) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.settings.thumbnails_dir).await?;
        let file_name = format!("{}.jpg", job_id);
        tokio::fs::write(self.settings.thumbnails_dir.join(&file_name), bytes).await?;
        Ok(format!("{}/{}", THUMBNAIL_URL_PREFIX, file_name))
    }

    /// Cut a thumbnail from the first eligible candidate.
    ///
    /// Returns the thumbnail reference, or `None` when the guard was already
    /// taken, no candidate is ready, or extraction failed. An early trigger
    /// that reached the transcoder once never fires again.
    pub async fn generate_thumbnail(
        &self,
        job_id: &str,
        guard: &ThumbnailGuard,
        candidates: &[PathBuf],
        trigger: ThumbnailTrigger,
    ) -> Option<String> {
        if trigger == ThumbnailTrigger::Early && guard.early_attempted() {
            return None;
        }
        let claim = guard.try_claim()?;

        let Some(input) = select_candidate(candidates, self.settings.thumbnail_min_bytes).await
        else {
            debug!(job_id, trigger = trigger.as_str(), "No thumbnail candidate ready");
            return None;
        };
        if trigger == ThumbnailTrigger::Early {
            guard.mark_early_attempted();
        }

        let extracted = {
            let _timer = metrics::time_call(self.transcoder.name(), "thumbnail");
            self.transcoder
                .extract_thumbnail(&input, self.settings.thumbnail_timestamp_secs)
                .await
        };

        let result = match extracted {
            Ok(bytes) => self
                .persist_thumbnail(job_id, &bytes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(reference) => {
                claim.complete();
                metrics::THUMBNAILS_GENERATED
                    .with_label_values(&[trigger.as_str(), "success"])
                    .inc();
                info!(job_id, trigger = trigger.as_str(), "Thumbnail generated");
                Some(reference)
            }
            Err(e) => {
                metrics::THUMBNAILS_GENERATED
                    .with_label_values(&[trigger.as_str(), "failed"])
                    .inc();
                warn!(job_id, trigger = trigger.as_str(), error = %e, "Thumbnail generation failed");
                None
            }
        }
    }

    /// Thumbnail, optional conversion, then the terminal `completed` write.
    pub(crate) async fn complete(
        &self,
        task: &mut JobTask,
        completion: Completion,
    ) -> Result<(), TaskExit> {
        let job_id = task.job_id().to_string();

        if let Some(reference) = self
            .generate_thumbnail(
                &job_id,
                &task.thumbnails,
                &completion.media_files,
                ThumbnailTrigger::Completion,
            )
            .await
        {
            task.writer
                .update(JobPatch::new().with_thumbnail(reference))
                .await?;
        }

        let original = completion.output_path.to_string_lossy().to_string();

        let Some(format) = completion.target_format else {
            task.writer
                .transition(
                    JobStatus::Completed,
                    JobPatch::new().with_progress(100.0).with_output_path(original),
                )
                .await?;
            return Ok(());
        };

        let Some(input) = completion.convert_input else {
            task.writer
                .transition(
                    JobStatus::Completed,
                    JobPatch::new()
                        .with_progress(100.0)
                        .with_output_path(original)
                        .with_error("conversion skipped: no media file to convert"),
                )
                .await?;
            return Ok(());
        };

        task.writer
            .transition(JobStatus::Converting, JobPatch::new().with_progress(0.0))
            .await?;

        let patch = match self.convert(task, &input, &format).await? {
            ConversionOutcome::Completed(path) => JobPatch::new()
                .with_progress(100.0)
                .with_output_path(path.to_string_lossy()),
            ConversionOutcome::Failed(reason) => {
                warn!(job_id = %job_id, error = %reason, "Conversion failed, keeping original file");
                JobPatch::new()
                    .with_progress(100.0)
                    .with_output_path(original)
                    .with_error(format!("conversion failed: {}", reason))
            }
        };

        task.writer.transition(JobStatus::Completed, patch).await?;
        Ok(())
    }
}
