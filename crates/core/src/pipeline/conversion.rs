use std::path::{Path, PathBuf};

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::CompletionPipeline;
use crate::job::JobPatch;
use crate::lifecycle::{JobTask, TaskExit};
use crate::metrics;
use crate::transcoder::{derived_sub_job_id, SubJobState, TranscodeRequest};

/// How a conversion sub-job ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConversionOutcome {
    Completed(PathBuf),
    Failed(String),
}

impl CompletionPipeline {
    /// Submit `input` for conversion and watch the sub-job until it ends.
    ///
    /// The sub-job id is recorded on the job and the sub-job's progress is
    /// mirrored onto it. Control requests keep being answered meanwhile.
    pub(crate) async fn convert(
        &self,
        task: &mut JobTask,
        input: &Path,
        format: &str,
    ) -> Result<ConversionOutcome, TaskExit> {
        let request = TranscodeRequest::new(input, format)
            .with_sub_job_id(derived_sub_job_id(task.job_id()));

        let submitted = {
            let _timer = metrics::time_call(self.transcoder.name(), "submit");
            self.transcoder.submit(request).await
        };
        let sub_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                warn!(job_id = %task.job_id(), error = %e, "Conversion submit failed");
                metrics::CONVERSIONS
                    .with_label_values(&["submit_failed"])
                    .inc();
                return Ok(ConversionOutcome::Failed(e.to_string()));
            }
        };

        info!(job_id = %task.job_id(), sub_job_id = %sub_id, format, "Conversion started");
        task.writer
            .update(
                JobPatch::new()
                    .with_derived_job_id(&sub_id)
                    .with_progress(0.0),
            )
            .await?;

        let mut ticker = tokio::time::interval(task.ctx.settings.conversion_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress: Option<f64> = None;

        loop {
            task.wait(&mut ticker).await?;

            let status = match self.transcoder.poll_status(&sub_id).await {
                Ok(status) => status,
                Err(e) => {
                    metrics::CONVERSIONS.with_label_values(&["failed"]).inc();
                    return Ok(ConversionOutcome::Failed(e.to_string()));
                }
            };

            match status.status {
                SubJobState::Completed => {
                    let Some(path) = status.output_path else {
                        metrics::CONVERSIONS.with_label_values(&["failed"]).inc();
                        return Ok(ConversionOutcome::Failed(
                            "conversion finished without an output file".to_string(),
                        ));
                    };
                    metrics::CONVERSIONS
                        .with_label_values(&["completed"])
                        .inc();
                    return Ok(ConversionOutcome::Completed(path));
                }
                SubJobState::Failed => {
                    metrics::CONVERSIONS.with_label_values(&["failed"]).inc();
                    return Ok(ConversionOutcome::Failed(
                        status
                            .error
                            .unwrap_or_else(|| "conversion failed".to_string()),
                    ));
                }
                SubJobState::Pending | SubJobState::Processing => {
                    if last_progress != Some(status.progress) {
                        task.writer
                            .update(JobPatch::new().with_progress(status.progress))
                            .await?;
                        last_progress = Some(status.progress);
                    }
                }
            }
        }
    }
}
