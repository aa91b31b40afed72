use std::sync::Arc;

use tracing::debug;

use super::JobError;
use crate::job::{Job, JobCategory, JobPatch, JobStatus, JobStore};
use crate::metrics;
use crate::notify::Fanout;

/// The single writer of one job's record.
///
/// Owned by the job's monitoring task. Every write goes through the store
/// (which publishes on the per-job channel) and then through the fanout.
/// Illegal status transitions are refused before they reach the store.
pub struct JobWriter {
    job_id: String,
    category: JobCategory,
    status: JobStatus,
    store: Arc<dyn JobStore>,
    fanout: Fanout,
}

impl JobWriter {
    pub fn new(job: &Job, store: Arc<dyn JobStore>, fanout: Fanout) -> Self {
        Self {
            job_id: job.id.clone(),
            category: job.category,
            status: job.status,
            store,
            fanout,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn category(&self) -> JobCategory {
        self.category
    }

    /// Last status written.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Write fields without changing status.
    pub async fn update(&mut self, mut patch: JobPatch) -> Result<Job, JobError> {
        patch.status = None;
        self.write(patch).await
    }

    /// Move to `next`, writing `patch` in the same record update.
    pub async fn transition(&mut self, next: JobStatus, patch: JobPatch) -> Result<Job, JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidState(format!(
                "cannot move job {} from {} to {}",
                self.job_id, self.status, next
            )));
        }
        let job = self.write(patch.with_status(next)).await?;
        if next.is_terminal() {
            metrics::JOBS_FINISHED
                .with_label_values(&[self.category.as_str(), next.as_str()])
                .inc();
        }
        Ok(job)
    }

    /// Record a failure. Progress is left where it was.
    pub async fn fail(&mut self, reason: impl Into<String>) -> Result<Job, JobError> {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "unknown error".to_string()
        } else {
            reason
        };
        self.transition(JobStatus::Failed, JobPatch::new().with_error(reason))
            .await
    }

    async fn write(&mut self, patch: JobPatch) -> Result<Job, JobError> {
        let job = self.store.put(&self.job_id, patch)?;
        if job.status != self.status {
            debug!(job_id = %self.job_id, from = %self.status, to = %job.status, "Job status changed");
        }
        self.status = job.status;
        self.fanout.write(&job).await;
        Ok(job)
    }
}
