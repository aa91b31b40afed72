use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::error;

use super::context::JobContext;
use super::JobError;
use crate::job::{JobCategory, JobPatch, JobStatus};
use crate::metrics;

/// Run a monitoring task under supervision.
///
/// A panic inside `task` fails that job only. Whatever the outcome, the
/// job's registry entry is released afterwards.
pub(crate) fn spawn_supervised<F>(
    ctx: Arc<JobContext>,
    job_id: String,
    category: JobCategory,
    generation: u64,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::ACTIVE_TASKS.inc();
    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(task).await {
            if e.is_panic() {
                let message = panic_message(e.into_panic());
                error!(job_id = %job_id, panic = %message, "Monitoring task panicked");
                metrics::TASK_PANICS
                    .with_label_values(&[category.as_str()])
                    .inc();
                let reason = format!("internal error: {}", message);
                if let Err(e) = fail_record(&ctx, &job_id, &reason).await {
                    error!(job_id = %job_id, error = %e, "Failed to record task panic");
                }
            }
        }
        ctx.registry.remove(&job_id, generation);
        metrics::ACTIVE_TASKS.dec();
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "monitoring task panicked".to_string()
    }
}

/// Fail a record nobody is writing anymore.
///
/// Returns false when the record is gone or already terminal.
pub(crate) async fn fail_record(
    ctx: &JobContext,
    job_id: &str,
    reason: &str,
) -> Result<bool, JobError> {
    let Some(job) = ctx.store.get(job_id)? else {
        return Ok(false);
    };
    if job.status.is_terminal() {
        return Ok(false);
    }

    let job = ctx.store.put(
        job_id,
        JobPatch::new()
            .with_status(JobStatus::Failed)
            .with_error(reason),
    )?;
    metrics::JOBS_FINISHED
        .with_label_values(&[job.category.as_str(), JobStatus::Failed.as_str()])
        .inc();
    ctx.fanout.write(&job).await;
    Ok(true)
}
