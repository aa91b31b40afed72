//! Monitoring task of a direct conversion: `pending -> converting -> completed|failed`.

use std::path::PathBuf;
use std::sync::Arc;

use super::task::{JobTask, TaskExit};
use crate::job::{JobPatch, JobStatus};
use crate::pipeline::{ConversionOutcome, ThumbnailTrigger};

pub(crate) async fn run(mut task: JobTask, input: PathBuf, format: String) {
    let result = drive(&mut task, input, format).await;
    task.finish(result).await;
}

async fn drive(task: &mut JobTask, input: PathBuf, format: String) -> Result<(), TaskExit> {
    let job_id = task.job_id().to_string();
    let ctx = Arc::clone(&task.ctx);

    if let Some(reference) = ctx
        .pipeline
        .generate_thumbnail(
            &job_id,
            &task.thumbnails,
            std::slice::from_ref(&input),
            ThumbnailTrigger::Completion,
        )
        .await
    {
        task.writer
            .update(JobPatch::new().with_thumbnail(reference))
            .await?;
    }

    task.writer
        .transition(JobStatus::Converting, JobPatch::new().with_progress(0.0))
        .await?;

    match ctx.pipeline.convert(task, &input, &format).await? {
        ConversionOutcome::Completed(path) => {
            task.writer
                .transition(
                    JobStatus::Completed,
                    JobPatch::new()
                        .with_progress(100.0)
                        .with_output_path(path.to_string_lossy()),
                )
                .await?;
            Ok(())
        }
        // Nothing to fall back on
        ConversionOutcome::Failed(reason) => {
            Err(TaskExit::Failed(format!("conversion failed: {}", reason)))
        }
    }
}
