//! Monitoring task of a simple transfer through the media extractor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::command::JobCommand;
use super::task::{JobTask, TaskEvent, TaskExit};
use crate::extractor::{DownloadRequest, ExtractorError, MediaMetadata, TransferProgress};
use crate::job::{JobPatch, JobStatus};
use crate::metrics;
use crate::pipeline::{Completion, ThumbnailTrigger};

/// What a simple transfer was submitted with.
#[derive(Debug, Clone)]
pub(crate) struct TransferPlan {
    pub url: String,
    /// Extractor format selector.
    pub format: Option<String>,
    pub target_format: Option<String>,
}

pub(crate) async fn run(mut task: JobTask, plan: TransferPlan) {
    let result = drive(&mut task, plan).await;
    task.finish(result).await;
}

async fn drive(task: &mut JobTask, plan: TransferPlan) -> Result<(), TaskExit> {
    let job_id = task.job_id().to_string();
    let extractor = Arc::clone(&task.ctx.collaborators.extractor);

    let metadata = {
        let _timer = metrics::time_call(extractor.name(), "metadata");
        extractor.fetch_metadata(&plan.url).await?
    };
    info!(job_id = %job_id, title = %metadata.title, "Media metadata received");

    let mut patch = JobPatch::new().with_name(metadata.title.clone());
    if let Some(reference) = remote_thumbnail(task, &metadata).await {
        patch = patch.with_thumbnail(reference);
    }
    task.writer.update(patch).await?;

    task.writer
        .transition(JobStatus::Transferring, JobPatch::new().with_progress(0.0))
        .await?;

    let output_dir = task.ctx.settings.downloads_dir.clone();
    let request = DownloadRequest {
        job_id: job_id.clone(),
        url: plan.url.clone(),
        format: plan.format.clone(),
        output_dir: output_dir.clone(),
    };
    let (progress_tx, progress_rx) = watch::channel(TransferProgress::default());
    let mut download = DownloadTask(tokio::spawn(async move {
        let _timer = metrics::time_call(extractor.name(), "download");
        extractor.download(request, progress_tx).await
    }));

    let mut ticker = tokio::time::interval(task.ctx.settings.transfer_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_progress: Option<f64> = None;

    loop {
        tokio::select! {
            biased;
            joined = &mut download.0 => {
                let path = match joined {
                    Ok(result) => result?,
                    Err(e) => return Err(TaskExit::Failed(format!("download task aborted: {}", e))),
                };
                info!(job_id = %job_id, path = %path.display(), "Download finished");
                task.artifacts.push(path.clone());
                let ctx = Arc::clone(&task.ctx);
                return ctx
                    .pipeline
                    .complete(
                        task,
                        Completion {
                            output_path: path.clone(),
                            media_files: vec![path.clone()],
                            convert_input: Some(path),
                            target_format: plan.target_format,
                        },
                    )
                    .await;
            }
            event = task.next_event(&mut ticker) => match event {
                TaskEvent::Tick => {
                    let progress = progress_rx.borrow().percent();
                    if last_progress != Some(progress) {
                        task.writer
                            .update(JobPatch::new().with_progress(progress))
                            .await?;
                        last_progress = Some(progress);
                    }
                }
                TaskEvent::Command(JobCommand::Remove { delete_files, reply }) => {
                    download.0.abort();
                    let _ = (&mut download.0).await;
                    if delete_files {
                        task.artifacts.extend(job_files(&output_dir, &job_id).await);
                    }
                    return Err(task.remove(delete_files, reply).await);
                }
                TaskEvent::Command(other) => task.reject(other),
            },
        }
    }
}

/// The extractor's download, aborted when the monitoring task lets go of it.
///
/// The spawned task owns the extractor's child process, so aborting it is
/// what stops the process.
struct DownloadTask(JoinHandle<Result<PathBuf, ExtractorError>>);

impl Drop for DownloadTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cache the extractor's remote thumbnail, falling back to its URL.
async fn remote_thumbnail(task: &JobTask, metadata: &MediaMetadata) -> Option<String> {
    let url = metadata.thumbnail_url.as_deref()?;
    let extractor = &task.ctx.collaborators.extractor;
    let trigger = ThumbnailTrigger::Remote.as_str();

    let cached = match extractor.fetch_thumbnail(url).await {
        Ok(bytes) => task
            .ctx
            .pipeline
            .persist_thumbnail(task.job_id(), &bytes)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match cached {
        Ok(reference) => {
            task.thumbnails.mark_done();
            metrics::THUMBNAILS_GENERATED
                .with_label_values(&[trigger, "success"])
                .inc();
            Some(reference)
        }
        Err(e) => {
            metrics::THUMBNAILS_GENERATED
                .with_label_values(&[trigger, "failed"])
                .inc();
            warn!(job_id = %task.job_id(), error = %e, "Could not cache remote thumbnail, using its URL");
            Some(url.to_string())
        }
    }
}

/// Files the extractor wrote for `job_id`, partial ones included.
async fn job_files(dir: &Path, job_id: &str) -> Vec<PathBuf> {
    let prefix = format!("{}_", job_id);
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            found.push(entry.path());
        }
    }
    debug!(job_id, files = found.len(), "Collected partial download files");
    found
}
