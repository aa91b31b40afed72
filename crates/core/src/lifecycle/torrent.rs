//! Monitoring task of a selective (peer-to-peer) transfer.
//!
//! `pending -> fetching_metadata -> awaiting_selection -> transferring <-> paused`,
//! then the completion pipeline. The engine is polled once per tick; control
//! requests are served between ticks.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::command::{JobCommand, Reply};
use super::task::{JobTask, TaskEvent, TaskExit};
use super::JobError;
use crate::engine::{EngineError, EngineHandle, EngineState, EngineStatus, TorrentMetadata};
use crate::job::{FilePriority, Job, JobPatch, JobStatus, PeerStats};
use crate::pipeline::{is_media_file, Completion, ThumbnailTrigger};
use crate::progress::{file_entries, job_progress};

/// What the task has learned from the engine so far.
#[derive(Default)]
struct TorrentState {
    metadata: Option<TorrentMetadata>,
    /// Indexed by file index.
    priorities: Vec<FilePriority>,
    last_status: Option<EngineStatus>,
}

enum Poll {
    Continue,
    Finished,
}

/// How a control request failed.
enum CommandFailure {
    /// Refused; the task carries on.
    Rejected(JobError),
    /// The engine call failed; the caller is told and the job fails.
    Engine(EngineError),
    /// The task must stop; the reply is dropped.
    Exit(TaskExit),
}

impl From<EngineError> for CommandFailure {
    fn from(e: EngineError) -> Self {
        CommandFailure::Engine(e)
    }
}

impl From<JobError> for CommandFailure {
    fn from(e: JobError) -> Self {
        CommandFailure::Exit(e.into())
    }
}

impl From<TaskExit> for CommandFailure {
    fn from(exit: TaskExit) -> Self {
        CommandFailure::Exit(exit)
    }
}

pub(crate) async fn run(mut task: JobTask, target_format: Option<String>) {
    let result = drive(&mut task, target_format).await;
    task.finish(result).await;
}

async fn drive(task: &mut JobTask, target_format: Option<String>) -> Result<(), TaskExit> {
    task.writer
        .transition(JobStatus::FetchingMetadata, JobPatch::new())
        .await?;

    let mut ticker = tokio::time::interval(task.ctx.settings.transfer_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = TorrentState::default();

    loop {
        match task.next_event(&mut ticker).await {
            TaskEvent::Command(cmd) => handle_command(task, &mut state, cmd).await?,
            TaskEvent::Tick => {
                if let Poll::Finished = poll(task, &mut state).await? {
                    return complete(task, &state, target_format).await;
                }
            }
        }
    }
}

fn engine_of(engine: &Option<Box<dyn EngineHandle>>) -> Result<&dyn EngineHandle, TaskExit> {
    engine
        .as_deref()
        .ok_or_else(|| TaskExit::Failed("engine handle lost".to_string()))
}

fn engine_failure(status: &EngineStatus) -> TaskExit {
    TaskExit::Failed(
        status
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "engine reported an error".to_string()),
    )
}

async fn poll(task: &mut JobTask, state: &mut TorrentState) -> Result<Poll, TaskExit> {
    match task.writer.status() {
        JobStatus::FetchingMetadata => {
            poll_metadata(task, state).await?;
            Ok(Poll::Continue)
        }
        JobStatus::Transferring => poll_transfer(task, state).await,
        JobStatus::AwaitingSelection | JobStatus::Paused => {
            poll_idle(task, state).await?;
            Ok(Poll::Continue)
        }
        _ => Ok(Poll::Continue),
    }
}

/// Keep watching the engine while nothing is supposed to move.
///
/// Progress is left alone; only engine errors and a lost handle matter here.
async fn poll_idle(task: &mut JobTask, state: &mut TorrentState) -> Result<(), TaskExit> {
    let status = engine_of(&task.engine)?.status().await?;
    if status.state == EngineState::Error {
        return Err(engine_failure(&status));
    }
    state.last_status = Some(status);
    Ok(())
}

async fn poll_metadata(task: &mut JobTask, state: &mut TorrentState) -> Result<(), TaskExit> {
    let handle = engine_of(&task.engine)?;

    let status = handle.status().await?;
    if status.state == EngineState::Error {
        return Err(engine_failure(&status));
    }

    let Some(metadata) = handle.metadata().await? else {
        return Ok(());
    };

    // Nothing is transferred until the caller picks files
    let priorities = vec![FilePriority::Skip; metadata.files.len()];
    let all_skipped: Vec<(usize, FilePriority)> = metadata
        .files
        .iter()
        .map(|f| (f.index, FilePriority::Skip))
        .collect();
    handle.set_file_priorities(&all_skipped).await?;
    handle.pause().await?;

    let files = file_entries(&metadata, &priorities, &status);
    info!(
        job_id = %task.job_id(),
        name = %metadata.name,
        files = files.len(),
        total_size = metadata.total_size,
        "Torrent metadata received"
    );

    task.writer
        .transition(
            JobStatus::AwaitingSelection,
            JobPatch::new()
                .with_name(metadata.name.clone())
                .with_files(files)
                .with_total_size(metadata.total_size)
                .with_progress(0.0),
        )
        .await?;

    state.metadata = Some(metadata);
    state.priorities = priorities;
    state.last_status = Some(status);
    Ok(())
}

async fn poll_transfer(task: &mut JobTask, state: &mut TorrentState) -> Result<Poll, TaskExit> {
    let job_id = task.job_id().to_string();
    let handle = engine_of(&task.engine)?;

    let status = handle.status().await?;
    if status.state == EngineState::Error {
        return Err(engine_failure(&status));
    }
    let Some(metadata) = state.metadata.as_ref() else {
        return Err(TaskExit::Failed("transfer started without metadata".to_string()));
    };

    let files = file_entries(metadata, &state.priorities, &status);
    let progress = job_progress(&status);
    let peer = PeerStats {
        download_rate: status.download_rate,
        upload_rate: status.upload_rate,
        num_peers: status.peers,
        num_seeds: status.seeds,
    };

    if status.state.is_complete() {
        task.writer
            .update(JobPatch::new().with_files(files).with_peer(peer))
            .await?;
        state.last_status = Some(status);
        return Ok(Poll::Finished);
    }

    task.writer
        .update(
            JobPatch::new()
                .with_progress(progress)
                .with_files(files)
                .with_peer(peer),
        )
        .await?;

    let settings = task.ctx.pipeline.settings();
    if progress > settings.early_thumbnail_threshold_pct
        && !task.thumbnails.is_done()
        && !task.thumbnails.early_attempted()
    {
        let candidates = selected_paths(&handle.save_path(), metadata, &state.priorities);
        if let Some(reference) = task
            .ctx
            .pipeline
            .generate_thumbnail(
                &job_id,
                &task.thumbnails,
                &candidates,
                ThumbnailTrigger::Early,
            )
            .await
        {
            task.writer
                .update(JobPatch::new().with_thumbnail(reference))
                .await?;
        }
    }

    state.last_status = Some(status);
    Ok(Poll::Continue)
}

async fn handle_command(
    task: &mut JobTask,
    state: &mut TorrentState,
    cmd: JobCommand,
) -> Result<(), TaskExit> {
    match cmd {
        JobCommand::Remove {
            delete_files,
            reply,
        } => Err(task.remove(delete_files, reply).await),
        JobCommand::Select { indices, reply } => {
            let result = select_files(task, state, indices).await;
            answer(reply, result)
        }
        JobCommand::Pause { reply } => {
            let result = pause(task).await;
            answer(reply, result)
        }
        JobCommand::Resume { reply } => {
            let result = resume(task).await;
            answer(reply, result)
        }
    }
}

/// Send the result of a command and decide whether the task goes on.
fn answer(
    reply: Reply<Job>,
    result: Result<Job, CommandFailure>,
) -> Result<(), TaskExit> {
    match result {
        Ok(job) => {
            let _ = reply.send(Ok(job));
            Ok(())
        }
        Err(CommandFailure::Rejected(e)) => {
            let _ = reply.send(Err(e));
            Ok(())
        }
        Err(CommandFailure::Engine(e)) => {
            let _ = reply.send(Err(JobError::Engine(e.clone())));
            Err(e.into())
        }
        Err(CommandFailure::Exit(exit)) => Err(exit),
    }
}

fn invalid_state(task: &JobTask, action: &str) -> CommandFailure {
    CommandFailure::Rejected(JobError::InvalidState(format!(
        "cannot {} job {} while {}",
        action,
        task.job_id(),
        task.writer.status()
    )))
}

async fn select_files(
    task: &mut JobTask,
    state: &mut TorrentState,
    indices: Vec<usize>,
) -> Result<Job, CommandFailure> {
    let status = task.writer.status();
    if !matches!(
        status,
        JobStatus::AwaitingSelection | JobStatus::Transferring | JobStatus::Paused
    ) {
        return Err(invalid_state(task, "select files of"));
    }
    let Some(metadata) = state.metadata.as_ref() else {
        return Err(invalid_state(task, "select files of"));
    };

    if indices.is_empty() {
        return Err(CommandFailure::Rejected(JobError::InvalidInput(
            "no files selected".to_string(),
        )));
    }
    let count = metadata.files.len();
    if let Some(bad) = indices.iter().find(|i| **i >= count) {
        return Err(CommandFailure::Rejected(JobError::InvalidInput(format!(
            "file index {} out of range ({} files)",
            bad, count
        ))));
    }

    let priorities: Vec<FilePriority> = (0..count)
        .map(|i| {
            if indices.contains(&i) {
                FilePriority::High
            } else {
                FilePriority::Skip
            }
        })
        .collect();
    let pairs: Vec<(usize, FilePriority)> = priorities.iter().copied().enumerate().collect();

    let handle = engine_of(&task.engine)?;
    handle.set_file_priorities(&pairs).await?;
    if status == JobStatus::AwaitingSelection {
        handle.resume().await?;
    }

    let fallback = EngineStatus::new(EngineState::Paused);
    let files = file_entries(
        metadata,
        &priorities,
        state.last_status.as_ref().unwrap_or(&fallback),
    );
    state.priorities = priorities;

    info!(job_id = %task.job_id(), selected = ?indices, "Files selected");

    let job = if status == JobStatus::AwaitingSelection {
        task.writer
            .transition(
                JobStatus::Transferring,
                JobPatch::new().with_files(files).with_progress(0.0),
            )
            .await?
    } else {
        task.writer.update(JobPatch::new().with_files(files)).await?
    };
    Ok(job)
}

async fn pause(task: &mut JobTask) -> Result<Job, CommandFailure> {
    match task.writer.status() {
        JobStatus::Transferring => {
            engine_of(&task.engine)?.pause().await?;
            info!(job_id = %task.job_id(), "Job paused");
            Ok(task
                .writer
                .transition(JobStatus::Paused, JobPatch::new())
                .await?)
        }
        JobStatus::Paused => current(task),
        _ => Err(invalid_state(task, "pause")),
    }
}

async fn resume(task: &mut JobTask) -> Result<Job, CommandFailure> {
    match task.writer.status() {
        JobStatus::Paused => {
            engine_of(&task.engine)?.resume().await?;
            info!(job_id = %task.job_id(), "Job resumed");
            Ok(task
                .writer
                .transition(JobStatus::Transferring, JobPatch::new())
                .await?)
        }
        JobStatus::Transferring => current(task),
        _ => Err(invalid_state(task, "resume")),
    }
}

/// The record as it stands, for requests that change nothing.
fn current(task: &JobTask) -> Result<Job, CommandFailure> {
    task.ctx
        .store
        .get(task.job_id())
        .map_err(|e| CommandFailure::Exit(e.into()))?
        .ok_or(CommandFailure::Exit(TaskExit::Vanished))
}

async fn complete(
    task: &mut JobTask,
    state: &TorrentState,
    target_format: Option<String>,
) -> Result<(), TaskExit> {
    let save_path = engine_of(&task.engine)?.save_path();
    let Some(metadata) = state.metadata.as_ref() else {
        return Err(TaskExit::Failed("transfer finished without metadata".to_string()));
    };

    let selected = selected_paths(&save_path, metadata, &state.priorities);
    let output_path = output_path_of(&save_path, metadata, &state.priorities);
    let convert_input = selected.iter().find(|p| is_media_file(p)).cloned();
    debug!(job_id = %task.job_id(), output = %output_path.display(), "Torrent transfer finished");

    let ctx = Arc::clone(&task.ctx);
    ctx.pipeline
        .complete(
            task,
            Completion {
                output_path,
                media_files: selected,
                convert_input,
                target_format,
            },
        )
        .await
}

/// On-disk paths of the selected files, in index order.
fn selected_paths(
    save_path: &Path,
    metadata: &TorrentMetadata,
    priorities: &[FilePriority],
) -> Vec<PathBuf> {
    metadata
        .files
        .iter()
        .filter(|f| {
            priorities
                .get(f.index)
                .map(|p| p.is_selected())
                .unwrap_or(false)
        })
        .map(|f| save_path.join(&f.path))
        .collect()
}

/// The single selected file, or the torrent's top-level directory.
fn output_path_of(
    save_path: &Path,
    metadata: &TorrentMetadata,
    priorities: &[FilePriority],
) -> PathBuf {
    let selected: Vec<&str> = metadata
        .files
        .iter()
        .filter(|f| {
            priorities
                .get(f.index)
                .map(|p| p.is_selected())
                .unwrap_or(false)
        })
        .map(|f| f.path.as_str())
        .collect();

    if let [only] = selected.as_slice() {
        return save_path.join(only);
    }

    let roots: Vec<Option<&std::ffi::OsStr>> = selected
        .iter()
        .map(|p| {
            let path = Path::new(*p);
            match (path.components().next(), path.components().count()) {
                (Some(Component::Normal(root)), n) if n > 1 => Some(root),
                _ => None,
            }
        })
        .collect();

    match roots.first() {
        Some(Some(root)) if roots.iter().all(|r| r == &Some(*root)) => save_path.join(root),
        _ => save_path.to_path_buf(),
    }
}
