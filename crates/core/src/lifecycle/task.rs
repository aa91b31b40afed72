use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use super::command::{JobCommand, Reply};
use super::context::JobContext;
use super::writer::JobWriter;
use super::JobError;
use crate::engine::{EngineError, EngineHandle};
use crate::extractor::ExtractorError;
use crate::job::{Job, StoreError};
use crate::pipeline::ThumbnailGuard;
use crate::transcoder::TranscoderError;

/// Why a monitoring task stopped before writing a terminal status itself.
#[derive(Debug)]
pub(crate) enum TaskExit {
    /// Caller asked for removal; the record is about to be deleted.
    Removed,
    /// The record is gone from the store.
    Vanished,
    /// A collaborator gave up; the job is failed with this reason.
    Failed(String),
    /// Anything else; the job is failed with this error.
    Fault(JobError),
}

impl From<JobError> for TaskExit {
    fn from(e: JobError) -> Self {
        if e.is_vanished() {
            TaskExit::Vanished
        } else {
            TaskExit::Fault(e)
        }
    }
}

impl From<StoreError> for TaskExit {
    fn from(e: StoreError) -> Self {
        JobError::from(e).into()
    }
}

impl From<EngineError> for TaskExit {
    fn from(e: EngineError) -> Self {
        TaskExit::Failed(e.to_string())
    }
}

impl From<ExtractorError> for TaskExit {
    fn from(e: ExtractorError) -> Self {
        TaskExit::Failed(e.to_string())
    }
}

impl From<TranscoderError> for TaskExit {
    fn from(e: TranscoderError) -> Self {
        TaskExit::Failed(e.to_string())
    }
}

pub(crate) enum TaskEvent {
    Tick,
    Command(JobCommand),
}

/// State owned by one job's monitoring task.
pub(crate) struct JobTask {
    pub writer: JobWriter,
    pub ctx: Arc<JobContext>,
    pub thumbnails: ThumbnailGuard,
    /// Engine handle of peer-to-peer jobs.
    pub engine: Option<Box<dyn EngineHandle>>,
    /// Files deleted on `Remove { delete_files: true }`.
    pub artifacts: Vec<PathBuf>,
    inbox: mpsc::Receiver<JobCommand>,
    inbox_open: bool,
}

impl JobTask {
    pub fn new(job: &Job, ctx: Arc<JobContext>, inbox: mpsc::Receiver<JobCommand>) -> Self {
        let writer = JobWriter::new(job, Arc::clone(&ctx.store), ctx.fanout.clone());
        Self {
            writer,
            ctx,
            thumbnails: ThumbnailGuard::new(),
            engine: None,
            artifacts: Vec::new(),
            inbox,
            inbox_open: true,
        }
    }

    pub fn with_engine(mut self, handle: Box<dyn EngineHandle>) -> Self {
        self.engine = Some(handle);
        self
    }

    pub fn job_id(&self) -> &str {
        self.writer.job_id()
    }

    /// Wait for the next tick or control request, whichever comes first.
    pub async fn next_event(&mut self, ticker: &mut Interval) -> TaskEvent {
        if !self.inbox_open {
            ticker.tick().await;
            return TaskEvent::Tick;
        }
        tokio::select! {
            biased;
            cmd = self.inbox.recv() => match cmd {
                Some(cmd) => TaskEvent::Command(cmd),
                None => {
                    self.inbox_open = false;
                    ticker.tick().await;
                    TaskEvent::Tick
                }
            },
            _ = ticker.tick() => TaskEvent::Tick,
        }
    }

    /// Sleep one tick, answering control requests that arrive meanwhile.
    ///
    /// Only removal is honoured; everything else is refused in the current status.
    pub async fn wait(&mut self, ticker: &mut Interval) -> Result<(), TaskExit> {
        loop {
            match self.next_event(ticker).await {
                TaskEvent::Tick => return Ok(()),
                TaskEvent::Command(cmd) => self.handle_passive(cmd).await?,
            }
        }
    }

    pub async fn handle_passive(&mut self, cmd: JobCommand) -> Result<(), TaskExit> {
        match cmd {
            JobCommand::Remove {
                delete_files,
                reply,
            } => Err(self.remove(delete_files, reply).await),
            other => {
                self.reject(other);
                Ok(())
            }
        }
    }

    /// Refuse a command that makes no sense in the current status.
    pub fn reject(&self, cmd: JobCommand) {
        let message = format!(
            "cannot {} job {} while {}",
            cmd.name(),
            self.job_id(),
            self.writer.status()
        );
        cmd.reject(JobError::InvalidState(message));
    }

    /// Release engine resources and optionally delete files on disk.
    pub async fn remove(&mut self, delete_files: bool, reply: Reply<()>) -> TaskExit {
        if let Some(handle) = self.engine.take() {
            if let Err(e) = handle.remove(delete_files).await {
                warn!(job_id = %self.job_id(), error = %e, "Failed to remove torrent from engine");
            }
        }
        if delete_files {
            for path in self.artifacts.drain(..) {
                let result = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                if let Err(e) = result {
                    debug!(path = %path.display(), error = %e, "Could not delete job artifact");
                }
            }
        }
        let _ = reply.send(Ok(()));
        TaskExit::Removed
    }

    /// Conclude the task, failing the job if it stopped on a fault.
    pub async fn finish(mut self, result: Result<(), TaskExit>) {
        match result {
            Ok(()) => {
                debug!(job_id = %self.job_id(), status = %self.writer.status(), "Monitoring finished");
            }
            Err(TaskExit::Removed) => {
                info!(job_id = %self.job_id(), "Job removed");
            }
            Err(TaskExit::Vanished) => {
                info!(job_id = %self.job_id(), "Job record gone, monitoring stopped");
            }
            Err(TaskExit::Failed(reason)) => self.record_failure(reason).await,
            Err(TaskExit::Fault(e)) => self.record_failure(e.to_string()).await,
        }

        self.inbox.close();
        while let Ok(cmd) = self.inbox.try_recv() {
            cmd.reject(JobError::NotControllable(self.job_id().to_string()));
        }
    }

    async fn record_failure(&mut self, reason: String) {
        warn!(job_id = %self.job_id(), error = %reason, "Job failed");
        if self.writer.status().is_terminal() {
            return;
        }
        if let Err(e) = self.writer.fail(reason).await {
            warn!(job_id = %self.job_id(), error = %e, "Failed to record job failure");
        }
    }
}
