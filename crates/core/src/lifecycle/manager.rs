use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use super::command::JobCommand;
use super::context::{Collaborators, JobContext, LifecycleSettings};
use super::registry::HandleRegistry;
use super::supervisor::{fail_record, spawn_supervised};
use super::task::JobTask;
use super::transfer::TransferPlan;
use super::{torrent, transcode, transfer, JobError};
use crate::engine::{parse_magnet, parse_torrent_file, AddTorrentRequest, TorrentSource};
use crate::extractor::MediaMetadata;
use crate::job::{Job, JobCategory, JobPatch, JobStore, StoreError};
use crate::metrics;
use crate::notify::Fanout;
use crate::pipeline::CompletionPipeline;
use crate::transcoder::{is_supported_format, normalize_target_format};

/// Longest accepted caller-supplied job id.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Reason recorded on jobs found without a monitoring task at start-up.
pub const ORPHANED_REASON: &str = "engine handle lost";

/// Fetch one URL through the media extractor.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub url: String,
    /// Extractor format selector; the configured default when `None`.
    pub format: Option<String>,
    pub target_format: Option<String>,
    pub job_id: Option<String>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_target_format(mut self, format: impl Into<String>) -> Self {
        self.target_format = Some(format.into());
        self
    }
}

/// Add a torrent whose files the caller picks later.
#[derive(Debug, Clone)]
pub struct TorrentRequest {
    pub source: TorrentSource,
    pub target_format: Option<String>,
    pub job_id: Option<String>,
}

impl TorrentRequest {
    pub fn new(source: TorrentSource) -> Self {
        Self {
            source,
            target_format: None,
            job_id: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_target_format(mut self, format: impl Into<String>) -> Self {
        self.target_format = Some(format.into());
        self
    }
}

/// Convert a local file.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub target_format: String,
    pub job_id: Option<String>,
}

impl ConversionRequest {
    pub fn new(input_path: impl Into<PathBuf>, target_format: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            target_format: target_format.into(),
            job_id: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Entry point of every job operation.
///
/// Submissions create the record and spawn the job's monitoring task.
/// Control requests are routed to that task through the handle registry;
/// reads go straight to the store.
#[derive(Clone)]
pub struct JobManager {
    ctx: Arc<JobContext>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
        fanout: Fanout,
        settings: LifecycleSettings,
    ) -> Self {
        let pipeline = CompletionPipeline::new(
            Arc::clone(&collaborators.transcoder),
            settings.pipeline.clone(),
        );
        Self {
            ctx: Arc::new(JobContext {
                store,
                fanout,
                registry: Arc::new(HandleRegistry::new()),
                collaborators,
                pipeline,
                settings,
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.ctx.store)
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.ctx.collaborators
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.ctx.settings
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.ctx.registry
    }

    /// Number of jobs with a live monitoring task.
    pub fn active_count(&self) -> usize {
        self.ctx.registry.len()
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    pub async fn submit_transfer(&self, request: TransferRequest) -> Result<Job, JobError> {
        let job_id = resolve_job_id(request.job_id.as_deref())?;
        validate_url(&request.url)?;
        let target_format = validate_target_format(request.target_format.as_deref())?;

        let job = self.create_record(
            &job_id,
            JobPatch::create(JobCategory::Transfer)
                .with_name(request.url.clone())
                .with_source(request.url.clone())
                .with_target_format(target_format.clone()),
        )?;

        let plan = TransferPlan {
            url: request.url,
            format: request.format,
            target_format,
        };
        self.launch(&job, |task| transfer::run(task, plan))?;
        self.accepted(job).await
    }

    pub async fn submit_torrent(&self, request: TorrentRequest) -> Result<Job, JobError> {
        let job_id = resolve_job_id(request.job_id.as_deref())?;
        let target_format = validate_target_format(request.target_format.as_deref())?;

        let (name, source) = match &request.source {
            TorrentSource::Magnet(uri) => {
                let info = parse_magnet(uri).map_err(|e| JobError::InvalidInput(e.to_string()))?;
                (info.name, uri.trim().to_string())
            }
            TorrentSource::TorrentFile { data, filename } => {
                let metadata = parse_torrent_file(data)
                    .map_err(|e| JobError::InvalidInput(e.to_string()))?;
                let source = filename.clone().unwrap_or_else(|| metadata.name.clone());
                (metadata.name, source)
            }
        };

        if self.ctx.store.get(&job_id)?.is_some() || self.ctx.registry.contains(&job_id) {
            return Err(JobError::Conflict(job_id));
        }

        // A stopped magnet never fetches its info dictionary; the task
        // pauses it once metadata is in
        let start_paused = matches!(request.source, TorrentSource::TorrentFile { .. });
        let handle = {
            let engine = &self.ctx.collaborators.engine;
            let _timer = metrics::time_call(engine.name(), "add");
            engine
                .add(AddTorrentRequest::new(&job_id, request.source).with_paused(start_paused))
                .await?
        };

        let created = self.create_record(
            &job_id,
            JobPatch::create(JobCategory::SelectiveTransfer)
                .with_name(name)
                .with_source(source)
                .with_target_format(target_format.clone()),
        );
        let job = match created {
            Ok(job) => job,
            Err(e) => {
                if let Err(remove_err) = handle.remove(true).await {
                    warn!(job_id = %job_id, error = %remove_err, "Failed to roll back torrent");
                }
                return Err(e);
            }
        };

        self.launch(&job, move |task| {
            torrent::run(task.with_engine(handle), target_format)
        })?;
        self.accepted(job).await
    }

    pub async fn submit_conversion(&self, request: ConversionRequest) -> Result<Job, JobError> {
        let job_id = resolve_job_id(request.job_id.as_deref())?;
        let format = validate_target_format(Some(request.target_format.as_str()))?.ok_or_else(|| {
            JobError::InvalidInput("a conversion needs a target format".to_string())
        })?;

        match tokio::fs::metadata(&request.input_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(JobError::InvalidInput(format!(
                    "input file not found: {}",
                    request.input_path.display()
                )))
            }
        }

        let name = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| request.input_path.display().to_string());

        let job = self.create_record(
            &job_id,
            JobPatch::create(JobCategory::Transcode)
                .with_name(name)
                .with_source(request.input_path.to_string_lossy())
                .with_target_format(Some(format.clone())),
        )?;

        let input = request.input_path;
        self.launch(&job, move |task| transcode::run(task, input, format))?;
        self.accepted(job).await
    }

    fn create_record(&self, job_id: &str, patch: JobPatch) -> Result<Job, JobError> {
        match self.ctx.store.create(job_id, patch) {
            Ok(job) => Ok(job),
            Err(StoreError::AlreadyExists(id)) => Err(JobError::Conflict(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Register and spawn the job's monitoring task.
    fn launch<F, Fut>(&self, job: &Job, run: F) -> Result<(), JobError>
    where
        F: FnOnce(JobTask) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (commands, inbox) = mpsc::channel(self.ctx.settings.command_buffer);
        let Some(generation) = self.ctx.registry.register(&job.id, job.category, commands) else {
            // A task for a deleted job of the same id is still winding down
            if let Err(e) = self.ctx.store.delete(&job.id) {
                warn!(job_id = %job.id, error = %e, "Failed to drop record of rejected job");
            }
            return Err(JobError::Conflict(job.id.clone()));
        };

        let task = JobTask::new(job, Arc::clone(&self.ctx), inbox);
        spawn_supervised(
            Arc::clone(&self.ctx),
            job.id.clone(),
            job.category,
            generation,
            run(task),
        );
        Ok(())
    }

    async fn accepted(&self, job: Job) -> Result<Job, JobError> {
        metrics::JOBS_SUBMITTED
            .with_label_values(&[job.category.as_str()])
            .inc();
        info!(job_id = %job.id, category = job.category.as_str(), "Job submitted");
        self.ctx.fanout.write(&job).await;
        Ok(job)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.ctx
            .store
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Live records, newest first.
    pub fn list(&self, prefix: Option<&str>) -> Result<Vec<Job>, JobError> {
        Ok(self.ctx.store.scan(prefix.unwrap_or(""))?)
    }

    /// Follow every write of one job.
    pub fn subscribe(&self, job_id: &str) -> Result<broadcast::Receiver<Job>, JobError> {
        let receiver = self.ctx.store.subscribe(job_id);
        self.get_status(job_id)?;
        Ok(receiver)
    }

    /// Wait for the job's next write, or return the current record on timeout.
    ///
    /// Returns immediately when the job is already terminal.
    pub async fn wait_for_change(&self, job_id: &str, timeout: Duration) -> Result<Job, JobError> {
        let mut receiver = self.ctx.store.subscribe(job_id);
        let current = self.get_status(job_id)?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Ok(job)) => Ok(job),
            // Lagged, closed or timed out: the store has the latest record
            Ok(Err(_)) | Err(_) => self.get_status(job_id),
        }
    }

    /// Metadata of a URL, without creating a job.
    pub async fn media_info(&self, url: &str) -> Result<MediaMetadata, JobError> {
        validate_url(url)?;
        let extractor = &self.ctx.collaborators.extractor;
        let _timer = metrics::time_call(extractor.name(), "metadata");
        Ok(extractor.fetch_metadata(url).await?)
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    pub async fn select_files(&self, job_id: &str, indices: Vec<usize>) -> Result<Job, JobError> {
        self.command(job_id, Some(JobCategory::SelectiveTransfer), |reply| {
            JobCommand::Select { indices, reply }
        })
        .await
    }

    pub async fn pause(&self, job_id: &str) -> Result<Job, JobError> {
        self.command(job_id, Some(JobCategory::SelectiveTransfer), |reply| {
            JobCommand::Pause { reply }
        })
        .await
    }

    pub async fn resume(&self, job_id: &str) -> Result<Job, JobError> {
        self.command(job_id, Some(JobCategory::SelectiveTransfer), |reply| {
            JobCommand::Resume { reply }
        })
        .await
    }

    /// Remove a job: stop its task (releasing engine resources), then drop
    /// the record. `delete_files` also removes what the job wrote.
    pub async fn delete(&self, job_id: &str, delete_files: bool) -> Result<(), JobError> {
        let existing = self.ctx.store.get(job_id)?;

        if self.ctx.registry.contains(job_id) {
            let removed = self
                .command(job_id, None, |reply| JobCommand::Remove {
                    delete_files,
                    reply,
                })
                .await;
            match removed {
                // Finished between the lookup and the request
                Ok(()) | Err(JobError::NotControllable(_)) => {}
                Err(e) => return Err(e),
            }
        } else if let Some(job) = existing.as_ref() {
            if delete_files {
                remove_output(job).await;
            }
        }

        let deleted = self.ctx.store.delete(job_id)?;
        if existing.is_none() && !deleted {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        info!(job_id, delete_files, "Job deleted");
        Ok(())
    }

    /// Send a command to the job's task and wait for its answer.
    async fn command<T>(
        &self,
        job_id: &str,
        category: Option<JobCategory>,
        build: impl FnOnce(oneshot::Sender<Result<T, JobError>>) -> JobCommand,
    ) -> Result<T, JobError> {
        let Some((job_category, sender)) = self.ctx.registry.sender(job_id) else {
            return Err(self.not_live(job_id, category)?);
        };
        if let Some(expected) = category {
            if job_category != expected {
                return Err(JobError::InvalidInput(format!(
                    "job {} is a {} job; only {} jobs accept this request",
                    job_id,
                    job_category.as_str(),
                    expected.as_str()
                )));
            }
        }

        let (reply, answer) = oneshot::channel();
        let cmd = build(reply);
        if sender.send(cmd).await.is_err() {
            return Err(JobError::NotControllable(job_id.to_string()));
        }
        answer
            .await
            .unwrap_or_else(|_| Err(JobError::NotControllable(job_id.to_string())))
    }

    /// The error for a request aimed at a job with no live task.
    fn not_live(&self, job_id: &str, category: Option<JobCategory>) -> Result<JobError, JobError> {
        let Some(job) = self.ctx.store.get(job_id)? else {
            return Ok(JobError::NotFound(job_id.to_string()));
        };
        if let Some(expected) = category {
            if job.category != expected {
                return Ok(JobError::InvalidInput(format!(
                    "job {} is a {} job; only {} jobs accept this request",
                    job_id,
                    job.category.as_str(),
                    expected.as_str()
                )));
            }
        }
        if job.status.is_terminal() {
            Ok(JobError::InvalidState(format!(
                "job {} is already {}",
                job_id, job.status
            )))
        } else {
            Ok(JobError::NotControllable(job_id.to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Start-up
    // ------------------------------------------------------------------

    /// Fail every non-terminal record nothing in this process controls.
    ///
    /// Returns how many records were failed.
    pub async fn reconcile_orphans(&self) -> Result<usize, JobError> {
        let mut failed = 0;
        for job in self.ctx.store.scan("")? {
            if job.status.is_terminal() || self.ctx.registry.contains(&job.id) {
                continue;
            }
            if fail_record(&self.ctx, &job.id, ORPHANED_REASON).await? {
                failed += 1;
            }
        }
        if failed > 0 {
            info!(failed, "Marked orphaned jobs as failed");
        }
        Ok(failed)
    }
}

fn resolve_job_id(job_id: Option<&str>) -> Result<String, JobError> {
    match job_id {
        None => Ok(uuid::Uuid::new_v4().simple().to_string()),
        Some(id) => {
            validate_job_id(id)?;
            Ok(id.to_string())
        }
    }
}

/// Ids are `[A-Za-z0-9_-]{1,128}`.
pub fn validate_job_id(job_id: &str) -> Result<(), JobError> {
    if job_id.is_empty() || job_id.len() > MAX_JOB_ID_LEN {
        return Err(JobError::InvalidInput(format!(
            "job id must be 1-{} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if !job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(JobError::InvalidInput(format!(
            "job id {:?} may only contain letters, digits, '_' and '-'",
            job_id
        )));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), JobError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| JobError::InvalidInput(format!("invalid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(JobError::InvalidInput(format!(
            "unsupported URL scheme: {}",
            other
        ))),
    }
}

fn validate_target_format(format: Option<&str>) -> Result<Option<String>, JobError> {
    match normalize_target_format(format) {
        Some(format) if !is_supported_format(&format) => Err(JobError::InvalidInput(format!(
            "unsupported target format: {}",
            format
        ))),
        other => Ok(other),
    }
}

/// Best-effort removal of a finished job's output file.
async fn remove_output(job: &Job) {
    let Some(path) = job.output_path.as_deref() else {
        return;
    };
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(job_id = %job.id, path, error = %e, "Failed to delete job output");
            }
        }
        _ => {}
    }
}
