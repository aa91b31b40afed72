//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    /// Single URL fetched through the media extractor.
    Transfer,
    /// Multi-file peer-to-peer transfer where the caller picks files.
    SelectiveTransfer,
    /// Direct conversion of a local file.
    Transcode,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Transfer => "transfer",
            JobCategory::SelectiveTransfer => "selective_transfer",
            JobCategory::Transcode => "transcode",
        }
    }

    /// Multi-file jobs are retained longer than single-file ones.
    pub fn is_multi_file(&self) -> bool {
        matches!(self, JobCategory::SelectiveTransfer)
    }
}

/// Lifecycle status of a job.
///
/// ```text
/// pending -> fetching_metadata -> awaiting_selection -> transferring <-> paused
///                                                            |
///                                   converting <-------------+
///                                        |                   |
///                                        +--> completed <----+
/// any non-terminal status -> failed
/// ```
///
/// Simple transfers go `pending -> transferring`, transcode jobs go
/// `pending -> converting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    FetchingMetadata,
    AwaitingSelection,
    Transferring,
    Paused,
    /// Informational: waiting on a conversion sub-job.
    Converting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::FetchingMetadata => "fetching_metadata",
            JobStatus::AwaitingSelection => "awaiting_selection",
            JobStatus::Transferring => "transferring",
            JobStatus::Paused => "paused",
            JobStatus::Converting => "converting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true if no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same non-terminal status is always legal; it is how
    /// progress updates are written.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed || next == *self {
            return true;
        }

        matches!(
            (self, next),
            (Pending, FetchingMetadata)
                | (Pending, Transferring)
                | (Pending, Converting)
                | (FetchingMetadata, AwaitingSelection)
                | (AwaitingSelection, Transferring)
                | (Transferring, Paused)
                | (Transferring, Converting)
                | (Transferring, Completed)
                | (Paused, Transferring)
                | (Converting, Completed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file download priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilePriority {
    #[default]
    Skip,
    Normal,
    High,
}

impl FilePriority {
    pub fn is_selected(&self) -> bool {
        !matches!(self, FilePriority::Skip)
    }
}

/// One constituent file of a multi-file job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position of the file within the torrent.
    pub index: usize,
    /// Path relative to the job's save directory.
    pub path: String,
    pub size: u64,
    pub priority: FilePriority,
    /// 0-100; always 0 for skipped files.
    pub progress: f64,
}

/// Live transfer statistics, only present on peer-to-peer jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Bytes per second.
    pub download_rate: u64,
    /// Bytes per second.
    pub upload_rate: u64,
    pub num_peers: u32,
    pub num_seeds: u32,
}

/// The durable projection of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub category: JobCategory,
    pub status: JobStatus,
    /// 0-100.
    pub progress: f64,
    /// Display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// URL, magnet URI or input path the job was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Requested output profile, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Reference under which the thumbnail is served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Id of the conversion sub-job spawned for this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerStats>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh record from a patch. Returns `None` when the patch does
    /// not name a category, since a record cannot exist without one.
    pub fn from_patch(id: &str, patch: JobPatch) -> Option<Job> {
        let category = patch.category?;
        let now = Utc::now();
        let mut job = Job {
            id: id.to_string(),
            category,
            status: JobStatus::Pending,
            progress: 0.0,
            name: String::new(),
            error: None,
            source: None,
            target_format: None,
            output_path: None,
            thumbnail: None,
            derived_job_id: None,
            files: Vec::new(),
            total_size: None,
            peer: None,
            created_at: now,
            updated_at: now,
        };
        job.apply(patch);
        Some(job)
    }

    /// Merge the fields present in `patch` into this record.
    pub fn apply(&mut self, patch: JobPatch) {
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = clamp_progress(progress);
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(source) = patch.source {
            self.source = Some(source);
        }
        if let Some(target_format) = patch.target_format {
            self.target_format = Some(target_format);
        }
        if let Some(output_path) = patch.output_path {
            self.output_path = Some(output_path);
        }
        if let Some(thumbnail) = patch.thumbnail {
            self.thumbnail = Some(thumbnail);
        }
        if let Some(derived_job_id) = patch.derived_job_id {
            self.derived_job_id = Some(derived_job_id);
        }
        if let Some(files) = patch.files {
            self.files = files;
        }
        if let Some(total_size) = patch.total_size {
            self.total_size = Some(total_size);
        }
        if let Some(peer) = patch.peer {
            self.peer = Some(peer);
        }
        self.updated_at = Utc::now();
    }

    /// Indices of files the caller selected.
    pub fn selected_indices(&self) -> Vec<usize> {
        self.files
            .iter()
            .filter(|f| f.priority.is_selected())
            .map(|f| f.index)
            .collect()
    }
}

/// Partial update of a job record; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub category: Option<JobCategory>,
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub name: Option<String>,
    pub error: Option<String>,
    pub source: Option<String>,
    pub target_format: Option<String>,
    pub output_path: Option<String>,
    pub thumbnail: Option<String>,
    pub derived_job_id: Option<String>,
    pub files: Option<Vec<FileEntry>>,
    pub total_size: Option<u64>,
    pub peer: Option<PeerStats>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that creates a new pending record of the given category.
    pub fn create(category: JobCategory) -> Self {
        Self {
            category: Some(category),
            status: Some(JobStatus::Pending),
            progress: Some(0.0),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target_format(mut self, format: Option<String>) -> Self {
        self.target_format = format;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_derived_job_id(mut self, id: impl Into<String>) -> Self {
        self.derived_job_id = Some(id.into());
        self
    }

    pub fn with_files(mut self, files: Vec<FileEntry>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_total_size(mut self, size: u64) -> Self {
        self.total_size = Some(size);
        self
    }

    pub fn with_peer(mut self, peer: PeerStats) -> Self {
        self.peer = Some(peer);
        self
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::FetchingMetadata,
        JobStatus::AwaitingSelection,
        JobStatus::Transferring,
        JobStatus::Paused,
        JobStatus::Converting,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    #[test]
    fn test_terminal_statuses_never_transition() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_every_live_status_can_fail() {
        for status in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(JobStatus::Failed));
        }
    }

    #[test]
    fn test_selective_transfer_path() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::FetchingMetadata));
        assert!(JobStatus::FetchingMetadata.can_transition_to(JobStatus::AwaitingSelection));
        assert!(JobStatus::AwaitingSelection.can_transition_to(JobStatus::Transferring));
        assert!(JobStatus::Transferring.can_transition_to(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Transferring));
        assert!(JobStatus::Transferring.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_illegal_shortcuts_rejected() {
        assert!(!JobStatus::FetchingMetadata.can_transition_to(JobStatus::Transferring));
        assert!(!JobStatus::AwaitingSelection.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Converting.can_transition_to(JobStatus::Transferring));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::AwaitingSelection).unwrap(),
            "\"awaiting_selection\""
        );
        assert_eq!(
            serde_json::to_string(&JobCategory::SelectiveTransfer).unwrap(),
            "\"selective_transfer\""
        );
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_from_patch_requires_category() {
        assert!(Job::from_patch("a", JobPatch::new().with_progress(5.0)).is_none());

        let job = Job::from_patch("a", JobPatch::create(JobCategory::Transfer)).unwrap();
        assert_eq!(job.id, "a");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut job = Job::from_patch(
            "a",
            JobPatch::create(JobCategory::Transfer).with_name("clip"),
        )
        .unwrap();

        job.apply(JobPatch::new().with_progress(42.0));
        assert_eq!(job.name, "clip");
        assert_eq!(job.progress, 42.0);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_apply_clamps_progress() {
        let mut job = Job::from_patch("a", JobPatch::create(JobCategory::Transfer)).unwrap();
        job.apply(JobPatch::new().with_progress(180.0));
        assert_eq!(job.progress, 100.0);
        job.apply(JobPatch::new().with_progress(-3.0));
        assert_eq!(job.progress, 0.0);
        job.apply(JobPatch::new().with_progress(f64::NAN));
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_selected_indices() {
        let mut job =
            Job::from_patch("t", JobPatch::create(JobCategory::SelectiveTransfer)).unwrap();
        job.files = (0..3)
            .map(|i| FileEntry {
                index: i,
                path: format!("f{}", i),
                size: 10,
                priority: if i == 1 {
                    FilePriority::High
                } else {
                    FilePriority::Skip
                },
                progress: 0.0,
            })
            .collect();
        assert_eq!(job.selected_indices(), vec![1]);
    }

    #[test]
    fn test_job_serialization_omits_empty_optionals() {
        let job = Job::from_patch("a", JobPatch::create(JobCategory::Transfer)).unwrap();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["category"], "transfer");
        assert!(json.get("error").is_none());
        assert!(json.get("files").is_none());
        assert!(json.get("peer").is_none());
    }
}
