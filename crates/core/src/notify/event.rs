use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobCategory, JobStatus};

/// Channel name used on the broadcast sink.
pub const JOBS_CHANNEL: &str = "jobs";

/// Event name of every job update.
pub const JOB_UPDATED_EVENT: &str = "job.updated";

/// Category-specific extras carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_peers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_seeds: Option<u32>,
}

/// Real-time projection of a job write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    #[serde(rename = "type")]
    pub category: JobCategory,
    pub status: JobStatus,
    /// Whole percent, truncated.
    pub progress: u32,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        let mut metadata = EventMetadata {
            output_path: job.output_path.clone(),
            thumbnail: job.thumbnail.clone(),
            title: (!job.name.is_empty()).then(|| job.name.clone()),
            ..Default::default()
        };

        if let Some(peer) = &job.peer {
            metadata.download_rate = Some(peer.download_rate);
            metadata.upload_rate = Some(peer.upload_rate);
            metadata.num_peers = Some(peer.num_peers);
            metadata.num_seeds = Some(peer.num_seeds);
        }

        Self {
            job_id: job.id.clone(),
            category: job.category,
            status: job.status,
            progress: job.progress.clamp(0.0, 100.0) as u32,
            file_name: job.name.clone(),
            error: job.error.clone(),
            metadata,
            timestamp: job.updated_at,
        }
    }
}
