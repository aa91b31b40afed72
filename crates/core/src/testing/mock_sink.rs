//! Recording event sink for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::job::JobStatus;
use crate::notify::{EventSink, JobEvent, SinkError};

/// Keeps every published event; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<RwLock<Vec<JobEvent>>>,
    failing: Arc<RwLock<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (the event is still recorded).
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    pub async fn events(&self) -> Vec<JobEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, job_id: &str) -> Vec<JobEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Statuses seen for a job, consecutive duplicates collapsed.
    pub async fn statuses_for(&self, job_id: &str) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = Vec::new();
        for event in self.events_for(job_id).await {
            if statuses.last() != Some(&event.status) {
                statuses.push(event.status);
            }
        }
        statuses
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, event: &JobEvent) -> Result<(), SinkError> {
        self.events.write().await.push(event.clone());
        if *self.failing.read().await {
            return Err(SinkError::Request("recording sink told to fail".to_string()));
        }
        Ok(())
    }
}
