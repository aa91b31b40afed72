//! Job storage trait and shared plumbing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use super::{Job, JobCategory, JobPatch};

/// Buffered updates per job channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 32;

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live record exists and the write cannot create one.
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to encode job record: {0}")]
    Serialization(String),

    #[error("Job store lock poisoned")]
    Poisoned,
}

/// How long records live after their last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub simple: Duration,
    pub multi_file: Duration,
}

impl Retention {
    pub fn new(simple: Duration, multi_file: Duration) -> Self {
        Self { simple, multi_file }
    }

    pub fn for_category(&self, category: JobCategory) -> Duration {
        if category.is_multi_file() {
            self.multi_file
        } else {
            self.simple
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            simple: Duration::from_secs(24 * 60 * 60),
            multi_file: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Durable, expiring record per job plus a per-job notification channel.
///
/// Writes for one job come from a single task, so implementations only
/// need per-key serialization; unrelated jobs must not contend.
pub trait JobStore: Send + Sync {
    /// Merge `patch` into the record, refresh its TTL and publish the merged
    /// record on the job's channel.
    ///
    /// An absent (or expired, or deleted) record is created only when the
    /// patch carries a category; otherwise this fails with
    /// [`StoreError::NotFound`].
    fn put(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError>;

    /// Insert a brand-new record, failing if a live one already exists.
    fn create(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError>;

    /// Get a live record.
    fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Delete a record. Returns whether a live record was removed.
    fn delete(&self, job_id: &str) -> Result<bool, StoreError>;

    /// All live records whose id starts with `prefix`, newest first.
    fn scan(&self, prefix: &str) -> Result<Vec<Job>, StoreError>;

    /// Receive every record published for `job_id` from now on.
    fn subscribe(&self, job_id: &str) -> broadcast::Receiver<Job>;

    /// Drop records past their TTL. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Per-job broadcast channels.
///
/// Publishing takes the read lock only; the write lock is needed when the
/// first subscriber of a job shows up or a channel is dropped.
#[derive(Debug, Default)]
pub struct JobChannels {
    senders: RwLock<HashMap<String, broadcast::Sender<Job>>>,
}

impl JobChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<Job> {
        let mut senders = match self.senders.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a record to current subscribers, if any.
    pub fn publish(&self, job: &Job) {
        let senders = match self.senders.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = senders.get(&job.id) {
            // No receivers left is not an error
            let _ = sender.send(job.clone());
        }
    }

    /// Drop the channel of a job; existing receivers observe `Closed`.
    pub fn close(&self, job_id: &str) {
        let mut senders = match self.senders.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.remove(job_id);
    }
}

/// One mutex per key, created on demand.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn lock_for(&self, key: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        if let Some(lock) = self
            .locks
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(key)
        {
            return Ok(Arc::clone(lock));
        }

        let mut locks = self.locks.write().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(locks.entry(key.to_string()).or_default()))
    }

    pub(crate) fn forget(&self, key: &str) {
        if let Ok(mut locks) = self.locks.write() {
            locks.remove(key);
        }
    }
}
