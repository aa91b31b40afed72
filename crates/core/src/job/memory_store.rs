//! In-memory job store with per-record locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::broadcast;

use super::{Job, JobChannels, JobPatch, JobStore, Retention, StoreError};

#[derive(Debug)]
struct Slot {
    job: Option<Job>,
    expires_at: Instant,
}

impl Slot {
    fn live(&self, now: Instant) -> Option<&Job> {
        self.job.as_ref().filter(|_| self.expires_at > now)
    }
}

/// Job store kept entirely in process memory.
///
/// The outer map is only write-locked when a job id is seen for the first
/// time or removed; every write to an existing record locks just that
/// record's slot.
#[derive(Debug)]
pub struct MemoryJobStore {
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    channels: JobChannels,
    retention: Retention,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}

impl MemoryJobStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            channels: JobChannels::new(),
            retention,
        }
    }

    fn existing_slot(&self, job_id: &str) -> Result<Option<Arc<Mutex<Slot>>>, StoreError> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.get(job_id).cloned())
    }

    fn slot_or_insert(&self, job_id: &str) -> Result<Arc<Mutex<Slot>>, StoreError> {
        if let Some(slot) = self.existing_slot(job_id)? {
            return Ok(slot);
        }
        let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
        let slot = slots.entry(job_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Slot {
                job: None,
                expires_at: Instant::now(),
            }))
        });
        Ok(Arc::clone(slot))
    }

    /// Store `job` in an already-locked slot and publish it.
    fn commit(&self, slot: &mut Slot, job: Job, now: Instant) -> Job {
        slot.expires_at = now + self.retention.for_category(job.category);
        slot.job = Some(job.clone());
        self.channels.publish(&job);
        job
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let slot = match self.existing_slot(job_id)? {
            Some(slot) => slot,
            None if patch.category.is_some() => self.slot_or_insert(job_id)?,
            None => return Err(StoreError::NotFound(job_id.to_string())),
        };

        let mut guard = slot.lock().map_err(|_| StoreError::Poisoned)?;
        let now = Instant::now();
        let merged = match guard.live(now) {
            Some(current) => {
                let mut job = current.clone();
                job.apply(patch);
                job
            }
            None => Job::from_patch(job_id, patch)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?,
        };

        Ok(self.commit(&mut guard, merged, now))
    }

    fn create(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let slot = self.slot_or_insert(job_id)?;
        let mut guard = slot.lock().map_err(|_| StoreError::Poisoned)?;
        let now = Instant::now();
        if guard.live(now).is_some() {
            return Err(StoreError::AlreadyExists(job_id.to_string()));
        }
        let job = Job::from_patch(job_id, patch)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        Ok(self.commit(&mut guard, job, now))
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let Some(slot) = self.existing_slot(job_id)? else {
            return Ok(None);
        };
        let guard = slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.live(Instant::now()).cloned())
    }

    fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .slots
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(job_id);

        let was_live = match removed {
            Some(slot) => {
                let mut guard = slot.lock().map_err(|_| StoreError::Poisoned)?;
                let live = guard.live(Instant::now()).is_some();
                guard.job = None;
                live
            }
            None => false,
        };

        self.channels.close(job_id);
        Ok(was_live)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<Job>, StoreError> {
        let candidates: Vec<Arc<Mutex<Slot>>> = self
            .slots
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        let now = Instant::now();
        let mut jobs = Vec::with_capacity(candidates.len());
        for slot in candidates {
            let guard = slot.lock().map_err(|_| StoreError::Poisoned)?;
            if let Some(job) = guard.live(now) {
                jobs.push(job.clone());
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    fn subscribe(&self, job_id: &str) -> broadcast::Receiver<Job> {
        self.channels.subscribe(job_id)
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;

        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| {
                slot.lock()
                    .map(|guard| guard.live(now).is_none())
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            slots.remove(id);
        }
        drop(slots);

        for id in &expired {
            self.channels.close(id);
        }
        Ok(expired.len())
    }
}
