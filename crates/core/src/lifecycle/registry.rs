//! Volatile control tier: which jobs have a live monitoring task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use super::command::JobCommand;
use crate::job::JobCategory;

struct Entry {
    generation: u64,
    category: JobCategory,
    commands: mpsc::Sender<JobCommand>,
}

/// Per-process table of live monitoring tasks, keyed by job id.
///
/// Entries are tagged with a generation so a finishing task can only
/// remove its own entry, never one registered later under the same id.
#[derive(Default)]
pub struct HandleRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a task's command channel. Returns `None` if the id is taken.
    pub(crate) fn register(
        &self,
        job_id: &str,
        category: JobCategory,
        commands: mpsc::Sender<JobCommand>,
    ) -> Option<u64> {
        let mut entries = self.write();
        if entries.contains_key(job_id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            job_id.to_string(),
            Entry {
                generation,
                category,
                commands,
            },
        );
        Some(generation)
    }

    pub(crate) fn sender(&self, job_id: &str) -> Option<(JobCategory, mpsc::Sender<JobCommand>)> {
        self.read()
            .get(job_id)
            .map(|e| (e.category, e.commands.clone()))
    }

    /// Remove the entry if it still belongs to `generation`.
    pub(crate) fn remove(&self, job_id: &str, generation: u64) -> bool {
        let mut entries = self.write();
        if entries.get(job_id).is_some_and(|e| e.generation == generation) {
            entries.remove(job_id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_exclusive() {
        let registry = HandleRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(registry
            .register("a", JobCategory::Transfer, tx.clone())
            .is_some());
        assert!(registry.register("a", JobCategory::Transfer, tx).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_generation_cannot_remove() {
        let registry = HandleRegistry::new();
        let (tx, _rx) = mpsc::channel(1);

        let first = registry
            .register("a", JobCategory::Transfer, tx.clone())
            .unwrap();
        assert!(registry.remove("a", first));

        let second = registry
            .register("a", JobCategory::SelectiveTransfer, tx)
            .unwrap();
        assert!(!registry.remove("a", first));
        assert!(registry.contains("a"));
        assert_eq!(
            registry.sender("a").map(|(c, _)| c),
            Some(JobCategory::SelectiveTransfer)
        );
        assert!(registry.remove("a", second));
        assert!(registry.is_empty());
    }
}
