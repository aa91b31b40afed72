//! Job records and their storage.

mod memory_store;
mod sqlite_store;
mod store;
mod types;

pub use memory_store::MemoryJobStore;
pub use sqlite_store::SqliteJobStore;
pub use store::{JobChannels, JobStore, Retention, StoreError};
pub use types::{FileEntry, FilePriority, Job, JobCategory, JobPatch, JobStatus, PeerStats};
