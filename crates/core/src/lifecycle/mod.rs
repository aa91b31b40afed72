//! Job lifecycle.
//!
//! Every accepted job gets one monitoring task, spawned under a supervisor.
//! The task is the job's only writer: it polls its collaborator on a fixed
//! interval, applies the status transitions and answers control requests
//! that arrive over its command channel.
//!
//! Two tiers are kept apart:
//! - **Durable**: the job record in the [`JobStore`](crate::job::JobStore)
//! - **Volatile**: the [`HandleRegistry`] entry of the live task, which owns
//!   the engine handle. Control requests only work while it exists.

mod command;
mod context;
mod error;
mod manager;
mod purge;
mod registry;
mod supervisor;
mod task;
mod torrent;
mod transcode;
mod transfer;
mod writer;

pub use context::{Collaborators, LifecycleSettings};
pub use error::JobError;
pub use manager::{
    validate_job_id, ConversionRequest, JobManager, TorrentRequest, TransferRequest,
    MAX_JOB_ID_LEN, ORPHANED_REASON,
};
pub use purge::spawn_purge_loop;
pub use registry::HandleRegistry;
pub use writer::JobWriter;

pub(crate) use task::{JobTask, TaskExit};
