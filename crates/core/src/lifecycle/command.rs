use tokio::sync::oneshot;

use super::JobError;
use crate::job::Job;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, JobError>>;

/// Control request delivered to a job's monitoring task.
///
/// The task performs the engine call and the resulting store write itself,
/// then answers on `reply`.
pub(crate) enum JobCommand {
    Select {
        indices: Vec<usize>,
        reply: Reply<Job>,
    },
    Pause {
        reply: Reply<Job>,
    },
    Resume {
        reply: Reply<Job>,
    },
    Remove {
        delete_files: bool,
        reply: Reply<()>,
    },
}

impl JobCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            JobCommand::Select { .. } => "select",
            JobCommand::Pause { .. } => "pause",
            JobCommand::Resume { .. } => "resume",
            JobCommand::Remove { .. } => "remove",
        }
    }

    /// Answer with an error, whatever the command was.
    pub(crate) fn reject(self, error: JobError) {
        // The caller may have given up waiting
        match self {
            JobCommand::Select { reply, .. }
            | JobCommand::Pause { reply }
            | JobCommand::Resume { reply } => {
                let _ = reply.send(Err(error));
            }
            JobCommand::Remove { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}
