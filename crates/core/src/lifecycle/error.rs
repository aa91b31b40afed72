use thiserror::Error;

use crate::engine::EngineError;
use crate::extractor::ExtractorError;
use crate::job::StoreError;
use crate::transcoder::TranscoderError;

/// Caller-facing error of every job operation.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed id, URL, descriptor, format or selection.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// The job exists but its status does not allow the request.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The job's record survives but nothing in this process controls it.
    #[error("Job is not controllable: {0}")]
    NotControllable(String),

    #[error("Job already exists: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Extractor error: {0}")]
    Extractor(#[from] ExtractorError),

    #[error("Transcoder error: {0}")]
    Transcoder(#[from] TranscoderError),
}

impl JobError {
    /// Whether the caller, not a collaborator, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::NotFound(_)
                | Self::InvalidState(_)
                | Self::NotControllable(_)
                | Self::Conflict(_)
        )
    }

    /// The store no longer has the record (deleted or expired).
    pub(crate) fn is_vanished(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(JobError::InvalidInput("x".into()).is_client_error());
        assert!(JobError::Conflict("x".into()).is_client_error());
        assert!(!JobError::Engine(EngineError::Timeout).is_client_error());
        assert!(!JobError::Store(StoreError::Poisoned).is_client_error());
    }

    #[test]
    fn test_vanished() {
        assert!(JobError::Store(StoreError::NotFound("a".into())).is_vanished());
        assert!(!JobError::NotFound("a".into()).is_vanished());
    }
}
