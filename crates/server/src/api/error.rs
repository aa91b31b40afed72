//! Mapping of job errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use jobhub_core::JobError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// Request could not be read (bad multipart, missing field).
    BadRequest(String),
    Job(JobError),
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        ApiError::Job(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(e) => match e {
                JobError::InvalidInput(_) | JobError::InvalidState(_) => StatusCode::BAD_REQUEST,
                JobError::NotFound(_) => StatusCode::NOT_FOUND,
                JobError::Conflict(_) | JobError::NotControllable(_) => StatusCode::CONFLICT,
                JobError::Engine(_) | JobError::Extractor(_) | JobError::Transcoder(_) => {
                    StatusCode::BAD_GATEWAY
                }
                JobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(message) => message,
            ApiError::Job(e) => {
                if !e.is_client_error() {
                    warn!(error = %e, "Request failed");
                }
                e.to_string()
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
