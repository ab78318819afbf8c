use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::services::{recorder::RecorderError, stream_buffer::BufferError};

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let details = self.details;

        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

impl From<http::Error> for ApiError {
    fn from(err: http::Error) -> Self {
        Self::internal_server_error(err.to_string())
    }
}

impl From<BufferError> for ApiError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Store(source) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "buffer_unavailable", source.to_string())
            }
            BufferError::Serialization(source) => {
                Self::internal_server_error("buffered record is corrupt")
                    .with_details(json!({ "reason": source.to_string() }))
            }
        }
    }
}

impl From<RecorderError> for ApiError {
    fn from(err: RecorderError) -> Self {
        let message = err.to_string();
        match err {
            RecorderError::UnknownStream(stream_id) => {
                Self::not_found(message).with_details(json!({ "stream_id": stream_id }))
            }
            RecorderError::Finished(stream_id) => Self::conflict("stream_finished", message)
                .with_details(json!({ "stream_id": stream_id })),
            RecorderError::Superseded(stream_id) => Self::conflict("stream_restarted", message)
                .with_details(json!({ "stream_id": stream_id })),
            RecorderError::InvalidStatus(_)
            | RecorderError::MissingParticipantTotal(_)
            | RecorderError::ParticipantOutOfRange { .. } => {
                Self::bad_request("validation_failed", message)
            }
            RecorderError::Buffer(buffer) => Self::from(buffer),
        }
    }
}
