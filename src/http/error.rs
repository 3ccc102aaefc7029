use rouille::Response;
use thiserror::Error;

use crate::storage::error::StorageError;
use crate::sweep::SweepError;

/// Errors reported to HTTP clients as a JSON body with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("video not found")]
    VideoNotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::VideoNotFound => 404,
            ApiError::BadRequest(_) => 400,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            log::error!("request failed: {detail}");
        }
        Response::json(&serde_json::json!({ "error": self.to_string() }))
            .with_status_code(self.status_code())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<SweepError> for ApiError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::NotFound => ApiError::VideoNotFound,
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
