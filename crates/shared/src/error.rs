use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Unauthorized,
    Throttled,
    Unavailable,
    Internal,
}

/// Failure reported by a Remote Data Service implementation.
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct RemoteCallError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteCallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }
}
