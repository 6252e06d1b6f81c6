use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    RateLimited,
    Internal,
    #[serde(other)]
    Unknown,
}

/// Error body a posts API may return alongside a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default = "unknown_code")]
    pub code: ErrorCode,
    pub message: String,
}

fn unknown_code() -> ErrorCode {
    ErrorCode::Unknown
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
