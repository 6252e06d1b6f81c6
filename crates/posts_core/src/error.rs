use thiserror::Error;

/// The only failure a use case can observe: the transport could not complete
/// the request. Its message is what ends up in `StoreState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        Self {
            status: value.status().map(|status| status.as_u16()),
            message: value.to_string(),
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(value: url::ParseError) -> Self {
        Self::new(format!("invalid posts api url: {value}"))
    }
}
