use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Reason a batch request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKey {
    InvalidContentId,
    InvalidContentType,
    InvalidMethod,
    MissingBoundary,
    MissingCloseDelimiter,
    InvalidHeader,
    InvalidRequestLine,
    InvalidStatusLine,
    InvalidUri,
    InvalidChangesetMethod,
    MissingContentId,
    DuplicateContentId,
    TooManyParts,
    HandlerFailure,
}

impl MessageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::InvalidContentId => "INVALID_CONTENT_ID",
            MessageKey::InvalidContentType => "INVALID_CONTENT_TYPE",
            MessageKey::InvalidMethod => "INVALID_METHOD",
            MessageKey::MissingBoundary => "MISSING_BOUNDARY",
            MessageKey::MissingCloseDelimiter => "MISSING_CLOSE_DELIMITER",
            MessageKey::InvalidHeader => "INVALID_HEADER",
            MessageKey::InvalidRequestLine => "INVALID_REQUEST_LINE",
            MessageKey::InvalidStatusLine => "INVALID_STATUS_LINE",
            MessageKey::InvalidUri => "INVALID_URI",
            MessageKey::InvalidChangesetMethod => "INVALID_CHANGESET_METHOD",
            MessageKey::MissingContentId => "MISSING_CONTENT_ID",
            MessageKey::DuplicateContentId => "DUPLICATE_CONTENT_ID",
            MessageKey::TooManyParts => "TOO_MANY_PARTS",
            MessageKey::HandlerFailure => "HANDLER_FAILURE",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{key}: {message}")]
pub struct BatchError {
    pub key: MessageKey,
    pub message: String,
}

impl BatchError {
    pub fn new(key: MessageKey, message: impl Into<String>) -> Self {
        BatchError {
            key,
            message: message.into(),
        }
    }

    pub fn invalid_content_id(message: impl Into<String>) -> Self {
        Self::new(MessageKey::InvalidContentId, message)
    }

    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::new(MessageKey::InvalidHeader, message)
    }

    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self::new(MessageKey::HandlerFailure, message)
    }

    /// Malformed batches are client errors; a failing handler is not.
    pub fn status_code(&self) -> u16 {
        match self.key {
            MessageKey::HandlerFailure => 500,
            _ => 400,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.key.as_str(),
                "message": self.message,
            }
        })
    }
}

pub type BatchResult<T> = Result<T, BatchError>;
