use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    PreconditionFailed,
    PreconditionRequired,
    NotImplemented,
    Internal,
}

impl ErrorCode {
    /// HTTP status the code maps to when the error leaves the service.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::PreconditionFailed => 412,
            ErrorCode::PreconditionRequired => 428,
            ErrorCode::NotImplemented => 501,
            ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::PreconditionRequired => "precondition_required",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Application-level error raised while evaluating query options or
/// serving a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ODataError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ODataError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ODataError {
            code,
            message: message.into(),
            target: None,
            details: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// A literal or value could not be converted to the requested EDM type.
    pub fn cast_failed(value: impl fmt::Display, target: impl fmt::Display) -> Self {
        Self::bad_request(format!("Cast of '{}' to {} failed", value, target))
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    /// JSON error body in the OData v4 `{"error": {...}}` shape.
    pub fn to_json(&self) -> Value {
        let mut error = serde_json::json!({
            "code": self.code.to_string(),
            "message": self.message,
        });
        if let Some(target) = &self.target {
            error["target"] = Value::String(target.clone());
        }
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        serde_json::json!({ "error": error })
    }
}

impl fmt::Display for ODataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ODataError {}

impl From<serde_json::Error> for ODataError {
    fn from(err: serde_json::Error) -> Self {
        ODataError::bad_request(format!("JSON error: {}", err))
    }
}

impl From<crate::etag::PreconditionError> for ODataError {
    fn from(err: crate::etag::PreconditionError) -> Self {
        let code = match err {
            crate::etag::PreconditionError::Failed(_) => ErrorCode::PreconditionFailed,
            crate::etag::PreconditionError::Required => ErrorCode::PreconditionRequired,
        };
        ODataError::new(code, err.to_string())
    }
}

impl From<crate::query::parser::ParseError> for ODataError {
    fn from(err: crate::query::parser::ParseError) -> Self {
        ODataError::bad_request(err.to_string())
    }
}

pub type ODataResult<T> = Result<T, ODataError>;
