use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

/// Classification of a failed session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Conflict,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a session operation. Every variant carries the detail shown to
/// the caller; `Internal` also keeps its cause, which is only logged.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{detail}")]
    Internal {
        detail: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SessionError {
    pub fn internal(detail: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        SessionError::Internal {
            detail: detail.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::BadRequest(_) => ErrorKind::BadRequest,
            SessionError::Conflict(_) => ErrorKind::Conflict,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            SessionError::BadRequest(detail)
            | SessionError::Conflict(detail)
            | SessionError::NotFound(detail)
            | SessionError::Internal { detail, .. } => detail,
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::BadRequest(detail) => AppError::BadRequest(anyhow::anyhow!(detail)),
            SessionError::Conflict(detail) => AppError::Conflict(anyhow::anyhow!(detail)),
            SessionError::NotFound(detail) => AppError::NotFound(anyhow::anyhow!(detail)),
            // The detail becomes the outermost context, so it is what the
            // caller sees while the cause chain is still logged.
            SessionError::Internal { detail, source } => AppError::InternalError(source.context(detail)),
        }
    }
}
