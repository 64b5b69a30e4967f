use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

pub const BAD_REQUEST_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.1";
pub const UNAUTHORIZED_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7235#section-3.1";
pub const NOT_FOUND_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.4";
pub const CONFLICT_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.8";
pub const REQUEST_TIMEOUT_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.7";
pub const TOO_MANY_REQUESTS_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc6585#section-4";
pub const INTERNAL_TYPE: &str = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.6.1";
pub const SERVICE_UNAVAILABLE_TYPE: &str =
    "https://datatracker.ietf.org/doc/html/rfc7231#section-6.6.4";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    /// The outermost context of the error is shown to the caller; the
    /// rest of the chain is only logged.
    #[error("Internal server error: {0:#}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err).context("I/O failure"))
    }
}

/// RFC 7807 problem details body.
///
/// `instance` is left empty by handlers and filled with the request id by
/// [`crate::middleware::tracing::request_id_middleware`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl Problem {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        let (problem_type, title) = match status {
            StatusCode::BAD_REQUEST => (BAD_REQUEST_TYPE, "Bad Request"),
            StatusCode::UNAUTHORIZED => (UNAUTHORIZED_TYPE, "Unauthorized"),
            StatusCode::NOT_FOUND => (NOT_FOUND_TYPE, "Resource Not Found"),
            StatusCode::CONFLICT => (CONFLICT_TYPE, "Conflict"),
            StatusCode::REQUEST_TIMEOUT => (REQUEST_TIMEOUT_TYPE, "Request Timeout"),
            StatusCode::TOO_MANY_REQUESTS => (TOO_MANY_REQUESTS_TYPE, "Too Many Requests"),
            StatusCode::SERVICE_UNAVAILABLE => (SERVICE_UNAVAILABLE_TYPE, "Service Unavailable"),
            _ => (INTERNAL_TYPE, "Internal Server Error"),
        };

        Self {
            problem_type: problem_type.to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
            instance: None,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let mut res = (self.status_code(), Json(self.clone())).into_response();
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        // Lets outer middleware re-render the body once the request id is known.
        res.extensions_mut().insert(self);
        res
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (problem, retry_after) = match self {
            AppError::ValidationError(err) => (
                Problem::new(StatusCode::BAD_REQUEST, validation_detail(&err)),
                None,
            ),
            AppError::BadRequest(err) => (Problem::new(StatusCode::BAD_REQUEST, err.to_string()), None),
            AppError::Unauthorized(err) => {
                (Problem::new(StatusCode::UNAUTHORIZED, err.to_string()), None)
            }
            AppError::NotFound(err) => (Problem::new(StatusCode::NOT_FOUND, err.to_string()), None),
            AppError::Conflict(err) => (Problem::new(StatusCode::CONFLICT, err.to_string()), None),
            AppError::RequestTimeout => (
                Problem::new(
                    StatusCode::REQUEST_TIMEOUT,
                    "Request did not complete in time",
                ),
                None,
            ),
            AppError::TooManyRequests(msg, retry) => {
                (Problem::new(StatusCode::TOO_MANY_REQUESTS, msg), retry)
            }
            AppError::InternalError(err) => {
                tracing::error!(error = format!("{:#}", err), "Request failed with internal error");
                (
                    Problem::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                    None,
                )
            }
            AppError::ServiceUnavailable(err) => {
                tracing::error!(error = format!("{:#}", err), "Dependency unavailable");
                (
                    Problem::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Service is temporarily unavailable",
                    ),
                    None,
                )
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = format!("{:#}", err), "Configuration error");
                (
                    Problem::new(StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
                    None,
                )
            }
        };

        let mut res = problem.into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

fn validation_detail(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}
