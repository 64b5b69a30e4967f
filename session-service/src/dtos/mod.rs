pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// RFC 7807 problem body, as rendered by `service_core::error::Problem`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    #[schema(example = "https://datatracker.ietf.org/doc/html/rfc7231#section-6.5.1")]
    pub problem_type: String,
    #[schema(example = "Bad Request")]
    pub title: String,
    #[schema(example = 400)]
    pub status: u16,
    #[schema(example = "Invalid username or password")]
    pub detail: Option<String>,
    #[schema(example = "0b7e5f1c-6f1e-4f55-9d8a-2d3c9b7c1a10")]
    pub instance: Option<String>,
}
