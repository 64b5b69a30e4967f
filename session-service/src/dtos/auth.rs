use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Identity;
use crate::services::{AccessToken, AuthenticationResult};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Secr3t!")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Secr3t!")]
    pub password: String,
}

/// Body returned by register, login and refresh. The refresh token travels
/// only in the cookie.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    pub access_token: AccessToken,
}

impl From<AuthenticationResult> for AuthenticationResponse {
    fn from(result: AuthenticationResult) -> Self {
        Self {
            id: result.identity_id,
            access_token: result.access_token,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub id: Uuid,
    #[schema(example = "alice")]
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            created_at: identity.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "session-service")]
    pub service: String,
    #[schema(example = "1.0.0")]
    pub version: String,
}
