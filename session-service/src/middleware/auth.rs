use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{services::AccessTokenClaims, AppState};

/// Require a valid `Authorization: Bearer <access token>` header.
///
/// Verified claims are stored in the request extensions for
/// [`AuthIdentity`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.verify_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired access token"))
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Identity id of the authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthIdentity(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth claims missing from request extensions"
            ))
        })?;

        let identity_id = claims
            .identity_id()
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired access token")))?;

        Ok(AuthIdentity(identity_id))
    }
}
