use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::{auth::IdentityResponse, ProblemDetails},
    handlers::carrier,
    middleware::AuthIdentity,
    AppState,
};

/// Profile of the authenticated identity
#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Current identity", body = IdentityResponse),
        (status = 401, description = "Missing or invalid access token", body = ProblemDetails),
        (status = 404, description = "Identity no longer exists", body = ProblemDetails)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_me(
    State(state): State<AppState>,
    AuthIdentity(identity_id): AuthIdentity,
) -> Result<impl IntoResponse, AppError> {
    let identity = state.sessions.identity(identity_id).await?;
    Ok(Json(IdentityResponse::from(identity)))
}

/// Delete the authenticated identity together with its refresh token
#[utoipa::path(
    delete,
    path = "/api/users/me",
    responses(
        (status = 204, description = "Identity deleted, cookie cleared"),
        (status = 401, description = "Missing or invalid access token", body = ProblemDetails),
        (status = 404, description = "Identity no longer exists", body = ProblemDetails)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthIdentity(identity_id): AuthIdentity,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.sessions.delete_identity(identity_id).await?;

    let jar = carrier::apply(jar, &outcome.effect, state.config.security.cookie_secure);
    Ok((StatusCode::NO_CONTENT, jar))
}
