use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::auth::{AuthenticationResponse, LoginRequest, RegisterRequest},
    dtos::ProblemDetails,
    handlers::carrier,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a new identity
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Identity created, refresh token cookie set", body = AuthenticationResponse),
        (status = 400, description = "Missing username or password", body = ProblemDetails),
        (status = 409, description = "Username is already in use", body = ProblemDetails),
        (status = 429, description = "Too many registration attempts", body = ProblemDetails),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .sessions
        .register(&req.username, Password::new(req.password))
        .await?;

    let jar = carrier::apply(jar, &outcome.effect, state.config.security.cookie_secure);
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthenticationResponse::from(outcome.result)),
    ))
}

/// Log in with username and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, refresh token cookie set", body = AuthenticationResponse),
        (status = 400, description = "Invalid username or password", body = ProblemDetails),
        (status = 429, description = "Too many login attempts", body = ProblemDetails),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .sessions
        .login(&req.username, Password::new(req.password))
        .await?;

    let jar = carrier::apply(jar, &outcome.effect, state.config.security.cookie_secure);
    Ok((jar, Json(AuthenticationResponse::from(outcome.result))))
}

/// Exchange the refresh token cookie for a new access token
#[utoipa::path(
    post,
    path = "/api/auth/token/refresh",
    responses(
        (status = 200, description = "New access token issued", body = AuthenticationResponse),
        (status = 400, description = "Malformed refresh token or identity no longer exists", body = ProblemDetails),
        (status = 404, description = "Refresh token missing or unknown", body = ProblemDetails),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    ),
    tag = "Authentication"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let value = carrier::extract(&jar)?;
    let outcome = state.sessions.refresh_token(&value).await?;

    let jar = carrier::apply(jar, &outcome.effect, state.config.security.cookie_secure);
    Ok((jar, Json(AuthenticationResponse::from(outcome.result))))
}

/// Revoke the refresh token held in the cookie
#[utoipa::path(
    delete,
    path = "/api/auth/token/revoke",
    responses(
        (status = 204, description = "Refresh token revoked, cookie cleared"),
        (status = 400, description = "Malformed refresh token", body = ProblemDetails),
        (status = 404, description = "Refresh token missing or unknown", body = ProblemDetails),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    ),
    tag = "Authentication"
)]
pub async fn revoke_token(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let value = carrier::extract(&jar)?;
    let outcome = state.sessions.revoke_token(&value).await?;

    let jar = carrier::apply(jar, &outcome.effect, state.config.security.cookie_secure);
    Ok((StatusCode::NO_CONTENT, jar))
}
