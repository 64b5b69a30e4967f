pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    timeout::timeout_problem_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::SessionConfig;
use crate::dtos::auth::HealthResponse;
use crate::services::{JwtService, SessionService};
use crate::store::SessionStore;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh_token,
        handlers::auth::revoke_token,
        handlers::user::get_me,
        handlers::user::delete_me,
    ),
    components(
        schemas(
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::AuthenticationResponse,
            dtos::auth::IdentityResponse,
            dtos::auth::HealthResponse,
            dtos::ProblemDetails,
            services::AccessToken,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login and refresh token lifecycle"),
        (name = "Users", description = "The authenticated identity"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SessionConfig>,
    pub store: Arc<dyn SessionStore>,
    pub jwt: JwtService,
    pub sessions: Arc<SessionService>,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let authenticated = Router::new()
        .route(
            "/api/users/me",
            get(handlers::user::get_me).delete(handlers::user::delete_me),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = cors_layer(&state.config.security.allowed_origins)?;
    let timeout = Duration::from_secs(state.config.security.request_timeout_seconds);

    let app = Router::new()
        .route("/api/healthz", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route("/api/auth/token/refresh", post(handlers::auth::refresh_token))
        .route(
            "/api/auth/token/revoke",
            delete(handlers::auth::revoke_token),
        )
        .merge(login_route)
        .merge(register_route)
        .merge(authenticated)
        .with_state(state)
        .layer(cors)
        .layer(TimeoutLayer::new(timeout))
        .layer(from_fn(timeout_problem_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware));

    Ok(app)
}

/// Origins are validated up front; a malformed entry is a configuration
/// error rather than a silent wildcard. A literal `*` (development only)
/// allows any origin but drops credentialed requests.
fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(AllowOrigin::any()));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/api/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Backing store is unreachable", body = dtos::ProblemDetails)
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.ping().await.map_err(|e| {
        AppError::ServiceUnavailable(anyhow::Error::new(e).context("Store health check failed"))
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    }))
}
