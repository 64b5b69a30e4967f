//! Shared setup for the HTTP integration tests. Every app runs on a fresh
//! in-memory store, so no external services are needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use service_core::config::Config;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use session_service::{
    build_router,
    config::SessionConfig,
    services::{JwtService, SessionService},
    store::MemoryStore,
    AppState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const REFRESH_COOKIE: &str = "refresh-token";

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    /// Build an app whose configuration reads only from `vars`.
    pub fn with_vars(vars: &[(&str, &str)]) -> Self {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = SessionConfig::from_lookup(Config::default(), |key| vars.get(key).cloned())
            .expect("test configuration should be valid");

        let store = MemoryStore::new();
        let jwt = JwtService::new(&config.jwt).expect("JWT service");
        let sessions = SessionService::new(
            Arc::new(store.clone()),
            jwt.clone(),
            config.session_settings(),
            tracing::Span::none(),
        );

        let state = AppState {
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            register_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.register_attempts,
                config.rate_limit.register_window_seconds,
            ),
            config: Arc::new(config),
            store: Arc::new(store.clone()),
            jwt,
            sessions: Arc::new(sessions),
        };

        let router = build_router(state.clone()).expect("router");
        Self {
            router,
            store,
            state,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn register(&self, username: &str, password: &str) -> Response<Body> {
        self.send(json_post(
            "/api/auth/register",
            serde_json::json!({ "username": username, "password": password }),
        ))
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Response<Body> {
        self.send(json_post(
            "/api/auth/login",
            serde_json::json!({ "username": username, "password": password }),
        ))
        .await
    }

    pub async fn refresh(&self, cookie: Option<&str>) -> Response<Body> {
        self.send(with_cookie("POST", "/api/auth/token/refresh", cookie)).await
    }

    pub async fn revoke(&self, cookie: Option<&str>) -> Response<Body> {
        self.send(with_cookie("DELETE", "/api/auth/token/revoke", cookie)).await
    }
}

pub fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_cookie(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = cookie {
        builder = builder.header(header::COOKIE, format!("{}={}", REFRESH_COOKIE, value));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// The raw `Set-Cookie` line for the refresh token, if any.
pub fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&format!("{}=", REFRESH_COOKIE)))
        .map(str::to_string)
}

/// The refresh token value carried in the response cookie.
pub fn refresh_cookie_value(response: &Response<Body>) -> Option<String> {
    set_cookie(response).and_then(|line| {
        line.split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
    })
}

pub fn assert_problem(status: StatusCode, body: &serde_json::Value, detail: &str) {
    assert_eq!(body["status"], status.as_u16());
    assert_eq!(body["detail"], detail);
    assert!(body["type"].is_string());
    assert!(body["title"].is_string());
}
