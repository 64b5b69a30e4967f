use crate::error::{AppError, Problem};
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Renders the bare `408` produced by `tower_http::timeout::TimeoutLayer`
/// as a problem response. Must sit directly outside the timeout layer.
pub async fn timeout_problem_middleware(req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    if response.status() == StatusCode::REQUEST_TIMEOUT
        && response.extensions().get::<Problem>().is_none()
    {
        tracing::warn!("Request timed out");
        return AppError::RequestTimeout.into_response();
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PROBLEM_CONTENT_TYPE, REQUEST_TIMEOUT_TYPE};
    use crate::middleware::tracing::{REQUEST_ID_HEADER, request_id_middleware};
    use axum::{Router, body::Body, http::header, middleware, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;
    use tower_http::timeout::TimeoutLayer;

    fn app() -> Router {
        Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route("/fast", get(|| async { "ok" }))
            .layer(TimeoutLayer::new(Duration::from_millis(20)))
            .layer(middleware::from_fn(timeout_problem_middleware))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_timeout_renders_problem_with_instance() {
        let res = app()
            .oneshot(
                Request::builder()
                    .uri("/slow")
                    .header(REQUEST_ID_HEADER, "req-timeout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(res.headers()[header::CONTENT_TYPE], PROBLEM_CONTENT_TYPE);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let problem: Problem = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem.problem_type, REQUEST_TIMEOUT_TYPE);
        assert_eq!(problem.title, "Request Timeout");
        assert_eq!(problem.status, 408);
        assert_eq!(problem.instance.as_deref(), Some("req-timeout"));
    }

    #[tokio::test]
    async fn test_fast_response_passes_through() {
        let res = app()
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }
}
