use crate::error::Problem;
use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id assigned to the current request, readable by handlers and
/// span makers further down the stack.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Propagates (or assigns) `x-request-id` and stamps it as the `instance`
/// of any problem response produced below this layer.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    let unstamped = matches!(
        response.extensions().get::<Problem>(),
        Some(problem) if problem.instance.is_none()
    );
    if unstamped {
        if let Some(problem) = response.extensions_mut().remove::<Problem>() {
            response = restamp(response, problem.with_instance(request_id.clone()));
        }
    }

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Re-renders `problem` while keeping the headers of the original response
/// (cookies, `Retry-After`) except the body-describing ones.
fn restamp(original: Response, problem: Problem) -> Response {
    let (parts, _) = original.into_parts();
    let mut response = problem.into_response();

    for (name, value) in parts.headers.iter() {
        if name == header::CONTENT_TYPE || name == header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/missing",
                get(|| async {
                    Err::<(), _>(AppError::TooManyRequests("slow down".to_string(), Some(7)))
                }),
            )
            .route("/ok", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_problem_instance_echoes_request_id() {
        let res = app()
            .oneshot(
                Request::builder()
                    .uri("/missing")
                    .header(REQUEST_ID_HEADER, "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[REQUEST_ID_HEADER], "req-123");
        assert_eq!(res.headers()[header::RETRY_AFTER], "7");

        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let problem: Problem = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem.instance.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn test_request_id_generated_when_absent() {
        let res = app()
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = res.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
