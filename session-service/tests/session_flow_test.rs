//! Register, login, refresh and revoke over HTTP.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{assert_problem, json_body, json_post, refresh_cookie_value, set_cookie, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn test_register_then_login_reuses_refresh_token() {
    let app = TestApp::new();

    let registered = app.register("alice", "Secr3t!").await;
    assert_eq!(registered.status(), StatusCode::CREATED);

    let cookie_line = set_cookie(&registered).expect("register sets the refresh cookie");
    assert!(cookie_line.contains("HttpOnly"));
    assert!(cookie_line.contains("Path=/"));
    assert!(cookie_line.contains("SameSite=Lax"));

    let register_token = refresh_cookie_value(&registered).unwrap();
    assert_eq!(register_token.len(), 64);

    let body = json_body(registered).await;
    let identity_id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
    assert!(body["accessToken"]["value"].is_string());
    assert!(body["accessToken"]["expiresAt"].is_string());

    let login = app.login("alice", "Secr3t!").await;
    assert_eq!(login.status(), StatusCode::OK);
    assert_eq!(refresh_cookie_value(&login).as_deref(), Some(register_token.as_str()));

    let body = json_body(login).await;
    assert_eq!(body["id"], identity_id.to_string());

    let claims = app
        .state
        .jwt
        .verify_access_token(body["accessToken"]["value"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.identity_id().unwrap(), identity_id);
    assert_eq!(app.store.refresh_token_count(), 1);
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let app = TestApp::new();

    assert_eq!(app.register("bob", "pw").await.status(), StatusCode::CREATED);

    let duplicate = app.register("bob", "another").await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert!(set_cookie(&duplicate).is_none());

    let body = json_body(duplicate).await;
    assert_problem(StatusCode::CONFLICT, &body, "Username is already in use");
    assert_eq!(app.store.identity_count(), 1);
}

#[tokio::test]
async fn test_register_requires_both_fields() {
    let app = TestApp::new();

    let response = app.register("", "pw").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_problem(StatusCode::BAD_REQUEST, &body, "Username is required");

    let response = app
        .send(json_post(
            "/api/auth/register",
            serde_json::json!({ "username": "carol" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.identity_count(), 0);
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = TestApp::new();
    app.register("dave", "right").await;

    let wrong_password = app.login("dave", "wrong").await;
    assert_eq!(wrong_password.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&wrong_password).is_none());
    let mut wrong_password = json_body(wrong_password).await;

    let unknown_user = app.login("nobody", "right").await;
    assert_eq!(unknown_user.status(), StatusCode::BAD_REQUEST);
    let mut unknown_user = json_body(unknown_user).await;

    assert_problem(StatusCode::BAD_REQUEST, &wrong_password, "Invalid username or password");

    // Only the correlation id may differ.
    let wrong_instance = wrong_password.as_object_mut().unwrap().remove("instance");
    let unknown_instance = unknown_user.as_object_mut().unwrap().remove("instance");
    assert!(wrong_instance.is_some());
    assert_ne!(wrong_instance, unknown_instance);
    assert_eq!(
        serde_json::to_vec(&wrong_password).unwrap(),
        serde_json::to_vec(&unknown_user).unwrap()
    );
}

#[tokio::test]
async fn test_refresh_issues_new_access_token_without_rotation() {
    let app = TestApp::new();
    let registered = app.register("erin", "pw").await;
    let token = refresh_cookie_value(&registered).unwrap();
    let identity_id = json_body(registered).await["id"].clone();

    let first = app.refresh(Some(&token)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(refresh_cookie_value(&first).as_deref(), Some(token.as_str()));
    let first = json_body(first).await;
    assert_eq!(first["id"], identity_id);

    let second = app.refresh(Some(&token)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(refresh_cookie_value(&second).as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_revoke_then_refresh_is_not_found() {
    let app = TestApp::new();
    let registered = app.register("frank", "pw").await;
    let token = refresh_cookie_value(&registered).unwrap();

    let revoked = app.revoke(Some(&token)).await;
    assert_eq!(revoked.status(), StatusCode::NO_CONTENT);
    let cleared = set_cookie(&revoked).expect("revoke clears the cookie");
    assert!(cleared.starts_with("refresh-token=;"));
    assert!(cleared.contains("Max-Age=0"));

    let refresh = app.refresh(Some(&token)).await;
    assert_eq!(refresh.status(), StatusCode::NOT_FOUND);
    let body = json_body(refresh).await;
    assert_problem(StatusCode::NOT_FOUND, &body, "Refresh token could not be found");

    let again = app.revoke(Some(&token)).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
    assert!(set_cookie(&again).is_none());
}

#[tokio::test]
async fn test_login_after_revoke_mints_a_fresh_token() {
    let app = TestApp::new();
    let registered = app.register("grace", "pw").await;
    let original = refresh_cookie_value(&registered).unwrap();

    app.revoke(Some(&original)).await;

    let login = app.login("grace", "pw").await;
    assert_eq!(login.status(), StatusCode::OK);
    let fresh = refresh_cookie_value(&login).unwrap();
    assert_ne!(fresh, original);
    assert_eq!(app.store.refresh_token_count(), 1);
}

#[tokio::test]
async fn test_missing_cookie_cannot_be_extracted() {
    let app = TestApp::new();

    let refresh = app.refresh(None).await;
    assert_eq!(refresh.status(), StatusCode::NOT_FOUND);
    let body = json_body(refresh).await;
    assert_problem(StatusCode::NOT_FOUND, &body, "Refresh token could not be extracted");

    let revoke = app.revoke(None).await;
    assert_eq!(revoke.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_cookie_is_bad_request() {
    let app = TestApp::new();

    let refresh = app.refresh(Some("not-hex")).await;
    assert_eq!(refresh.status(), StatusCode::BAD_REQUEST);
    let body = json_body(refresh).await;
    assert_problem(StatusCode::BAD_REQUEST, &body, "Refresh token could not be decoded");

    let revoke = app.revoke(Some("zz")).await;
    assert_eq!(revoke.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_well_formed_unknown_token_is_not_found() {
    let app = TestApp::new();

    let response = app.refresh(Some(&"ab".repeat(32))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refresh_with_dangling_identity_is_bad_request() {
    let app = TestApp::new();
    let registered = app.register("heidi", "pw").await;
    let token = refresh_cookie_value(&registered).unwrap();
    let id: Uuid = json_body(registered).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    assert!(app.store.detach_identity(id));

    let response = app.refresh(Some(&token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_problem(
        StatusCode::BAD_REQUEST,
        &body,
        "Identity attached to this refresh token no longer exists",
    );
}

#[tokio::test]
async fn test_expired_token_still_refreshes_by_default() {
    let app = TestApp::new();
    let registered = app.register("ivan", "pw").await;
    let token = refresh_cookie_value(&registered).unwrap();

    let raw = hex::decode(&token).unwrap();
    assert!(app
        .store
        .set_refresh_token_expiry(&raw, Utc::now() - Duration::days(1)));

    assert_eq!(app.refresh(Some(&token)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_token_rejected_when_enforced() {
    let app = TestApp::with_vars(&[("ENFORCE_REFRESH_TOKEN_EXPIRY", "true")]);
    let registered = app.register("judy", "pw").await;
    let token = refresh_cookie_value(&registered).unwrap();

    let raw = hex::decode(&token).unwrap();
    app.store
        .set_refresh_token_expiry(&raw, Utc::now() - Duration::days(1));

    assert_eq!(app.refresh(Some(&token)).await.status(), StatusCode::NOT_FOUND);

    let login = app.login("judy", "pw").await;
    assert_eq!(login.status(), StatusCode::OK);
    assert_ne!(refresh_cookie_value(&login).unwrap(), token);
    assert_eq!(app.store.refresh_token_count(), 1);
}

#[tokio::test]
async fn test_failed_token_insert_rolls_back_registration() {
    let app = TestApp::new();
    app.store.fail_next_refresh_token_insert();

    let response = app.register("mallory", "pw").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookie(&response).is_none());
    assert_eq!(app.store.identity_count(), 0);
    assert_eq!(app.store.refresh_token_count(), 0);

    assert_eq!(app.register("mallory", "pw").await.status(), StatusCode::CREATED);
}
