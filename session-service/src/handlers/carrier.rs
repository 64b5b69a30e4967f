//! The refresh-token cookie.
//!
//! The raw token bytes travel hex-encoded in an `HttpOnly` cookie so the
//! browser never exposes them to scripts.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;
use time::{Duration, OffsetDateTime};

use crate::models::RefreshToken;
use crate::services::SessionEffect;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh-token";

/// Read the hex carrier value from the request cookies.
pub fn extract(jar: &CookieJar) -> Result<String, AppError> {
    jar.get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Refresh token could not be extracted")))
}

/// Apply a session side effect to the outgoing cookie jar.
pub fn apply(jar: CookieJar, effect: &SessionEffect, secure: bool) -> CookieJar {
    match effect {
        SessionEffect::SetRefreshToken(token) => jar.add(refresh_cookie(token, secure)),
        SessionEffect::ClearRefreshToken => jar.add(cleared_cookie(secure)),
    }
}

fn refresh_cookie(token: &RefreshToken, secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(token.to_hex(), secure);
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(token.expires_at.timestamp()) {
        cookie.set_expires(expires);
    }
    cookie
}

fn cleared_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(String::new(), secure);
    cookie.set_max_age(Duration::ZERO);
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}

fn base_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_TOKEN_COOKIE, value))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}
