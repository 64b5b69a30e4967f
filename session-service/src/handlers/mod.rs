//! HTTP handlers for the session API.

pub mod auth;
pub mod carrier;
pub mod metrics;
pub mod user;
