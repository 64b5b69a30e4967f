//! Session business logic: token signing, the session orchestrator, and
//! its error and metrics plumbing.

pub mod error;
pub mod jwt;
pub mod metrics;
pub mod session;

pub use error::{ErrorKind, SessionError};
pub use jwt::{AccessToken, AccessTokenClaims, JwtService};
pub use session::{
    AuthenticationResult, SessionEffect, SessionOutcome, SessionService, SessionSettings,
};
