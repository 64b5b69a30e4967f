//! Persistence contracts for identities and refresh tokens.
//!
//! Stores work on raw token bytes only; hex encoding belongs to the HTTP
//! layer.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identity, RefreshToken};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Name of the unique constraint on `identities.username`.
pub const USERNAME_CONSTRAINT: &str = "identities_username_key";

/// Name of the unique constraint on `refresh_tokens.identity_id`.
pub const REFRESH_TOKEN_IDENTITY_CONSTRAINT: &str = "refresh_tokens_identity_id_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }

        StoreError::Backend(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fails with [`StoreError::UniqueViolation`] when the username is taken.
    async fn create_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError>;

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Deletes the identity and, by cascade, its refresh tokens. Returns the
    /// number of identities removed.
    async fn delete_identity(&self, id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    async fn find_refresh_token_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError>;

    async fn find_refresh_token(&self, token: &[u8]) -> Result<Option<RefreshToken>, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_refresh_token(&self, token: &[u8]) -> Result<u64, StoreError>;

    /// Stores `candidate` unless its identity already owns a token, in a
    /// single atomic step. Returns whichever row is stored afterwards.
    async fn find_or_create_refresh_token(
        &self,
        candidate: &RefreshToken,
    ) -> Result<RefreshToken, StoreError>;
}

/// A unit of work over both stores. Dropping it without calling
/// [`StoreTransaction::commit`] discards every write.
#[async_trait]
pub trait StoreTransaction: IdentityStore + RefreshTokenStore {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: IdentityStore + RefreshTokenStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Reachability check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
