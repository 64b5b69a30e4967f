use async_trait::async_trait;
use sqlx::{PgConnection, PgExecutor, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{IdentityStore, RefreshTokenStore, SessionStore, StoreError, StoreTransaction};
use crate::models::{Identity, RefreshToken};

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open transaction. `sqlx` rolls it back when dropped uncommitted.
pub struct PgTransaction {
    tx: Mutex<Transaction<'static, Postgres>>,
}

async fn insert_identity<'e, E: PgExecutor<'e>>(
    executor: E,
    identity: &Identity,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO identities (id, username, password_hash, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(identity.id)
    .bind(&identity.username)
    .bind(&identity.password_hash)
    .bind(identity.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

async fn select_identity_by_username<'e, E: PgExecutor<'e>>(
    executor: E,
    username: &str,
) -> Result<Option<Identity>, StoreError> {
    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, username, password_hash, created_at FROM identities WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(executor)
    .await?;

    Ok(identity)
}

async fn select_identity_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<Identity>, StoreError> {
    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, username, password_hash, created_at FROM identities WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(identity)
}

async fn remove_identity<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM identities WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

async fn insert_refresh_token<'e, E: PgExecutor<'e>>(
    executor: E,
    token: &RefreshToken,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token, identity_id, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&token.token)
    .bind(token.identity_id)
    .bind(token.created_at)
    .bind(token.expires_at)
    .execute(executor)
    .await?;

    Ok(())
}

async fn select_refresh_token_by_identity<'e, E: PgExecutor<'e>>(
    executor: E,
    identity_id: Uuid,
) -> Result<Option<RefreshToken>, StoreError> {
    let token = sqlx::query_as::<_, RefreshToken>(
        r#"
        SELECT token, identity_id, created_at, expires_at
        FROM refresh_tokens
        WHERE identity_id = $1
        "#,
    )
    .bind(identity_id)
    .fetch_optional(executor)
    .await?;

    Ok(token)
}

async fn select_refresh_token<'e, E: PgExecutor<'e>>(
    executor: E,
    token: &[u8],
) -> Result<Option<RefreshToken>, StoreError> {
    let token = sqlx::query_as::<_, RefreshToken>(
        r#"
        SELECT token, identity_id, created_at, expires_at
        FROM refresh_tokens
        WHERE token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(executor)
    .await?;

    Ok(token)
}

async fn remove_refresh_token<'e, E: PgExecutor<'e>>(
    executor: E,
    token: &[u8],
) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
        .bind(token)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Insert-if-absent keyed on the unique `identity_id` column. Concurrent
/// callers for the same identity all end up with the single stored row.
async fn upsert_refresh_token(
    conn: &mut PgConnection,
    candidate: &RefreshToken,
) -> Result<RefreshToken, StoreError> {
    let inserted = sqlx::query_as::<_, RefreshToken>(
        r#"
        INSERT INTO refresh_tokens (token, identity_id, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (identity_id) DO NOTHING
        RETURNING token, identity_id, created_at, expires_at
        "#,
    )
    .bind(&candidate.token)
    .bind(candidate.identity_id)
    .bind(candidate.created_at)
    .bind(candidate.expires_at)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(token) = inserted {
        return Ok(token);
    }

    select_refresh_token_by_identity(&mut *conn, candidate.identity_id)
        .await?
        .ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!(
                "Refresh token for identity {} was removed while being reused",
                candidate.identity_id
            ))
        })
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn create_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        insert_identity(&self.pool, identity).await
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        select_identity_by_username(&self.pool, username).await
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        select_identity_by_id(&self.pool, id).await
    }

    async fn delete_identity(&self, id: Uuid) -> Result<u64, StoreError> {
        remove_identity(&self.pool, id).await
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        insert_refresh_token(&self.pool, token).await
    }

    async fn find_refresh_token_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        select_refresh_token_by_identity(&self.pool, identity_id).await
    }

    async fn find_refresh_token(&self, token: &[u8]) -> Result<Option<RefreshToken>, StoreError> {
        select_refresh_token(&self.pool, token).await
    }

    async fn delete_refresh_token(&self, token: &[u8]) -> Result<u64, StoreError> {
        remove_refresh_token(&self.pool, token).await
    }

    async fn find_or_create_refresh_token(
        &self,
        candidate: &RefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_refresh_token(&mut *conn, candidate).await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx: Mutex::new(tx) }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::db::health_check(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgTransaction {
    async fn create_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut tx = self.tx.lock().await;
        insert_identity(&mut **tx, identity).await
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let mut tx = self.tx.lock().await;
        select_identity_by_username(&mut **tx, username).await
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let mut tx = self.tx.lock().await;
        select_identity_by_id(&mut **tx, id).await
    }

    async fn delete_identity(&self, id: Uuid) -> Result<u64, StoreError> {
        let mut tx = self.tx.lock().await;
        remove_identity(&mut **tx, id).await
    }
}

#[async_trait]
impl RefreshTokenStore for PgTransaction {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut tx = self.tx.lock().await;
        insert_refresh_token(&mut **tx, token).await
    }

    async fn find_refresh_token_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let mut tx = self.tx.lock().await;
        select_refresh_token_by_identity(&mut **tx, identity_id).await
    }

    async fn find_refresh_token(&self, token: &[u8]) -> Result<Option<RefreshToken>, StoreError> {
        let mut tx = self.tx.lock().await;
        select_refresh_token(&mut **tx, token).await
    }

    async fn delete_refresh_token(&self, token: &[u8]) -> Result<u64, StoreError> {
        let mut tx = self.tx.lock().await;
        remove_refresh_token(&mut **tx, token).await
    }

    async fn find_or_create_refresh_token(
        &self,
        candidate: &RefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        let mut tx = self.tx.lock().await;
        upsert_refresh_token(&mut **tx, candidate).await
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }
}
