//! In-process store with the same observable semantics as [`super::PgStore`].
//!
//! Transactions work on a private copy of the state and record every
//! mutation. Commit replays them against the shared state under one lock, so
//! either all of them become visible or none do.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    IdentityStore, RefreshTokenStore, SessionStore, StoreError, StoreTransaction,
    REFRESH_TOKEN_IDENTITY_CONSTRAINT, USERNAME_CONSTRAINT,
};
use crate::models::{Identity, RefreshToken};

#[derive(Debug, Clone, Default)]
struct State {
    identities: HashMap<Uuid, Identity>,
    refresh_tokens: HashMap<Vec<u8>, RefreshToken>,
}

#[derive(Debug, Clone)]
enum Mutation {
    CreateIdentity(Identity),
    DeleteIdentity(Uuid),
    CreateRefreshToken(RefreshToken),
    DeleteRefreshToken(Vec<u8>),
}

impl State {
    fn apply(&mut self, mutation: &Mutation) -> Result<u64, StoreError> {
        match mutation {
            Mutation::CreateIdentity(identity) => self.insert_identity(identity).map(|_| 1),
            Mutation::DeleteIdentity(id) => Ok(self.remove_identity(*id)),
            Mutation::CreateRefreshToken(token) => self.insert_refresh_token(token).map(|_| 1),
            Mutation::DeleteRefreshToken(token) => {
                Ok(u64::from(self.refresh_tokens.remove(token).is_some()))
            }
        }
    }

    fn insert_identity(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let taken = self.identities.contains_key(&identity.id)
            || self
                .identities
                .values()
                .any(|existing| existing.username == identity.username);
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: USERNAME_CONSTRAINT.to_string(),
            });
        }

        self.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    /// Cascades to the identity's refresh tokens.
    fn remove_identity(&mut self, id: Uuid) -> u64 {
        match self.identities.remove(&id) {
            Some(_) => {
                self.refresh_tokens.retain(|_, token| token.identity_id != id);
                1
            }
            None => 0,
        }
    }

    fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<(), StoreError> {
        if !self.identities.contains_key(&token.identity_id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "Refresh token references unknown identity {}",
                token.identity_id
            )));
        }
        if self.refresh_tokens.contains_key(&token.token) {
            return Err(StoreError::UniqueViolation {
                constraint: "refresh_tokens_pkey".to_string(),
            });
        }
        if self.token_by_identity(token.identity_id).is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: REFRESH_TOKEN_IDENTITY_CONSTRAINT.to_string(),
            });
        }

        self.refresh_tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    fn identity_by_username(&self, username: &str) -> Option<Identity> {
        self.identities
            .values()
            .find(|identity| identity.username == username)
            .cloned()
    }

    fn token_by_identity(&self, identity_id: Uuid) -> Option<RefreshToken> {
        self.refresh_tokens
            .values()
            .find(|token| token.identity_id == identity_id)
            .cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_next_token_insert: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next refresh-token insert (on the store or in any
    /// transaction) fail with a backend error.
    pub fn fail_next_refresh_token_insert(&self) {
        self.fail_next_token_insert.store(true, Ordering::SeqCst);
    }

    pub fn identity_count(&self) -> usize {
        lock(&self.state).map(|s| s.identities.len()).unwrap_or(0)
    }

    pub fn refresh_token_count(&self) -> usize {
        lock(&self.state)
            .map(|s| s.refresh_tokens.len())
            .unwrap_or(0)
    }

    /// Removes an identity but leaves its refresh tokens behind, producing
    /// the dangling reference a concurrent deletion can expose.
    pub fn detach_identity(&self, id: Uuid) -> bool {
        lock(&self.state)
            .map(|mut s| s.identities.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Overwrites the expiry of a stored token.
    pub fn set_refresh_token_expiry(
        &self,
        token: &[u8],
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        lock(&self.state)
            .map(|mut s| match s.refresh_tokens.get_mut(token) {
                Some(stored) => {
                    stored.expires_at = expires_at;
                    true
                }
                None => false,
            })
            .unwrap_or(false)
    }

    fn injected_failure(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "Injected refresh token insert failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        lock(&self.state)?.insert_identity(identity)
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.state)?.identity_by_username(username))
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.state)?.identities.get(&id).cloned())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<u64, StoreError> {
        Ok(lock(&self.state)?.remove_identity(id))
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        Self::injected_failure(&self.fail_next_token_insert)?;
        lock(&self.state)?.insert_refresh_token(token)
    }

    async fn find_refresh_token_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(lock(&self.state)?.token_by_identity(identity_id))
    }

    async fn find_refresh_token(&self, token: &[u8]) -> Result<Option<RefreshToken>, StoreError> {
        Ok(lock(&self.state)?.refresh_tokens.get(token).cloned())
    }

    async fn delete_refresh_token(&self, token: &[u8]) -> Result<u64, StoreError> {
        lock(&self.state)?.apply(&Mutation::DeleteRefreshToken(token.to_vec()))
    }

    async fn find_or_create_refresh_token(
        &self,
        candidate: &RefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        Self::injected_failure(&self.fail_next_token_insert)?;

        let mut state = lock(&self.state)?;
        if let Some(existing) = state.token_by_identity(candidate.identity_id) {
            return Ok(existing);
        }
        state.insert_refresh_token(candidate)?;
        Ok(candidate.clone())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let snapshot = lock(&self.state)?.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            fail_next_token_insert: Arc::clone(&self.fail_next_token_insert),
            pending: Mutex::new(Pending {
                view: snapshot,
                writes: Vec::new(),
            }),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        lock(&self.state).map(|_| ())
    }
}

struct Pending {
    view: State,
    writes: Vec<Mutation>,
}

impl Pending {
    fn record(&mut self, write: Mutation) -> Result<u64, StoreError> {
        let affected = self.view.apply(&write)?;
        self.writes.push(write);
        Ok(affected)
    }
}

/// Buffered unit of work over a [`MemoryStore`].
pub struct MemoryTransaction {
    shared: Arc<Mutex<State>>,
    fail_next_token_insert: Arc<AtomicBool>,
    pending: Mutex<Pending>,
}

#[async_trait]
impl IdentityStore for MemoryTransaction {
    async fn create_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        lock(&self.pending)?
            .record(Mutation::CreateIdentity(identity.clone()))
            .map(|_| ())
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.pending)?.view.identity_by_username(username))
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.pending)?.view.identities.get(&id).cloned())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<u64, StoreError> {
        lock(&self.pending)?.record(Mutation::DeleteIdentity(id))
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryTransaction {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        MemoryStore::injected_failure(&self.fail_next_token_insert)?;
        lock(&self.pending)?
            .record(Mutation::CreateRefreshToken(token.clone()))
            .map(|_| ())
    }

    async fn find_refresh_token_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(lock(&self.pending)?.view.token_by_identity(identity_id))
    }

    async fn find_refresh_token(&self, token: &[u8]) -> Result<Option<RefreshToken>, StoreError> {
        Ok(lock(&self.pending)?.view.refresh_tokens.get(token).cloned())
    }

    async fn delete_refresh_token(&self, token: &[u8]) -> Result<u64, StoreError> {
        lock(&self.pending)?.record(Mutation::DeleteRefreshToken(token.to_vec()))
    }

    async fn find_or_create_refresh_token(
        &self,
        candidate: &RefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        MemoryStore::injected_failure(&self.fail_next_token_insert)?;

        let mut pending = lock(&self.pending)?;
        if let Some(existing) = pending.view.token_by_identity(candidate.identity_id) {
            return Ok(existing);
        }
        pending.record(Mutation::CreateRefreshToken(candidate.clone()))?;
        Ok(candidate.clone())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let pending = this
            .pending
            .into_inner()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))?;

        let mut shared = lock(&this.shared)?;
        let mut next = shared.clone();
        for write in &pending.writes {
            next.apply(write)?;
        }
        *shared = next;

        Ok(())
    }
}
