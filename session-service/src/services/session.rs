//! Register, login, refresh and revoke.
//!
//! Every operation returns a [`SessionOutcome`]: the operation's result plus
//! the instruction for whatever carries the refresh token on the client side.
//! Refresh tokens are raw bytes here; callers decode the hex carrier value
//! through [`SessionService::refresh_token`] and [`SessionService::revoke_token`].

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{field, info_span, Instrument, Span};
use uuid::Uuid;

use super::error::SessionError;
use super::jwt::{AccessToken, JwtService};
use super::metrics::record_session_operation;
use crate::models::{Identity, RefreshToken};
use crate::store::{SessionStore, StoreError};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

const INVALID_CREDENTIALS: &str = "Invalid username or password";
const TOKEN_NOT_FOUND: &str = "Refresh token could not be found";

/// Verified in place of a real hash when the username is unknown, so both
/// rejection paths cost one Argon2 verification.
static DECOY_HASH: OnceCell<PasswordHashString> = OnceCell::const_new();

/// Behaviour switches for [`SessionService`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSettings {
    /// Treat refresh tokens past `expires_at` as absent on lookup, and
    /// replace them on login.
    pub enforce_refresh_token_expiry: bool,
}

#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub identity_id: Uuid,
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
}

/// What the transport should do with the refresh-token carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    SetRefreshToken(RefreshToken),
    ClearRefreshToken,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome<T> {
    pub result: T,
    pub effect: SessionEffect,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    jwt: JwtService,
    settings: SessionSettings,
    span: Span,
}

impl SessionService {
    /// `span` is the parent of every span the service opens.
    pub fn new(
        store: Arc<dyn SessionStore>,
        jwt: JwtService,
        settings: SessionSettings,
        span: Span,
    ) -> Self {
        Self {
            store,
            jwt,
            settings,
            span,
        }
    }

    /// Create an identity and its first refresh token atomically.
    pub async fn register(
        &self,
        username: &str,
        password: Password,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        let span = info_span!(parent: &self.span, "register", identity_id = field::Empty);
        let result = self.register_inner(username, password).instrument(span).await;
        record_session_operation("register", &result);
        result
    }

    async fn register_inner(
        &self,
        username: &str,
        password: Password,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::BadRequest(
                "Username and password are required".to_string(),
            ));
        }

        let password_hash = hash(password).await?;

        let tx = self
            .store
            .begin()
            .await
            .map_err(|e| SessionError::internal("Failed to begin transaction", e))?;

        let identity = Identity::new(username.to_string(), password_hash.into_string());
        Span::current().record("identity_id", field::display(identity.id));

        tx.create_identity(&identity)
            .await
            .map_err(|e| classify_identity_insert(e, "Could not create identity"))?;

        let refresh_token = RefreshToken::generate(identity.id);
        tx.create_refresh_token(&refresh_token)
            .await
            .map_err(|e| SessionError::internal("Could not store refresh token", e))?;

        let access_token = self.access_token(identity.id)?;

        tx.commit()
            .await
            .map_err(|e| classify_identity_insert(e, "Failed to commit transaction"))?;

        tracing::info!("Identity registered");

        Ok(authenticated(identity.id, access_token, refresh_token))
    }

    /// Authenticate with username and password. Reuses the identity's
    /// existing refresh token when there is one.
    pub async fn login(
        &self,
        username: &str,
        password: Password,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        let span = info_span!(parent: &self.span, "login", identity_id = field::Empty);
        let result = self.login_inner(username, password).instrument(span).await;
        record_session_operation("login", &result);
        result
    }

    async fn login_inner(
        &self,
        username: &str,
        password: Password,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        let identity = self
            .store
            .find_identity_by_username(username)
            .await
            .map_err(|e| SessionError::internal("Identity could not be retrieved", e))?;

        // Unknown usernames and wrong passwords must be indistinguishable,
        // in body and in timing.
        let Some(identity) = identity else {
            verify(password, decoy_hash().await?).await?;
            tracing::info!("Login rejected");
            return Err(invalid_credentials());
        };
        Span::current().record("identity_id", field::display(identity.id));

        let stored = PasswordHashString::new(identity.password_hash.clone());
        if !verify(password, stored).await? {
            tracing::info!("Login rejected");
            return Err(invalid_credentials());
        }

        let refresh_token = self.reusable_refresh_token(identity.id).await?;
        let access_token = self.access_token(identity.id)?;

        tracing::info!("Identity logged in");

        Ok(authenticated(identity.id, access_token, refresh_token))
    }

    /// The identity's stored token, or a new one. Creation is an atomic
    /// insert-if-absent so concurrent logins converge on one row.
    async fn reusable_refresh_token(&self, identity_id: Uuid) -> Result<RefreshToken, SessionError> {
        let existing = self
            .store
            .find_refresh_token_by_identity(identity_id)
            .await
            .map_err(|e| SessionError::internal("Refresh token could not be retrieved", e))?;

        match existing {
            Some(token) if !self.is_expired(&token) => return Ok(token),
            Some(expired) => {
                tracing::info!("Replacing expired refresh token");
                self.store
                    .delete_refresh_token(&expired.token)
                    .await
                    .map_err(|e| {
                        SessionError::internal("Could not delete expired refresh token", e)
                    })?;
            }
            None => {}
        }

        self.store
            .find_or_create_refresh_token(&RefreshToken::generate(identity_id))
            .await
            .map_err(|e| SessionError::internal("Could not store refresh token", e))
    }

    /// Mint a new access token from a hex-encoded refresh token. The refresh
    /// token itself is echoed back unchanged.
    pub async fn refresh_token(
        &self,
        carrier: &str,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        let span = info_span!(parent: &self.span, "refresh_token", identity_id = field::Empty);
        let result = self.refresh_inner(carrier).instrument(span).await;
        record_session_operation("refresh_token", &result);
        result
    }

    async fn refresh_inner(
        &self,
        carrier: &str,
    ) -> Result<SessionOutcome<AuthenticationResult>, SessionError> {
        let raw = decode_carrier(carrier)?;

        let refresh_token = self
            .store
            .find_refresh_token(&raw)
            .await
            .map_err(|e| SessionError::internal("Refresh token could not be retrieved", e))?
            .ok_or_else(|| SessionError::NotFound(TOKEN_NOT_FOUND.to_string()))?;
        Span::current().record("identity_id", field::display(refresh_token.identity_id));

        if self.is_expired(&refresh_token) {
            tracing::info!("Expired refresh token presented");
            return Err(SessionError::NotFound(TOKEN_NOT_FOUND.to_string()));
        }

        let identity = self
            .store
            .find_identity_by_id(refresh_token.identity_id)
            .await
            .map_err(|e| SessionError::internal("Identity could not be retrieved", e))?
            .ok_or_else(|| {
                SessionError::BadRequest(
                    "Identity attached to this refresh token no longer exists".to_string(),
                )
            })?;

        let access_token = self.access_token(identity.id)?;

        Ok(authenticated(identity.id, access_token, refresh_token))
    }

    /// Delete the refresh token named by the hex carrier value.
    pub async fn revoke_token(&self, carrier: &str) -> Result<SessionOutcome<()>, SessionError> {
        let span = info_span!(parent: &self.span, "revoke_token");
        let result = self.revoke_inner(carrier).instrument(span).await;
        record_session_operation("revoke_token", &result);
        result
    }

    async fn revoke_inner(&self, carrier: &str) -> Result<SessionOutcome<()>, SessionError> {
        let raw = decode_carrier(carrier)?;

        let expired = if self.settings.enforce_refresh_token_expiry {
            self.store
                .find_refresh_token(&raw)
                .await
                .map_err(|e| SessionError::internal("Refresh token could not be retrieved", e))?
                .is_some_and(|token| token.is_expired())
        } else {
            false
        };

        let deleted = self.store.delete_refresh_token(&raw).await.map_err(|e| {
            SessionError::internal(
                "Unexpected error occurred during refresh token deletion. Please try again",
                e,
            )
        })?;

        if deleted == 0 || expired {
            return Err(SessionError::NotFound(TOKEN_NOT_FOUND.to_string()));
        }

        tracing::info!("Refresh token revoked");

        Ok(SessionOutcome {
            result: (),
            effect: SessionEffect::ClearRefreshToken,
        })
    }

    /// Look up an identity by id (used for the authenticated profile).
    pub async fn identity(&self, identity_id: Uuid) -> Result<Identity, SessionError> {
        self.store
            .find_identity_by_id(identity_id)
            .instrument(info_span!(parent: &self.span, "identity", %identity_id))
            .await
            .map_err(|e| SessionError::internal("Identity could not be retrieved", e))?
            .ok_or_else(|| SessionError::NotFound("Identity could not be found".to_string()))
    }

    /// Delete an identity; its refresh tokens go with it.
    pub async fn delete_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<SessionOutcome<()>, SessionError> {
        let span = info_span!(parent: &self.span, "delete_identity", %identity_id);
        let result = async {
            let deleted = self
                .store
                .delete_identity(identity_id)
                .await
                .map_err(|e| SessionError::internal("Identity could not be deleted", e))?;

            if deleted == 0 {
                return Err(SessionError::NotFound(
                    "Identity could not be found".to_string(),
                ));
            }

            tracing::info!("Identity deleted");
            Ok(SessionOutcome {
                result: (),
                effect: SessionEffect::ClearRefreshToken,
            })
        }
        .instrument(span)
        .await;

        record_session_operation("delete_identity", &result);
        result
    }

    fn access_token(&self, identity_id: Uuid) -> Result<AccessToken, SessionError> {
        self.jwt
            .issue_access_token(identity_id)
            .map_err(|e| SessionError::internal("Could not generate access token", e))
    }

    fn is_expired(&self, token: &RefreshToken) -> bool {
        self.settings.enforce_refresh_token_expiry && token.is_expired()
    }
}

fn authenticated(
    identity_id: Uuid,
    access_token: AccessToken,
    refresh_token: RefreshToken,
) -> SessionOutcome<AuthenticationResult> {
    SessionOutcome {
        effect: SessionEffect::SetRefreshToken(refresh_token.clone()),
        result: AuthenticationResult {
            identity_id,
            access_token,
            refresh_token: Some(refresh_token),
        },
    }
}

fn invalid_credentials() -> SessionError {
    SessionError::BadRequest(INVALID_CREDENTIALS.to_string())
}

fn decode_carrier(carrier: &str) -> Result<Vec<u8>, SessionError> {
    RefreshToken::decode_hex(carrier)
        .map_err(|_| SessionError::BadRequest("Refresh token could not be decoded".to_string()))
}

fn classify_identity_insert(err: StoreError, detail: &str) -> SessionError {
    match err {
        StoreError::UniqueViolation { .. } => {
            SessionError::Conflict("Username is already in use".to_string())
        }
        other => SessionError::internal(detail, other),
    }
}

async fn hash(password: Password) -> Result<PasswordHashString, SessionError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| SessionError::internal("Could not hash password", e))?
        .map_err(|e| SessionError::internal("Could not hash password", e))
}

async fn decoy_hash() -> Result<PasswordHashString, SessionError> {
    DECOY_HASH
        .get_or_try_init(|| hash(Password::new("unknown-identity".to_string())))
        .await
        .cloned()
}

async fn verify(password: Password, stored: PasswordHashString) -> Result<bool, SessionError> {
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| SessionError::internal("Could not verify password", e))?;

    Ok(verified.is_ok())
}
