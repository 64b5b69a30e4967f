use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Lifetime of a refresh token. Not configurable.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Raw token length in bytes (256 bits of entropy).
pub const REFRESH_TOKEN_LENGTH: usize = 32;

/// Server-tracked session credential.
///
/// `token` holds the raw random bytes. Hex encoding happens only at the HTTP
/// edge, see [`RefreshToken::to_hex`] and [`RefreshToken::decode_hex`].
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct RefreshToken {
    pub token: Vec<u8>,
    pub identity_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Mint a new random token for `identity_id`, expiring after
    /// [`REFRESH_TOKEN_TTL_DAYS`].
    pub fn generate(identity_id: Uuid) -> Self {
        Self::generate_at(identity_id, Utc::now())
    }

    pub fn generate_at(identity_id: Uuid, now: DateTime<Utc>) -> Self {
        let mut token = vec![0u8; REFRESH_TOKEN_LENGTH];
        rand::thread_rng().fill_bytes(&mut token);

        Self {
            token,
            identity_id,
            created_at: now,
            expires_at: now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.token)
    }

    pub fn decode_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(value)
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("token", &"<redacted>")
            .field("identity_id", &self.identity_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
