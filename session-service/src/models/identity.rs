//! Identity model: one registered principal.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// A registered principal. The password hash never leaves the service, so
/// this type is deliberately not `Serialize`.
#[derive(Clone, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity with a freshly generated id.
    pub fn new(username: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_creation() {
        let a = Identity::new("alice".to_string(), "$argon2id$hash".to_string());
        let b = Identity::new("alice".to_string(), "$argon2id$hash".to_string());

        assert_eq!(a.username, "alice");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_debug_redacts_hash() {
        let identity = Identity::new("alice".to_string(), "$argon2id$secret".to_string());
        let debug = format!("{:?}", identity);

        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }
}
