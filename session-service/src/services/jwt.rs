use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Clock skew tolerated when checking `exp`.
pub const LEEWAY_SECONDS: u64 = 5;

/// Issues and verifies HS256 access tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_ttl: TimeDelta,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject (identity ID)
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique per token
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn identity_id(&self) -> Result<Uuid, anyhow::Error> {
        Uuid::parse_str(&self.sub)
            .map_err(|e| anyhow::anyhow!("Access token subject is not an identity id: {}", e))
    }
}

/// A signed access token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret();
        if secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secret must not be empty"));
        }
        if config.access_token_expiry_minutes <= 0 {
            return Err(anyhow::anyhow!("Access token expiry must be positive"));
        }
        let access_token_ttl = TimeDelta::try_minutes(config.access_token_expiry_minutes)
            .ok_or_else(|| anyhow::anyhow!("Access token expiry is out of range"))?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl,
        })
    }

    /// Sign an access token for `identity_id`, valid from now.
    pub fn issue_access_token(&self, identity_id: Uuid) -> Result<AccessToken, anyhow::Error> {
        self.issue_access_token_at(identity_id, Utc::now())
    }

    /// Sign an access token as if it were issued at `issued_at`.
    pub fn issue_access_token_at(
        &self,
        identity_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Result<AccessToken, anyhow::Error> {
        let exp = issued_at
            .checked_add_signed(self.access_token_ttl)
            .ok_or_else(|| anyhow::anyhow!("Access token expiry out of range"))?;

        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: identity_id.to_string(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        // Round down to whole seconds, matching the `exp` claim.
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Access token expiry out of range"))?;

        Ok(AccessToken { value, expires_at })
    }

    /// Validate signature, issuer, audience and expiry.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }
}
