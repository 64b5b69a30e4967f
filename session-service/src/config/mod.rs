use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::services::session::SessionSettings;

/// Upper bound on `JWT_ACCESS_TOKEN_EXPIRY_MINUTES` (one day).
pub const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` keeps all state in process memory (development only).
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub enforce_refresh_token_expiry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub cookie_secure: bool,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let environment: Environment = vars
            .get("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let database = match vars.optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: vars.parse("DATABASE_MIN_CONNECTIONS", "1")?,
            }),
            None if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )))
            }
            None => None,
        };

        let config = SessionConfig {
            common,
            environment: environment.clone(),
            service_name: vars.get("SERVICE_NAME", Some("session-service"), is_prod)?,
            service_version: vars.get(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                is_prod,
            )?,
            log_level: vars.get("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: vars.optional("OTLP_ENDPOINT"),
            database,
            jwt: JwtConfig {
                secret: SecretString::new(vars.get(
                    "JWT_SECRET",
                    Some("insecure-development-secret-change-me"),
                    is_prod,
                )?),
                issuer: vars.get("JWT_ISSUER", Some("session-service"), is_prod)?,
                audience: vars.get("JWT_AUDIENCE", Some("session-clients"), is_prod)?,
                access_token_expiry_minutes: vars.parse("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "15")?,
            },
            security: SecurityConfig {
                allowed_origins: vars
                    .get("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                cookie_secure: vars.parse("COOKIE_SECURE", "false")?,
                request_timeout_seconds: vars.parse("REQUEST_TIMEOUT_SECONDS", "30")?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: vars.parse("RATE_LIMIT_LOGIN_ATTEMPTS", "5")?,
                login_window_seconds: vars.parse("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
                register_attempts: vars.parse("RATE_LIMIT_REGISTER_ATTEMPTS", "3")?,
                register_window_seconds: vars.parse("RATE_LIMIT_REGISTER_WINDOW_SECONDS", "3600")?,
            },
            enforce_refresh_token_expiry: vars.parse("ENFORCE_REFRESH_TOKEN_EXPIRY", "false")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Settings handed to [`crate::services::SessionService`].
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            enforce_refresh_token_expiry: self.enforce_refresh_token_expiry,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0
            || self.jwt.access_token_expiry_minutes > MAX_ACCESS_TOKEN_EXPIRY_MINUTES
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_MINUTES
            )));
        }

        if self.security.request_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REQUEST_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if let Some(database) = &self.database {
            if database.min_connections > database.max_connections {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.jwt.secret.expose_secret().len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least 32 bytes in production"
                )));
            }

            if !self.security.cookie_secure {
                tracing::warn!("COOKIE_SECURE is disabled in production");
            }
        }

        Ok(())
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get(&self, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
        match self.optional(key) {
            Some(val) => Ok(val),
            None => {
                if is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    /// Numeric and boolean tuning knobs fall back to their defaults in every
    /// environment.
    fn parse<T>(&self, key: &str, default: &str) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(key, Some(default), false)?;
        raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SessionConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(core_config::Config::default(), |key| {
            vars.get(key).cloned()
        })
    }

    #[test]
    fn test_dev_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.environment, Environment::Dev);
        assert!(config.database.is_none());
        assert_eq!(config.jwt.access_token_expiry_minutes, 15);
        assert_eq!(config.rate_limit.login_attempts, 5);
        assert_eq!(config.rate_limit.register_window_seconds, 3600);
        assert!(!config.security.cookie_secure);
        assert!(!config.session_settings().enforce_refresh_token_expiry);
    }

    #[test]
    fn test_database_settings() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/sessions"),
            ("DATABASE_MAX_CONNECTIONS", "20"),
        ])
        .unwrap();

        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.min_connections, 1);
    }

    #[test]
    fn test_prod_requires_secrets() {
        let err = load(&[("ENVIRONMENT", "prod")]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    fn prod_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ENVIRONMENT", "prod"),
            ("DATABASE_URL", "postgres://db/sessions"),
            ("SERVICE_NAME", "session-service"),
            ("SERVICE_VERSION", "1.0.0"),
            ("LOG_LEVEL", "info"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("JWT_ISSUER", "sessions"),
            ("JWT_AUDIENCE", "clients"),
            ("ALLOWED_ORIGINS", "https://app.example.com"),
        ]
    }

    #[test]
    fn test_prod_accepts_complete_config() {
        let config = load(&prod_vars()).unwrap();
        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(
            config.security.allowed_origins,
            vec!["https://app.example.com".to_string()]
        );
    }

    #[test]
    fn test_prod_rejects_wildcard_origin() {
        let mut vars = prod_vars();
        vars.retain(|(k, _)| *k != "ALLOWED_ORIGINS");
        vars.push(("ALLOWED_ORIGINS", "*"));

        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_prod_rejects_short_secret() {
        let mut vars = prod_vars();
        vars.retain(|(k, _)| *k != "JWT_SECRET");
        vars.push(("JWT_SECRET", "short"));

        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = load(&[("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "soon")]).unwrap_err();
        assert!(err.to_string().contains("JWT_ACCESS_TOKEN_EXPIRY_MINUTES"));
    }

    #[test]
    fn test_non_positive_expiry_rejected() {
        assert!(load(&[("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "0")]).is_err());
    }

    #[test]
    fn test_oversized_expiry_rejected() {
        assert!(load(&[("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "9223372036854775807")]).is_err());
        assert!(load(&[("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "1441")]).is_err());

        let config = load(&[("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "1440")]).unwrap();
        assert_eq!(config.jwt.access_token_expiry_minutes, MAX_ACCESS_TOKEN_EXPIRY_MINUTES);
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let err = load(&[("REQUEST_TIMEOUT_SECONDS", "0")]).unwrap_err();
        assert!(err.to_string().contains("REQUEST_TIMEOUT_SECONDS"));
    }
}
