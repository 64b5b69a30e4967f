pub mod identity;
pub mod refresh_token;

pub use identity::Identity;
pub use refresh_token::{RefreshToken, REFRESH_TOKEN_LENGTH, REFRESH_TOKEN_TTL_DAYS};
