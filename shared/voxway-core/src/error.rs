//! Error types for Voxway services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoxwayError>;

#[derive(Error, Debug)]
pub enum VoxwayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Authorization error: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoxwayError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Auth(_) | Self::SignatureInvalid(_) => 401,
            Self::InsufficientFunds(_) => 402,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Provider(_) => 502,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for VoxwayError {
    fn from(err: std::io::Error) -> Self {
        VoxwayError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(VoxwayError::Validation("bad".into()).status_code(), 400);
        assert_eq!(VoxwayError::InsufficientFunds("broke".into()).status_code(), 402);
        assert_eq!(VoxwayError::NotFound("gone".into()).status_code(), 404);
        assert_eq!(VoxwayError::SignatureInvalid("hmac".into()).status_code(), 401);
        assert_eq!(VoxwayError::Provider("upstream 500".into()).status_code(), 502);
        assert_eq!(VoxwayError::Internal("oops".into()).status_code(), 500);
    }
}
