use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or malformed Authorization header.
    #[error("Unauthorized")]
    Unauthorized,

    /// The bearer credential failed structural or signature checks.
    #[error("Invalid token")]
    InvalidToken,

    /// The credential is structurally valid but the authoritative store says
    /// it is gone, revoked, or past its expiry.
    #[error("Token expired or revoked")]
    TokenExpiredOrRevoked,

    /// Webhook payload did not match the shared-secret signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CrmResult<T> = Result<T, CrmError>;
