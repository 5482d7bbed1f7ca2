//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Missing, malformed, expired or otherwise invalid bearer credential
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated, but not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced organization, team or role does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request input (e.g. non-numeric path parameter)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Permission pattern rejected at write time
    #[error("Invalid permission pattern: {0}")]
    InvalidPattern(String),

    /// Cache backend failure; never surfaced to clients
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// HTTP status code the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::BadRequest(_) | Self::InvalidPattern(_) => 400,
            Self::CacheUnavailable(_) | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Static error code string for response bodies and log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::Store(_) => "store_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this error is a terminal authorization rejection (4xx).
    pub fn is_rejection(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
