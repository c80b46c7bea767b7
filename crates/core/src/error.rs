//! Error types for the MeshBrain domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all MeshBrain operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Contract violations at the request boundary ---
    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Classify this error into the coarse kind surfaced in attempt records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::ApiError { status_code, .. } => match status_code {
                401 | 403 => ErrorKind::Auth,
                429 => ErrorKind::RateLimit,
                408 | 504 => ErrorKind::Timeout,
                _ => ErrorKind::Unknown,
            },
            ProviderError::RateLimited { .. } => ErrorKind::RateLimit,
            ProviderError::AuthenticationFailed(_) => ErrorKind::Auth,
            ProviderError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            ProviderError::NotConfigured(_) => ErrorKind::Unknown,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Network(_) => ErrorKind::Network,
        }
    }
}

/// The failure classes a generation attempt can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimit,
    Timeout,
    Network,
    InvalidResponse,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

/// Contract violations rejected before any memory or provider access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("user_id must not be empty")]
    EmptyUserId,

    #[error("message must not be empty")]
    EmptyMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn api_status_codes_classify() {
        let auth = ProviderError::ApiError {
            status_code: 403,
            message: "forbidden".into(),
        };
        let limited = ProviderError::ApiError {
            status_code: 429,
            message: "slow down".into(),
        };
        let server = ProviderError::ApiError {
            status_code: 500,
            message: "boom".into(),
        };
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert_eq!(limited.kind(), ErrorKind::RateLimit);
        assert_eq!(server.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn variant_kinds() {
        assert_eq!(ProviderError::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(ProviderError::Network("x".into()).kind(), ErrorKind::Network);
        assert_eq!(
            ProviderError::InvalidResponse("empty".into()).kind(),
            ErrorKind::InvalidResponse
        );
        assert_eq!(
            ProviderError::RateLimited { retry_after_secs: 5 }.kind(),
            ErrorKind::RateLimit
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidResponse).unwrap();
        assert_eq!(json, "\"invalid_response\"");
        assert_eq!(ErrorKind::RateLimit.to_string(), "rate_limit");
    }

    #[test]
    fn request_error_wraps_into_top_level() {
        let err: Error = RequestError::EmptyUserId.into();
        assert!(err.to_string().contains("user_id"));
    }
}
