//! Error types for sealdrop
//!
//! Policy denials (not found, token mismatch, expired, quota exceeded,
//! session expired, invalid parameters) are expected outcomes the boundary
//! hands back to its caller; they are not logged as failures. Everything
//! else signals a real fault.

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the share engine
#[derive(Debug, Error)]
pub enum Error {
    // --- input errors (rejected before any I/O) ---
    /// Retention window, download quota, or part layout outside bounds
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    // --- policy denials (expected, user-facing) ---
    /// No record for the given file id in any tier
    #[error("Share not found")]
    NotFound,

    /// Record exists but the supplied access token is wrong
    #[error("Access token mismatch")]
    TokenMismatch,

    /// Record exists but is past its expiry time
    #[error("Share expired")]
    Expired,

    /// Record exists but its download quota is used up
    #[error("Download quota exceeded")]
    QuotaExceeded,

    /// Chunked upload session was discarded before completion
    #[error("Upload session expired")]
    SessionExpired,

    // --- codec errors (fatal, never retried) ---
    /// Wrong or missing key material
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Ciphertext failed to decode or authenticate
    #[error("Corrupt ciphertext: {0}")]
    CorruptCiphertext(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    // --- infrastructure errors ---
    /// The authoritative backend failed; the operation cannot proceed
    #[error("Storage unavailable: {0}")]
    ServiceUnavailable(String),

    /// Configuration could not be loaded or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::ServiceUnavailable(e.to_string())
    }
}

impl Error {
    /// Whether this error is an expected policy denial rather than a fault
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Error::NotFound
                | Error::TokenMismatch
                | Error::Expired
                | Error::QuotaExceeded
                | Error::SessionExpired
                | Error::InvalidParameters(_)
        )
    }
}
