//! Error types for session operations.

use moorings_lock::LockError;
use moorings_redis::RedisError;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
///
/// A busy distributed lock is not an error: it is reported through the
/// lock-not-acquired callback and [`GetItemResult::LockUnavailable`]. A lock id
/// that does not match the stored one is not an error either; the operation
/// simply does nothing.
///
/// [`GetItemResult::LockUnavailable`]: crate::GetItemResult::LockUnavailable
#[derive(Debug, Error)]
pub enum SessionError {
    /// The stored record or its item collection cannot be decoded.
    #[error("Corrupt session record: {0}")]
    CorruptRecord(String),

    /// The store was configured a second time.
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Part of an atomic write did not take effect.
    #[error("Partial write: {0}")]
    PartialWrite(String),

    /// A value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend failure outside Redis (e.g. wrong value type for a key).
    #[error("Store error: {0}")]
    Store(String),

    /// Redis-specific error
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Lock store error
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

impl SessionError {
    /// Create a corrupt-record error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }

    /// `true` when the key-value store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            Self::Redis(e) | Self::Lock(LockError::Redis(e)) => e.is_connection_error(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_classification() {
        assert!(SessionError::Redis(RedisError::Timeout).is_store_unavailable());
        assert!(
            SessionError::Lock(LockError::Redis(RedisError::Connection("refused".into())))
                .is_store_unavailable()
        );
        assert!(!SessionError::corrupt("short created field").is_store_unavailable());
        assert!(!SessionError::Lock(LockError::Timeout).is_store_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::corrupt("items truncated");
        assert_eq!(err.to_string(), "Corrupt session record: items truncated");
    }
}
