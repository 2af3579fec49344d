//! Error types for nettable.

use thiserror::Error;

use crate::EntryType;

/// Errors that can occur in nettable operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Non-forced write with a value of the wrong type
    #[error("type mismatch: entry is {expected}, write is {actual}")]
    TypeMismatch {
        /// The entry's bound type.
        expected: EntryType,
        /// The type of the attempted write.
        actual: EntryType,
    },

    /// Attempt to set an id on an entry that already has one
    #[error("entry id already assigned: {0}")]
    IdAlreadyAssigned(u16),

    /// Invalid protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Invalid message for the current connection state
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TableError::TypeMismatch {
            expected: EntryType::Double,
            actual: EntryType::String,
        };
        assert_eq!(err.to_string(), "type mismatch: entry is double, write is string");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TableError>();
    }
}
