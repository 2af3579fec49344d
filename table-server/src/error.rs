//! Error types for nettable-server.

use table_types::TableError;

/// Main error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Invalid message format.
    #[error("invalid message format: {reason}")]
    InvalidMessage {
        /// Reason the message is invalid.
        reason: String,
    },

    /// Unexpected message type for the session state.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type.
        expected: String,
        /// Actual message type received.
        actual: String,
    },

    /// Session not established: hello required first.
    #[error("session not established: ClientHello required first")]
    HelloRequired,

    /// Protocol version mismatch.
    #[error("protocol version mismatch: client={client}, server={server}")]
    VersionMismatch {
        /// Client protocol version.
        client: u16,
        /// Server protocol version.
        server: u16,
    },

    /// Table state violation (type conflict, bad id).
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
