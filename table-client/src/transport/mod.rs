//! Transport abstraction for the table client.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying connection mechanism (TCP, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one serialized message
//! - `recv()` receives one whole message
//! - `close()` gracefully terminates
//!
//! Framing is a transport concern: callers hand over message bytes and get
//! back message bytes, never partial frames.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("127.0.0.1:1735").await?;
//! transport.send(&message_bytes).await?;
//! let reply = transport.recv().await?;
//! ```

mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for sending and receiving table protocol messages.
///
/// Implementations handle the underlying connection mechanism
/// (TCP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a server at the given address.
    ///
    /// For TCP this is a `host:port` pair. For testing, it's arbitrary.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one message's bytes over the connection.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one whole message from the connection.
    ///
    /// Blocks until a message is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
