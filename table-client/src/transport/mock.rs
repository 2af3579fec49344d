//! In-memory transport scripted with protocol messages.
//!
//! Unlike a byte-pipe fake, the mock speaks [`Message`] at both seams:
//! replies are scripted as typed messages and encoded on the way out, and
//! captured sends are decoded on the way in. A test never touches raw
//! MessagePack, and a frame that does not decode as a protocol message
//! fails the `send()` that produced it.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use table_types::{Message, ServerHello, PROTOCOL_VERSION};

/// Scripted in-memory transport for client tests.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Shared>>,
}

#[derive(Debug, Default)]
struct Shared {
    connected: bool,
    connected_address: Option<String>,
    sent: Vec<Message>,
    replies: VecDeque<Message>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a mock with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock with a current-version `ServerHello` already scripted, ready
    /// for a client's handshake.
    pub fn with_handshake() -> Self {
        let transport = Self::default();
        transport.script_reply(Message::ServerHello(ServerHello {
            version: PROTOCOL_VERSION,
        }));
        transport
    }

    /// Script a message for a later `recv()`. Replies come back in the
    /// order scripted; an exhausted script reads as a closed connection.
    pub fn script_reply(&self, message: Message) {
        self.inner.lock().unwrap().replies.push_back(message);
    }

    /// Every message sent so far, decoded, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// The most recently sent message.
    pub fn last_sent(&self) -> Option<Message> {
        self.inner.lock().unwrap().sent.last().cloned()
    }

    /// The address passed to the last successful `connect()`.
    pub fn connected_address(&self) -> Option<String> {
        self.inner.lock().unwrap().connected_address.clone()
    }

    /// Make the next `connect()` fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Make the next `send()` fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Make the next `recv()` fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_recv = Some(error.to_string());
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        let message = Message::from_bytes(data)
            .map_err(|e| TransportError::SendFailed(format!("undecodable frame: {}", e)))?;
        inner.sent.push(message);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        let message = inner
            .replies
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)?;
        message
            .to_bytes()
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().connected = false;
        Ok(())
    }
}
