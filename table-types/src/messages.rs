//! Protocol messages for nettable.
//!
//! Messages are MessagePack-encoded and carried inside 4-byte
//! length-prefixed frames on the byte stream.

use serde::{Deserialize, Serialize};

use crate::{EntryId, EntryValue, SequenceNumber, TableError};

/// The protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Initial handshake, client to server.
    ClientHello(ClientHello),
    /// Handshake response, server to client.
    ServerHello(ServerHello),
    /// Introduce an entry (with its id) to the peer.
    EntryAssign(EntryAssign),
    /// Revise an already-known entry's value.
    EntryUpdate(EntryUpdate),
    /// Remove an entry.
    EntryDelete(EntryDelete),
    /// Connection liveness probe; carries no state.
    KeepAlive,
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TableError> {
        rmp_serde::to_vec(self).map_err(TableError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        rmp_serde::from_slice(bytes).map_err(TableError::Deserialization)
    }
}

/// Handshake message sent by the client on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Protocol version the client speaks.
    pub version: u16,
    /// Human-readable client identity.
    pub identity: String,
}

/// Server response to ClientHello.
///
/// After this the server streams its full table as EntryAssign messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Protocol version the server speaks.
    pub version: u16,
}

/// Introduce a previously-unknown entry to the peer.
///
/// Clients offer new entries with [`EntryId::UNKNOWN`]; the server responds
/// with the authoritative assignment carrying the real id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAssign {
    /// Entry id, or UNKNOWN when a client is requesting assignment.
    pub id: EntryId,
    /// Entry name.
    pub name: String,
    /// Sequence number of the carried value.
    pub seq: SequenceNumber,
    /// The typed value; the type tag decodes before the payload.
    pub value: EntryValue,
}

/// Revise an already-assigned entry's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    /// The assigned entry id.
    pub id: EntryId,
    /// Sequence number of the carried value.
    pub seq: SequenceNumber,
    /// The new value.
    pub value: EntryValue,
}

/// Remove an entry from the shared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDelete {
    /// The assigned entry id.
    pub id: EntryId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_roundtrip() {
        let hello = Message::ClientHello(ClientHello {
            version: PROTOCOL_VERSION,
            identity: "robot".into(),
        });

        let bytes = hello.to_bytes().unwrap();
        let restored = Message::from_bytes(&bytes).unwrap();

        assert_eq!(hello, restored);
    }

    #[test]
    fn server_hello_roundtrip() {
        let hello = Message::ServerHello(ServerHello {
            version: PROTOCOL_VERSION,
        });

        let bytes = hello.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), hello);
    }

    #[test]
    fn assign_carries_unknown_id() {
        let assign = Message::EntryAssign(EntryAssign {
            id: EntryId::UNKNOWN,
            name: "/sensors/gyro".into(),
            seq: SequenceNumber::new(5),
            value: EntryValue::Double(1.0),
        });

        let bytes = assign.to_bytes().unwrap();
        match Message::from_bytes(&bytes).unwrap() {
            Message::EntryAssign(a) => {
                assert!(!a.id.is_assigned());
                assert_eq!(a.name, "/sensors/gyro");
                assert_eq!(a.seq, SequenceNumber::new(5));
            }
            other => panic!("expected EntryAssign, got {:?}", other),
        }
    }

    #[test]
    fn update_roundtrip() {
        let update = Message::EntryUpdate(EntryUpdate {
            id: EntryId::new(7),
            seq: SequenceNumber::new(6),
            value: EntryValue::Double(2.0),
        });

        let bytes = update.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), update);
    }

    #[test]
    fn delete_roundtrip() {
        let delete = Message::EntryDelete(EntryDelete {
            id: EntryId::new(3),
        });

        let bytes = delete.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), delete);
    }

    #[test]
    fn keep_alive_roundtrip() {
        let bytes = Message::KeepAlive.to_bytes().unwrap();
        assert!(matches!(
            Message::from_bytes(&bytes).unwrap(),
            Message::KeepAlive
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = Message::from_bytes(&[0xC1, 0xFF, 0x00]);
        assert!(result.is_err());
    }
}
