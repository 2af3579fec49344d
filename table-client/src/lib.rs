//! # nettable-client
//!
//! Client node for the nettable key-value synchronization protocol.
//!
//! The client keeps a local replica of the shared table, pushes local
//! writes to the server on a periodic flush tick, applies server writes as
//! they arrive, and reconnects with exponential backoff when the
//! connection drops. All table reads and writes are local and keep working
//! while disconnected.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use nettable_client::{ClientConfig, TableClient, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1:1735").with_identity("dashboard");
//!     let client = Arc::new(TableClient::new(config, TcpTransport::new()));
//!     client.start().await;
//!
//!     let table = client.table();
//!     table.listen("/status", true, |event| {
//!         println!("{} = {:?}", event.name, event.value);
//!     });
//!     table.put_string("/mode", "auto")?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
pub mod transport;

pub use client::{ClientConfig, ClientError, TableClient};
pub use transport::{MockTransport, TcpTransport, Transport, TransportError};

// Re-export the table API so applications only need this crate.
pub use table_core::{ConnectionEvent, EntryEvent, EntryEventKind, ListenerId, Table};
pub use table_types::{EntryType, EntryValue, TableError};
