//! # nettable-server
//!
//! Server node for the nettable key-value synchronization protocol.
//!
//! This crate implements the authoritative node that:
//! - Accepts framed TCP connections from multiple clients
//! - Assigns entry ids and arbitrates concurrent offers
//! - Rebroadcasts accepted writes to every other client
//! - Streams a full table snapshot to late joiners
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │   framed TCP       │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │      nettable-server       │
//!        │  ┌─────────────────────┐   │
//!        │  │ EntryStore (server) │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Each connection starts with ClientHello → ServerHello followed by the
//! snapshot, then carries EntryAssign / EntryUpdate / EntryDelete /
//! KeepAlive traffic in both directions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod framing;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{ProtocolError, ServerError};
pub use server::{ServerMetrics, TableServer};
