//! # nettable-core
//!
//! Pure logic for nettable (no I/O, instant tests).
//!
//! This crate implements the entry store, outgoing queue, listener
//! dispatch, and connection state machine for the table protocol without
//! any network I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (connecting, framing, sending) is performed by
//! `nettable-client` and `nettable-server`, which interpret the actions and
//! pending transmissions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod listener;
pub mod outgoing;
pub mod path;
pub mod state;
pub mod store;
pub mod table;

pub use entry::Entry;
pub use listener::{
    ConnectionEvent, EntryEvent, EntryEventKind, KeyMatcher, ListenerId, ListenerSet,
};
pub use outgoing::{OutgoingQueue, Pending};
pub use state::{calculate_backoff, Action, ConnectionState, Event, LinkEvent};
pub use store::{AssignmentOutcome, EntryStore, PutOutcome, RebroadcastPolicy, Role};
pub use table::Table;
