//! # table-types
//!
//! Wire format types for the nettable replicated key-value protocol.
//!
//! This crate provides the foundational types used across all nettable
//! crates:
//! - [`EntryId`], [`SequenceNumber`] - Identity and ordering types
//! - [`EntryType`], [`EntryValue`] - The typed value model
//! - [`Message`] - Protocol messages (EntryAssign, EntryUpdate, ...)
//! - [`TableError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod value;

pub use error::TableError;
pub use ids::{EntryId, SequenceNumber};
pub use messages::{
    ClientHello, EntryAssign, EntryDelete, EntryUpdate, Message, ServerHello, PROTOCOL_VERSION,
};
pub use value::{EntryType, EntryValue};
