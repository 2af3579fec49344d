//! Identity and ordering types for nettable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 16-bit entry identifier, unique per participant once assigned.
///
/// Client-created entries start out as [`EntryId::UNKNOWN`] and receive a
/// real id from the server during assignment. Unknown ids are excluded from
/// id-based lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(u16);

impl EntryId {
    /// The pending-assignment sentinel (0xFFFF).
    pub const UNKNOWN: EntryId = EntryId(0xFFFF);

    /// Create an EntryId with the given value.
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the numeric value of this id.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether this id has been assigned (is not the UNKNOWN sentinel).
    pub fn is_assigned(&self) -> bool {
        *self != Self::UNKNOWN
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_assigned() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "unknown")
        }
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self)
    }
}

/// A 16-bit wrapping write-version counter.
///
/// Orders writes to a single entry under the half-range wraparound rule:
/// a candidate `s` is newer than the current `c` iff
/// `0 < (s - c) mod 65536 < 32768`. Equal is not newer; the other half of
/// the ring counts as circularly behind. The counter is carried in a fixed
/// 16-bit wire field and must tolerate indefinite uptime, so all arithmetic
/// is wrapping with no sign extension.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SequenceNumber(u16);

/// Half of the 16-bit sequence ring. Deltas at or past this point are
/// circularly behind.
const SEQUENCE_HALF_RANGE: u16 = 0x8000;

impl SequenceNumber {
    /// Create a SequenceNumber with the given value.
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the numeric value of this sequence number.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// The successor on the wrapping ring.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether `self` is strictly newer than `current`.
    pub fn is_newer_than(&self, current: SequenceNumber) -> bool {
        let delta = self.0.wrapping_sub(current.0);
        delta != 0 && delta < SEQUENCE_HALF_RANGE
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceNumber({})", self.0)
    }
}
