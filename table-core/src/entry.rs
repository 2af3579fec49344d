//! A single named, typed, versioned value in the shared table.

use table_types::{EntryId, EntryValue, SequenceNumber, TableError};

/// The unit of shared state.
///
/// An entry binds an immutable name to a typed value, a 16-bit wrapping
/// sequence number that orders writes, and a dirty flag that tracks
/// pending transmission. The id stays [`EntryId::UNKNOWN`] until the
/// server assigns one.
#[derive(Debug, Clone)]
pub struct Entry {
    id: EntryId,
    name: String,
    value: EntryValue,
    seq: SequenceNumber,
    dirty: bool,
}

impl Entry {
    /// Create an entry with the given identity and initial value.
    pub fn new(name: impl Into<String>, id: EntryId, seq: SequenceNumber, value: EntryValue) -> Self {
        Self {
            id,
            name: name.into(),
            value,
            seq,
            dirty: false,
        }
    }

    /// The entry's id, or [`EntryId::UNKNOWN`] while pending assignment.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The entry's immutable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current value.
    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    /// The sequence number of the current value.
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    /// Apply a write only if `seq` is strictly newer than the current
    /// sequence number.
    ///
    /// Returns `Ok(true)` when applied, `Ok(false)` when the write lost
    /// the race and the entry is untouched. A type mismatch is a caller
    /// contract violation and is reported, not coerced.
    pub fn put_value(&mut self, seq: SequenceNumber, value: EntryValue) -> Result<bool, TableError> {
        if value.entry_type() != self.value.entry_type() {
            return Err(TableError::TypeMismatch {
                expected: self.value.entry_type(),
                actual: value.entry_type(),
            });
        }
        if !seq.is_newer_than(self.seq) {
            return Ok(false);
        }
        self.value = value;
        self.seq = seq;
        self.dirty = true;
        Ok(true)
    }

    /// Unconditionally overwrite value and sequence, bypassing the
    /// newer-check. The value must keep the entry's type; use
    /// [`Entry::force_put_typed`] for a type-changing override.
    pub fn force_put(&mut self, seq: SequenceNumber, value: EntryValue) -> Result<(), TableError> {
        if value.entry_type() != self.value.entry_type() {
            return Err(TableError::TypeMismatch {
                expected: self.value.entry_type(),
                actual: value.entry_type(),
            });
        }
        self.value = value;
        self.seq = seq;
        self.dirty = true;
        Ok(())
    }

    /// Unconditionally overwrite value, sequence, and type.
    pub fn force_put_typed(&mut self, seq: SequenceNumber, value: EntryValue) {
        self.value = value;
        self.seq = seq;
        self.dirty = true;
    }

    /// Assign an id to a pending entry.
    ///
    /// Only legal while the id is [`EntryId::UNKNOWN`]; re-parenting an
    /// already-assigned entry would corrupt the id index.
    pub fn set_id(&mut self, id: EntryId) -> Result<(), TableError> {
        if self.id.is_assigned() {
            return Err(TableError::IdAlreadyAssigned(self.id.value()));
        }
        self.id = id;
        Ok(())
    }

    /// Reset the id to [`EntryId::UNKNOWN`] (client disconnect path).
    pub fn clear_id(&mut self) {
        self.id = EntryId::UNKNOWN;
    }

    /// Whether the value changed locally since it was last queued for
    /// transmission.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark a pending transmission.
    pub fn make_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the pending-transmission mark. Called exactly when the entry
    /// is handed to the transmission path.
    pub fn make_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_types::EntryType;

    fn entry(seq: u16, value: f64) -> Entry {
        Entry::new(
            "test",
            EntryId::new(1),
            SequenceNumber::new(seq),
            EntryValue::Double(value),
        )
    }

    #[test]
    fn newer_write_applies() {
        let mut e = entry(5, 1.0);
        let applied = e
            .put_value(SequenceNumber::new(6), EntryValue::Double(2.0))
            .unwrap();
        assert!(applied);
        assert_eq!(e.value().as_double(), Some(2.0));
        assert_eq!(e.seq(), SequenceNumber::new(6));
        assert!(e.is_dirty());
    }

    #[test]
    fn stale_write_is_rejected_without_change() {
        let mut e = entry(6, 2.0);
        let applied = e
            .put_value(SequenceNumber::new(5), EntryValue::Double(9.0))
            .unwrap();
        assert!(!applied);
        assert_eq!(e.value().as_double(), Some(2.0));
        assert_eq!(e.seq(), SequenceNumber::new(6));
        assert!(!e.is_dirty());
    }

    #[test]
    fn replay_of_same_seq_is_rejected() {
        let mut e = entry(5, 1.0);
        assert!(e
            .put_value(SequenceNumber::new(6), EntryValue::Double(2.0))
            .unwrap());
        // Same (seq, value) again: delta == 0, not newer.
        assert!(!e
            .put_value(SequenceNumber::new(6), EntryValue::Double(2.0))
            .unwrap());
        assert_eq!(e.value().as_double(), Some(2.0));
    }

    #[test]
    fn type_mismatch_is_a_contract_violation() {
        let mut e = entry(5, 1.0);
        let err = e
            .put_value(SequenceNumber::new(6), EntryValue::Boolean(true))
            .unwrap_err();
        assert!(matches!(
            err,
            TableError::TypeMismatch {
                expected: EntryType::Double,
                actual: EntryType::Boolean,
            }
        ));
        // Untouched.
        assert_eq!(e.value().as_double(), Some(1.0));
    }

    #[test]
    fn force_put_bypasses_newer_check() {
        let mut e = entry(100, 1.0);
        e.force_put(SequenceNumber::new(3), EntryValue::Double(7.0))
            .unwrap();
        assert_eq!(e.value().as_double(), Some(7.0));
        assert_eq!(e.seq(), SequenceNumber::new(3));
    }

    #[test]
    fn force_put_still_checks_type() {
        let mut e = entry(1, 1.0);
        assert!(e
            .force_put(SequenceNumber::new(2), EntryValue::String("x".into()))
            .is_err());
    }

    #[test]
    fn force_put_typed_changes_type() {
        let mut e = entry(1, 1.0);
        e.force_put_typed(SequenceNumber::new(2), EntryValue::String("x".into()));
        assert_eq!(e.value().as_str(), Some("x"));
    }

    #[test]
    fn set_id_only_while_unknown() {
        let mut e = Entry::new(
            "pending",
            EntryId::UNKNOWN,
            SequenceNumber::new(0),
            EntryValue::Boolean(false),
        );
        e.set_id(EntryId::new(4)).unwrap();
        assert_eq!(e.id(), EntryId::new(4));

        let err = e.set_id(EntryId::new(5)).unwrap_err();
        assert!(matches!(err, TableError::IdAlreadyAssigned(4)));
    }

    #[test]
    fn clear_id_resets_to_unknown() {
        let mut e = entry(1, 1.0);
        assert!(e.id().is_assigned());
        e.clear_id();
        assert!(!e.id().is_assigned());
        // And the entry can be re-assigned afterwards.
        e.set_id(EntryId::new(9)).unwrap();
    }

    #[test]
    fn dirty_tracking_is_explicit() {
        let mut e = entry(1, 1.0);
        assert!(!e.is_dirty());
        e.make_dirty();
        assert!(e.is_dirty());
        e.make_clean();
        assert!(!e.is_dirty());
    }
}
