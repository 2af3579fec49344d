//! Outgoing transmission queue with dirty-flag coalescing.
//!
//! Decouples "this entry changed" from "this entry was sent": offering an
//! already-dirty entry is a no-op because a pending transmission will carry
//! the latest value anyway. N local writes between two flush ticks collapse
//! to exactly one network message.

use crate::entry::Entry;
use std::collections::VecDeque;
use table_types::EntryId;

/// A pending transmission recorded by the queue.
///
/// Assign/Update reference the store slot so the flush path reads the
/// entry's latest state at drain time; deletes carry the id directly since
/// the entry is gone by then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// Introduce the entry at this slot to the peer.
    Assign(usize),
    /// Send the current value of the entry at this slot.
    Update(usize),
    /// Tell the peer to remove this id.
    Delete(EntryId),
}

/// The per-store outgoing queue.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    pending: VecDeque<Pending>,
}

impl OutgoingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an entry for assignment transmission.
    ///
    /// No-op if the entry is already dirty; otherwise marks it dirty and
    /// records exactly one pending transmission.
    pub fn offer_assignment(&mut self, slot: usize, entry: &mut Entry) {
        if entry.is_dirty() {
            return;
        }
        entry.make_dirty();
        self.pending.push_back(Pending::Assign(slot));
    }

    /// Offer an entry for update transmission. Same coalescing rule as
    /// [`OutgoingQueue::offer_assignment`].
    pub fn offer_update(&mut self, slot: usize, entry: &mut Entry) {
        if entry.is_dirty() {
            return;
        }
        entry.make_dirty();
        self.pending.push_back(Pending::Update(slot));
    }

    /// Record a pending delete. Deletes are not coalesced against the
    /// dirty flag; the entry no longer exists.
    pub fn offer_delete(&mut self, id: EntryId) {
        self.pending.push_back(Pending::Delete(id));
    }

    /// Drop any pending assign/update for a slot (the entry was deleted
    /// before the flush tick reached it).
    pub fn drop_slot(&mut self, slot: usize) {
        self.pending
            .retain(|p| !matches!(p, Pending::Assign(s) | Pending::Update(s) if *s == slot));
    }

    /// Take everything queued so far, in offer order.
    pub fn drain(&mut self) -> Vec<Pending> {
        self.pending.drain(..).collect()
    }

    /// Discard all pending transmissions (disconnect path).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queued transmissions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_types::{EntryValue, SequenceNumber};

    fn clean_entry() -> Entry {
        Entry::new(
            "k",
            EntryId::new(1),
            SequenceNumber::new(1),
            EntryValue::Double(0.0),
        )
    }

    #[test]
    fn offering_clean_entry_queues_once() {
        let mut queue = OutgoingQueue::new();
        let mut entry = clean_entry();

        queue.offer_update(3, &mut entry);

        assert!(entry.is_dirty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn offering_dirty_entry_is_a_no_op() {
        let mut queue = OutgoingQueue::new();
        let mut entry = clean_entry();

        queue.offer_update(3, &mut entry);
        queue.offer_update(3, &mut entry);
        queue.offer_update(3, &mut entry);

        assert_eq!(queue.len(), 1, "repeated offers must coalesce");
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut queue = OutgoingQueue::new();
        let mut a = clean_entry();
        let mut b = clean_entry();

        queue.offer_assignment(0, &mut a);
        queue.offer_update(1, &mut b);
        queue.offer_delete(EntryId::new(9));

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                Pending::Assign(0),
                Pending::Update(1),
                Pending::Delete(EntryId::new(9)),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_slot_removes_pending_entry_offers() {
        let mut queue = OutgoingQueue::new();
        let mut a = clean_entry();
        let mut b = clean_entry();

        queue.offer_assignment(0, &mut a);
        queue.offer_update(1, &mut b);
        queue.drop_slot(0);

        assert_eq!(queue.drain(), vec![Pending::Update(1)]);
    }

    #[test]
    fn drop_slot_keeps_deletes() {
        let mut queue = OutgoingQueue::new();
        queue.offer_delete(EntryId::new(2));
        queue.drop_slot(2);
        assert_eq!(queue.len(), 1);
    }
}
