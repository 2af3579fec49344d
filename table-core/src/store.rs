//! The authoritative per-participant entry table.
//!
//! One store per node, keyed simultaneously by name and by id over a single
//! slot arena, so both lookups resolve to the same record without
//! duplicating mutable state. The store is pure: mutations append
//! [`EntryEvent`]s to an internal queue and record pending transmissions in
//! the outgoing queue; the node layer drains both and performs the I/O.

use std::collections::HashMap;

use table_types::{
    EntryAssign, EntryDelete, EntryId, EntryUpdate, EntryValue, Message, SequenceNumber,
    TableError,
};

use crate::entry::Entry;
use crate::listener::{EntryEvent, EntryEventKind};
use crate::outgoing::{OutgoingQueue, Pending};

/// Id-allocation policy, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Entries are created with [`EntryId::UNKNOWN`] and offered to the
    /// server for assignment.
    Client,
    /// Ids are assigned immediately from a local allocator.
    Server,
}

/// Whether a network-applied write re-queues the entry for transmission
/// (multi-hop propagation) or stays quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebroadcastPolicy {
    /// Network writes never mark an entry for retransmission.
    Quiet,
    /// An applied network write is offered to the outgoing queue.
    Rebroadcast,
}

/// Result of a local put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Whether the write was applied (local writes always apply).
    pub applied: bool,
    /// Whether the entry was created by this put.
    pub created: bool,
}

/// Authoritative state after processing an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    /// The entry's id after the assignment.
    pub id: EntryId,
    /// The entry's name.
    pub name: String,
    /// The entry's sequence number after the assignment.
    pub seq: SequenceNumber,
    /// The entry's value after the assignment.
    pub value: EntryValue,
    /// Whether the assignment created the entry.
    pub created: bool,
}

/// The per-participant entry table and write state machine.
pub struct EntryStore {
    role: Role,
    policy: RebroadcastPolicy,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<EntryId, usize>,
    /// Store-level counter for locally-originated writes.
    seq: SequenceNumber,
    next_id: u16,
    outgoing: OutgoingQueue,
    events: Vec<EntryEvent>,
}

impl EntryStore {
    /// Create a store for the given role with the [`RebroadcastPolicy::Quiet`]
    /// policy.
    pub fn new(role: Role) -> Self {
        Self::with_policy(role, RebroadcastPolicy::Quiet)
    }

    /// Create a store with an explicit rebroadcast policy.
    pub fn with_policy(role: Role, policy: RebroadcastPolicy) -> Self {
        Self {
            role,
            policy,
            slots: Vec::new(),
            free: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            seq: SequenceNumber::new(0),
            next_id: 0,
            outgoing: OutgoingQueue::new(),
            events: Vec::new(),
        }
    }

    /// The store's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Look up an entry by name. Absence is a routine outcome, not an error.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.by_name
            .get(name)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Look up an entry by assigned id. Pending-id entries are excluded.
    pub fn get_by_id(&self, id: EntryId) -> Option<&Entry> {
        self.by_id
            .get(&id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Current `(name, value)` pairs, for immediate-notify replay.
    pub fn snapshot_values(&self) -> Vec<(String, EntryValue)> {
        self.slots
            .iter()
            .flatten()
            .map(|e| (e.name().to_string(), e.value().clone()))
            .collect()
    }

    /// Current state as assignment messages (server initial sync).
    pub fn snapshot_assigns(&self) -> Vec<EntryAssign> {
        self.slots
            .iter()
            .flatten()
            .map(|e| EntryAssign {
                id: e.id(),
                name: e.name().to_string(),
                seq: e.seq(),
                value: e.value().clone(),
            })
            .collect()
    }

    /// Apply a local write, creating the entry on first use of the name.
    ///
    /// Allocates the next local sequence number, applies the write, queues
    /// it for transmission and records a listener event tagged with whether
    /// the entry pre-existed.
    pub fn put_local(&mut self, name: &str, value: EntryValue) -> Result<PutOutcome, TableError> {
        if let Some(&slot) = self.by_name.get(name) {
            let current = match self.slots[slot].as_ref() {
                Some(entry) => {
                    if entry.value().entry_type() != value.entry_type() {
                        return Err(TableError::TypeMismatch {
                            expected: entry.value().entry_type(),
                            actual: value.entry_type(),
                        });
                    }
                    entry.seq()
                }
                None => return Ok(PutOutcome { applied: false, created: false }),
            };
            let seq = self.allocate_seq(Some(current));
            if let Some(entry) = self.slots[slot].as_mut() {
                let was_dirty = entry.is_dirty();
                let applied = entry.put_value(seq, value.clone())?;
                if applied {
                    self.events.push(EntryEvent {
                        name: name.to_string(),
                        value,
                        kind: EntryEventKind::Updated,
                    });
                    // A pre-existing dirty mark means a pending transmission
                    // already covers this slot and will read the new value at
                    // drain time. Otherwise route the dirty mark through the
                    // queue so exactly one pending item exists.
                    if !was_dirty {
                        entry.make_clean();
                        self.outgoing.offer_update(slot, entry);
                    }
                }
                return Ok(PutOutcome { applied, created: false });
            }
            Ok(PutOutcome { applied: false, created: false })
        } else {
            let id = match self.role {
                Role::Server => self.allocate_id(),
                Role::Client => EntryId::UNKNOWN,
            };
            let seq = self.allocate_seq(None);
            let entry = Entry::new(name, id, seq, value.clone());
            let slot = self.insert(entry);
            if let Some(entry) = self.slots[slot].as_mut() {
                self.outgoing.offer_assignment(slot, entry);
            }
            self.events.push(EntryEvent {
                name: name.to_string(),
                value,
                kind: EntryEventKind::New,
            });
            Ok(PutOutcome { applied: true, created: true })
        }
    }

    /// Apply a forced, possibly type-changing local write.
    pub fn force_put_local(&mut self, name: &str, value: EntryValue) -> Result<PutOutcome, TableError> {
        if let Some(&slot) = self.by_name.get(name) {
            let current = self.slots[slot].as_ref().map(|e| e.seq());
            let seq = self.allocate_seq(current);
            if let Some(entry) = self.slots[slot].as_mut() {
                let was_dirty = entry.is_dirty();
                entry.force_put_typed(seq, value.clone());
                if !was_dirty {
                    entry.make_clean();
                    self.outgoing.offer_update(slot, entry);
                }
            }
            self.events.push(EntryEvent {
                name: name.to_string(),
                value,
                kind: EntryEventKind::Updated,
            });
            Ok(PutOutcome { applied: true, created: false })
        } else {
            self.put_local(name, value)
        }
    }

    /// Apply an assignment received from the peer.
    ///
    /// Creates the entry if the name is unknown; otherwise an assigned-id
    /// assignment is authoritative (forced apply, id remap as needed) and
    /// an unassigned-id offer contends through the normal newer-check.
    pub fn receive_assignment(
        &mut self,
        id: EntryId,
        name: &str,
        seq: SequenceNumber,
        value: EntryValue,
    ) -> Result<AssignmentOutcome, TableError> {
        if let Some(&slot) = self.by_name.get(name) {
            let old_id = match self.slots[slot].as_ref() {
                Some(entry) => entry.id(),
                None => EntryId::UNKNOWN,
            };
            if id.is_assigned() {
                // Authoritative: adopt the peer's id and state.
                if old_id != id {
                    if old_id.is_assigned() {
                        self.by_id.remove(&old_id);
                    }
                    if let Some(entry) = self.slots[slot].as_mut() {
                        entry.clear_id();
                        entry.set_id(id)?;
                    }
                    self.by_id.insert(id, slot);
                }
                if let Some(entry) = self.slots[slot].as_mut() {
                    let was_dirty = entry.is_dirty();
                    entry.force_put_typed(seq, value.clone());
                    self.events.push(EntryEvent {
                        name: name.to_string(),
                        value,
                        kind: EntryEventKind::Updated,
                    });
                    Self::settle_network_write(&mut self.outgoing, self.policy, slot, entry, was_dirty);
                }
            } else {
                // A peer's offer for a name we already hold: contested.
                if let Some(entry) = self.slots[slot].as_mut() {
                    let was_dirty = entry.is_dirty();
                    if entry.put_value(seq, value.clone())? {
                        self.events.push(EntryEvent {
                            name: name.to_string(),
                            value,
                            kind: EntryEventKind::Updated,
                        });
                        Self::settle_network_write(
                            &mut self.outgoing,
                            self.policy,
                            slot,
                            entry,
                            was_dirty,
                        );
                    }
                }
            }
            self.outcome_for(slot, name, false)
        } else {
            let assigned = if id.is_assigned() {
                id
            } else if self.role == Role::Server {
                self.allocate_id()
            } else {
                return Err(TableError::InvalidMessage(format!(
                    "assignment for '{}' without an id",
                    name
                )));
            };
            let entry = Entry::new(name, assigned, seq, value.clone());
            let slot = self.insert(entry);
            self.events.push(EntryEvent {
                name: name.to_string(),
                value,
                kind: EntryEventKind::New,
            });
            if self.policy == RebroadcastPolicy::Rebroadcast {
                if let Some(entry) = self.slots[slot].as_mut() {
                    self.outgoing.offer_assignment(slot, entry);
                }
            }
            self.outcome_for(slot, name, true)
        }
    }

    /// Apply an update received from the peer.
    ///
    /// Unknown ids and stale sequence numbers are silently dropped: both
    /// are expected consequences of best-effort delivery. Returns whether
    /// the write was applied.
    pub fn receive_update(
        &mut self,
        id: EntryId,
        seq: SequenceNumber,
        value: EntryValue,
    ) -> Result<bool, TableError> {
        let slot = match self.by_id.get(&id) {
            Some(&slot) => slot,
            None => return Ok(false),
        };
        if let Some(entry) = self.slots[slot].as_mut() {
            let was_dirty = entry.is_dirty();
            let applied = entry.put_value(seq, value.clone())?;
            if applied {
                self.events.push(EntryEvent {
                    name: entry.name().to_string(),
                    value,
                    kind: EntryEventKind::Updated,
                });
                Self::settle_network_write(&mut self.outgoing, self.policy, slot, entry, was_dirty);
            }
            return Ok(applied);
        }
        Ok(false)
    }

    /// Apply a delete received from the peer. Returns the removed name.
    pub fn receive_delete(&mut self, id: EntryId) -> Option<String> {
        let slot = *self.by_id.get(&id)?;
        self.remove_slot(slot)
    }

    /// Remove an entry locally and queue a delete for the peer.
    pub fn delete(&mut self, name: &str) -> bool {
        let slot = match self.by_name.get(name) {
            Some(&slot) => slot,
            None => return false,
        };
        let id = self.slots[slot].as_ref().map(|e| e.id());
        if self.remove_slot(slot).is_some() {
            // A never-assigned entry was never introduced to the peer, so
            // there is nothing to delete remotely.
            if let Some(id) = id.filter(|id| id.is_assigned()) {
                self.outgoing.offer_delete(id);
            }
            true
        } else {
            false
        }
    }

    /// Drop all id assignments, preserving values (client disconnect).
    ///
    /// The store re-requests fresh ids on the next connection.
    pub fn clear_ids(&mut self) {
        for entry in self.slots.iter_mut().flatten() {
            entry.clear_id();
        }
        self.by_id.clear();
    }

    /// Discard pending transmissions and dirty marks (the connection they
    /// were bound for is gone).
    pub fn reset_outgoing(&mut self) {
        self.outgoing.clear();
        for entry in self.slots.iter_mut().flatten() {
            entry.make_clean();
        }
    }

    /// Offer every entry for assignment (reconnect re-sync).
    pub fn queue_all_for_assignment(&mut self) {
        for slot in 0..self.slots.len() {
            if let Some(entry) = self.slots[slot].as_mut() {
                self.outgoing.offer_assignment(slot, entry);
            }
        }
    }

    /// Drain pending transmissions into wire messages, clearing dirty marks
    /// exactly as each entry is handed to the transmission path.
    pub fn drain_outgoing(&mut self) -> Vec<Message> {
        let pending = self.outgoing.drain();
        let mut messages = Vec::with_capacity(pending.len());
        for item in pending {
            match item {
                Pending::Assign(slot) | Pending::Update(slot) => {
                    if let Some(entry) = self.slots.get_mut(slot).and_then(|s| s.as_mut()) {
                        entry.make_clean();
                        // An entry still awaiting its id always goes out as
                        // an assignment offer.
                        let as_assign =
                            matches!(item, Pending::Assign(_)) || !entry.id().is_assigned();
                        if as_assign {
                            messages.push(Message::EntryAssign(EntryAssign {
                                id: entry.id(),
                                name: entry.name().to_string(),
                                seq: entry.seq(),
                                value: entry.value().clone(),
                            }));
                        } else {
                            messages.push(Message::EntryUpdate(EntryUpdate {
                                id: entry.id(),
                                seq: entry.seq(),
                                value: entry.value().clone(),
                            }));
                        }
                    }
                }
                Pending::Delete(id) => {
                    messages.push(Message::EntryDelete(EntryDelete { id }));
                }
            }
        }
        messages
    }

    /// Whether any transmissions are pending.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Take the listener events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<EntryEvent> {
        std::mem::take(&mut self.events)
    }

    fn outcome_for(
        &self,
        slot: usize,
        name: &str,
        created: bool,
    ) -> Result<AssignmentOutcome, TableError> {
        match self.slots[slot].as_ref() {
            Some(entry) => Ok(AssignmentOutcome {
                id: entry.id(),
                name: name.to_string(),
                seq: entry.seq(),
                value: entry.value().clone(),
                created,
            }),
            None => Err(TableError::InvalidMessage(format!(
                "entry '{}' vanished during assignment",
                name
            ))),
        }
    }

    /// Resolve the dirty flag after an applied network write.
    ///
    /// A pre-existing dirty mark means a local transmission is already
    /// queued and will carry the newer value; otherwise the policy decides
    /// whether the write propagates onward.
    fn settle_network_write(
        outgoing: &mut OutgoingQueue,
        policy: RebroadcastPolicy,
        slot: usize,
        entry: &mut Entry,
        was_dirty: bool,
    ) {
        if was_dirty {
            return;
        }
        entry.make_clean();
        if policy == RebroadcastPolicy::Rebroadcast {
            outgoing.offer_update(slot, entry);
        }
    }

    fn insert(&mut self, entry: Entry) -> usize {
        let name = entry.name().to_string();
        let id = entry.id();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.by_name.insert(name, slot);
        if id.is_assigned() {
            self.by_id.insert(id, slot);
        }
        slot
    }

    fn remove_slot(&mut self, slot: usize) -> Option<String> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.by_name.remove(entry.name());
        if entry.id().is_assigned() {
            self.by_id.remove(&entry.id());
        }
        self.outgoing.drop_slot(slot);
        self.free.push(slot);
        self.events.push(EntryEvent {
            name: entry.name().to_string(),
            value: entry.value().clone(),
            kind: EntryEventKind::Deleted,
        });
        Some(entry.name().to_string())
    }

    /// Allocate the next local sequence number.
    ///
    /// The counter is advanced past the entry's current sequence when a
    /// network write has moved it ahead, so local puts always win over the
    /// locally-known history and allocation stays monotonic.
    fn allocate_seq(&mut self, current: Option<SequenceNumber>) -> SequenceNumber {
        self.seq = self.seq.next();
        if let Some(current) = current {
            if !self.seq.is_newer_than(current) {
                self.seq = current.next();
            }
        }
        self.seq
    }

    fn allocate_id(&mut self) -> EntryId {
        loop {
            let candidate = EntryId::new(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if candidate.is_assigned() && !self.by_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
