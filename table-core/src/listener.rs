//! Listener registration and event fan-out.
//!
//! Listeners are capability objects: a key matcher plus a callback.
//! Dispatch iterates a snapshot of the registration list, so a callback may
//! register or unregister listeners without invalidating the iteration.
//!
//! Delivery runs through a FIFO handoff queue drained by a single pump:
//! events are enqueued while the store lock is held (so queue order equals
//! mutation order and a listener never observes version N+1 before N for
//! one key) and callbacks run with no locks held, so a callback may write
//! back into the table. Immediate-notify replay travels through the same
//! queue, targeted at the new listener, which also never sees events that
//! were queued before it registered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use table_types::EntryValue;

/// How an entry event relates to the listener's view of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEventKind {
    /// First time this key is reported (`is_new = true`).
    New,
    /// A revision of an already-reported key.
    Updated,
    /// The key was removed; the event carries its last value.
    Deleted,
}

/// A value-changed (or deleted) notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryEvent {
    /// Absolute key of the entry.
    pub name: String,
    /// The value at the time of the event (last value for deletes).
    pub value: EntryValue,
    /// New / updated / deleted.
    pub kind: EntryEventKind,
}

/// A connection-changed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Whether the node is now connected.
    pub connected: bool,
    /// The remote peer, best effort.
    pub remote: String,
}

/// Selects which keys an entry listener observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatcher {
    /// A single absolute key.
    Exact(String),
    /// All keys under a prefix (subtable semantics).
    Prefix(String),
    /// Every key.
    All,
}

impl KeyMatcher {
    /// Whether the matcher selects the given absolute key.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::Exact(k) => k == key,
            KeyMatcher::Prefix(p) => key.starts_with(p.as_str()),
            KeyMatcher::All => true,
        }
    }
}

/// Entry listener callback.
pub type EntryCallback = Arc<dyn Fn(&EntryEvent) + Send + Sync>;

/// Connection listener callback.
pub type ConnectionCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum QueuedEvent {
    Entry {
        event: EntryEvent,
        stamp: u64,
    },
    /// Immediate-notify snapshot item, delivered to one listener only.
    Replay {
        target: ListenerId,
        event: EntryEvent,
    },
    Connection(ConnectionEvent),
}

/// The FIFO plus a monotonic stamp handed to each queued entry event.
/// Registrations record the stamp at registration time; events stamped
/// at or before it are not theirs to see (their state arrives by replay).
#[derive(Default)]
struct EventQueue {
    items: VecDeque<QueuedEvent>,
    stamp: u64,
}

struct EntryRegistration {
    id: ListenerId,
    matcher: KeyMatcher,
    callback: EntryCallback,
    after: u64,
}

struct ConnectionRegistration {
    id: ListenerId,
    callback: ConnectionCallback,
}

/// The per-node listener registry and delivery queue.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    entry_listeners: Mutex<Vec<EntryRegistration>>,
    connection_listeners: Mutex<Vec<ConnectionRegistration>>,
    queue: Mutex<EventQueue>,
    pumping: AtomicBool,
    last_connection: Mutex<Option<ConnectionEvent>>,
}

impl ListenerSet {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an entry listener.
    ///
    /// Events already queued at registration time are not delivered to the
    /// new listener; its view of existing state comes from
    /// [`enqueue_replay`](Self::enqueue_replay), if requested.
    pub fn add_entry_listener(&self, matcher: KeyMatcher, callback: EntryCallback) -> ListenerId {
        let id = self.allocate_id();
        let after = self.queue.lock().unwrap().stamp;
        self.entry_listeners.lock().unwrap().push(EntryRegistration {
            id,
            matcher,
            callback,
            after,
        });
        id
    }

    /// Unregister an entry listener. Returns false if the id was unknown.
    pub fn remove_entry_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.entry_listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Register a connection listener.
    ///
    /// With `immediate_notify`, the most recent connection event (if any)
    /// is delivered synchronously before this returns.
    pub fn add_connection_listener(
        &self,
        callback: ConnectionCallback,
        immediate_notify: bool,
    ) -> ListenerId {
        let id = self.allocate_id();
        let current = {
            let last = self.last_connection.lock().unwrap();
            self.connection_listeners
                .lock()
                .unwrap()
                .push(ConnectionRegistration {
                    id,
                    callback: Arc::clone(&callback),
                });
            if immediate_notify {
                last.clone()
            } else {
                None
            }
        };
        if let Some(event) = current {
            callback(&event);
        }
        id
    }

    /// The most recent connection event observed, if any.
    pub fn connection_snapshot(&self) -> Option<ConnectionEvent> {
        self.last_connection.lock().unwrap().clone()
    }

    /// Unregister a connection listener. Returns false if the id was unknown.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.connection_listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Queue entry events for delivery. Call while holding the store lock
    /// so queue order matches mutation order.
    pub fn enqueue_entry_events(&self, events: impl IntoIterator<Item = EntryEvent>) {
        let mut queue = self.queue.lock().unwrap();
        for event in events {
            queue.stamp += 1;
            let stamp = queue.stamp;
            queue.items.push_back(QueuedEvent::Entry { event, stamp });
        }
    }

    /// Queue an immediate-notify snapshot for one freshly-registered
    /// listener, each item tagged as new.
    ///
    /// Call while still holding the store lock the snapshot was taken
    /// under: the replay then lands in the FIFO ahead of any later
    /// mutation's events, so the target listener sees the snapshot value
    /// before its successors.
    pub fn enqueue_replay(
        &self,
        target: ListenerId,
        matcher: &KeyMatcher,
        snapshot: Vec<(String, EntryValue)>,
    ) {
        let mut queue = self.queue.lock().unwrap();
        for (name, value) in snapshot {
            if matcher.matches(&name) {
                queue.items.push_back(QueuedEvent::Replay {
                    target,
                    event: EntryEvent {
                        name,
                        value,
                        kind: EntryEventKind::New,
                    },
                });
            }
        }
    }

    /// Queue a connection event for delivery.
    pub fn enqueue_connection_event(&self, event: ConnectionEvent) {
        *self.last_connection.lock().unwrap() = Some(event.clone());
        self.queue
            .lock()
            .unwrap()
            .items
            .push_back(QueuedEvent::Connection(event));
    }

    /// Drain and deliver queued events.
    ///
    /// Only one caller pumps at a time; if a pump is already running
    /// (including the case where a callback re-entered the table and
    /// enqueued more events), this returns immediately and the running
    /// pump picks up the new events.
    pub fn pump(&self) {
        if self.pumping.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            let next = self.queue.lock().unwrap().items.pop_front();
            match next {
                Some(QueuedEvent::Entry { event, stamp }) => self.dispatch_entry(&event, stamp),
                Some(QueuedEvent::Replay { target, event }) => {
                    self.dispatch_replay(target, &event)
                }
                Some(QueuedEvent::Connection(event)) => self.dispatch_connection(&event),
                None => break,
            }
        }
        self.pumping.store(false, Ordering::Release);
        // An event enqueued between the final pop and the flag reset would
        // sit in the queue until the next pump; re-check once.
        if !self.queue.lock().unwrap().items.is_empty() {
            self.pump();
        }
    }

    /// Synchronously deliver an event to every matching listener that was
    /// registered before the event was queued.
    fn dispatch_entry(&self, event: &EntryEvent, stamp: u64) {
        let snapshot: Vec<EntryCallback> = {
            let listeners = self.entry_listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|r| r.after < stamp && r.matcher.matches(&event.name))
                .map(|r| Arc::clone(&r.callback))
                .collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }

    fn dispatch_replay(&self, target: ListenerId, event: &EntryEvent) {
        let callback = {
            let listeners = self.entry_listeners.lock().unwrap();
            listeners
                .iter()
                .find(|r| r.id == target)
                .map(|r| Arc::clone(&r.callback))
        };
        // Unregistered before its replay drained: nothing to deliver.
        if let Some(callback) = callback {
            callback(event);
        }
    }

    fn dispatch_connection(&self, event: &ConnectionEvent) {
        let snapshot: Vec<ConnectionCallback> = {
            let listeners = self.connection_listeners.lock().unwrap();
            listeners.iter().map(|r| Arc::clone(&r.callback)).collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(name: &str, value: f64, kind: EntryEventKind) -> EntryEvent {
        EntryEvent {
            name: name.into(),
            value: EntryValue::Double(value),
            kind,
        }
    }

    #[test]
    fn exact_matcher_matches_only_its_key() {
        let m = KeyMatcher::Exact("/a/b".into());
        assert!(m.matches("/a/b"));
        assert!(!m.matches("/a/bc"));
        assert!(!m.matches("/a"));
    }

    #[test]
    fn prefix_matcher_covers_subtable() {
        let m = KeyMatcher::Prefix("/sub/".into());
        assert!(m.matches("/sub/x"));
        assert!(m.matches("/sub/deep/y"));
        assert!(!m.matches("/other/x"));
    }

    #[test]
    fn events_reach_matching_listeners() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        set.add_entry_listener(
            KeyMatcher::Exact("/x".into()),
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        set.enqueue_entry_events([event("/x", 1.0, EntryEventKind::New)]);
        set.enqueue_entry_events([event("/y", 1.0, EntryEventKind::New)]);
        set.pump();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        let id = set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        set.enqueue_entry_events([event("/x", 1.0, EntryEventKind::New)]);
        set.pump();
        assert!(set.remove_entry_listener(id));
        set.enqueue_entry_events([event("/x", 2.0, EntryEventKind::Updated)]);
        set.pump();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_unknown_listener_returns_false() {
        let set = ListenerSet::new();
        let id = set.add_entry_listener(KeyMatcher::All, Arc::new(|_| {}));
        assert!(set.remove_entry_listener(id));
        assert!(!set.remove_entry_listener(id));
    }

    #[test]
    fn delivery_preserves_per_key_order() {
        let set = ListenerSet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = Arc::clone(&seen);
        set.add_entry_listener(
            KeyMatcher::Exact("/k".into()),
            Arc::new(move |e| {
                seen2.lock().unwrap().push(e.value.as_double().unwrap());
            }),
        );

        set.enqueue_entry_events([
            event("/k", 1.0, EntryEventKind::New),
            event("/k", 2.0, EntryEventKind::Updated),
            event("/k", 3.0, EntryEventKind::Updated),
        ]);
        set.pump();

        assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn callback_may_register_listeners_during_dispatch() {
        let set = Arc::new(ListenerSet::new());

        let set2 = Arc::clone(&set);
        set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |_| {
                // Registration during dispatch must not invalidate the
                // snapshot being iterated.
                set2.add_entry_listener(KeyMatcher::All, Arc::new(|_| {}));
            }),
        );

        set.enqueue_entry_events([event("/x", 1.0, EntryEventKind::New)]);
        set.pump();
    }

    #[test]
    fn reentrant_enqueue_is_drained_by_outer_pump() {
        let set = Arc::new(ListenerSet::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let set2 = Arc::clone(&set);
        let seen2 = Arc::clone(&seen);
        set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |e| {
                seen2.lock().unwrap().push(e.name.clone());
                if e.name == "/first" {
                    set2.enqueue_entry_events([event("/second", 1.0, EntryEventKind::New)]);
                    // Re-entrant pump returns immediately; the outer pump
                    // delivers the new event.
                    set2.pump();
                }
            }),
        );

        set.enqueue_entry_events([event("/first", 1.0, EntryEventKind::New)]);
        set.pump();

        assert_eq!(*seen.lock().unwrap(), vec!["/first", "/second"]);
    }

    #[test]
    fn connection_events_fan_out() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits2 = Arc::clone(&hits);
            set.add_connection_listener(
                Arc::new(move |e| {
                    assert!(e.connected);
                    hits2.fetch_add(1, Ordering::SeqCst);
                }),
                false,
            );
        }

        set.enqueue_connection_event(ConnectionEvent {
            connected: true,
            remote: "127.0.0.1:1735".into(),
        });
        set.pump();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn immediate_notify_replays_last_connection_event() {
        let set = ListenerSet::new();
        set.enqueue_connection_event(ConnectionEvent {
            connected: true,
            remote: "10.0.0.2:1735".into(),
        });
        set.pump();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        set.add_connection_listener(
            Arc::new(move |e| {
                seen2.lock().unwrap().push(e.clone());
            }),
            true,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].connected);
        assert_eq!(seen[0].remote, "10.0.0.2:1735");
    }

    #[test]
    fn immediate_notify_is_silent_before_any_event() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        set.add_connection_listener(
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
            true,
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(set.connection_snapshot().is_none());
    }

    #[test]
    fn replay_tags_everything_as_new() {
        let set = ListenerSet::new();
        let kinds = Arc::new(Mutex::new(Vec::new()));

        let kinds2 = Arc::clone(&kinds);
        let id = set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |e| {
                kinds2.lock().unwrap().push(e.kind);
            }),
        );

        set.enqueue_replay(
            id,
            &KeyMatcher::All,
            vec![
                ("/a".into(), EntryValue::Double(1.0)),
                ("/b".into(), EntryValue::Boolean(true)),
            ],
        );
        set.pump();

        let kinds = kinds.lock().unwrap();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.iter().all(|k| *k == EntryEventKind::New));
    }

    #[test]
    fn replay_filters_by_matcher() {
        let set = ListenerSet::new();
        let names = Arc::new(Mutex::new(Vec::new()));

        let names2 = Arc::clone(&names);
        let matcher = KeyMatcher::Prefix("/sub/".into());
        let id = set.add_entry_listener(
            matcher.clone(),
            Arc::new(move |e| {
                names2.lock().unwrap().push(e.name.clone());
            }),
        );

        set.enqueue_replay(
            id,
            &matcher,
            vec![
                ("/sub/a".into(), EntryValue::Double(1.0)),
                ("/other".into(), EntryValue::Double(2.0)),
            ],
        );
        set.pump();

        assert_eq!(*names.lock().unwrap(), vec!["/sub/a"]);
    }

    #[test]
    fn replay_targets_only_the_new_listener() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let target = set.add_entry_listener(KeyMatcher::All, Arc::new(|_| {}));
        set.enqueue_replay(
            target,
            &KeyMatcher::All,
            vec![("/a".into(), EntryValue::Double(1.0))],
        );
        set.pump();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn events_queued_before_registration_are_skipped() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        set.enqueue_entry_events([event("/x", 1.0, EntryEventKind::New)]);

        let hits2 = Arc::clone(&hits);
        set.add_entry_listener(
            KeyMatcher::All,
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        set.pump();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        set.enqueue_entry_events([event("/x", 2.0, EntryEventKind::Updated)]);
        set.pump();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replay_delivers_snapshot_exactly_once_and_in_order() {
        // A registration whose snapshot holds value N must see the replayed
        // N first and N+1 after it, even when an event for N was queued
        // but not yet pumped at registration time.
        let set = ListenerSet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        set.enqueue_entry_events([event("/k", 1.0, EntryEventKind::New)]);

        let seen2 = Arc::clone(&seen);
        let matcher = KeyMatcher::Exact("/k".into());
        let id = set.add_entry_listener(
            matcher.clone(),
            Arc::new(move |e| {
                seen2
                    .lock()
                    .unwrap()
                    .push((e.kind, e.value.as_double().unwrap()));
            }),
        );
        set.enqueue_replay(id, &matcher, vec![("/k".into(), EntryValue::Double(1.0))]);
        set.enqueue_entry_events([event("/k", 2.0, EntryEventKind::Updated)]);
        set.pump();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(EntryEventKind::New, 1.0), (EntryEventKind::Updated, 2.0)]
        );
    }
}
