//! The public table handle.
//!
//! A [`Table`] is a cheap-to-clone view over a shared [`EntryStore`] and
//! [`ListenerSet`], scoped to a key prefix. Client and server nodes hand
//! out tables backed by their own store; a standalone table works purely
//! locally.
//!
//! Every mutation runs under the store lock, queues the resulting listener
//! events while still holding it (so delivery order matches mutation
//! order), then pumps the listener queue with no locks held. A listener
//! callback may therefore read or write the table freely.

use std::sync::{Arc, Mutex};

use table_types::{EntryValue, TableError};

use crate::listener::{
    ConnectionCallback, EntryCallback, EntryEvent, EntryEventKind, KeyMatcher, ListenerId,
    ListenerSet,
};
use crate::path;
use crate::store::{EntryStore, Role};

/// A prefix-scoped handle to the shared key-value table.
#[derive(Clone)]
pub struct Table {
    store: Arc<Mutex<EntryStore>>,
    listeners: Arc<ListenerSet>,
    prefix: String,
}

impl Table {
    /// Create a standalone root table with its own store.
    pub fn new(role: Role) -> Self {
        Self::from_shared(
            Arc::new(Mutex::new(EntryStore::new(role))),
            Arc::new(ListenerSet::new()),
        )
    }

    /// Create a root table over an existing store and listener set.
    ///
    /// Used by client and server nodes, which own the store and need the
    /// table to be a view over it.
    pub fn from_shared(store: Arc<Mutex<EntryStore>>, listeners: Arc<ListenerSet>) -> Self {
        Self {
            store,
            listeners,
            prefix: String::from("/"),
        }
    }

    /// The shared store backing this table.
    pub fn shared_store(&self) -> Arc<Mutex<EntryStore>> {
        Arc::clone(&self.store)
    }

    /// The shared listener set backing this table.
    pub fn listener_set(&self) -> Arc<ListenerSet> {
        Arc::clone(&self.listeners)
    }

    /// A view scoped to a nested key prefix. Purely a path operation; no
    /// entry is created.
    pub fn sub_table(&self, name: &str) -> Table {
        Table {
            store: Arc::clone(&self.store),
            listeners: Arc::clone(&self.listeners),
            prefix: path::join(&self.prefix, name),
        }
    }

    /// This table's absolute key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn absolute(&self, key: &str) -> String {
        path::join(&self.prefix, key)
    }

    fn prefix_matcher(&self) -> KeyMatcher {
        if self.prefix == "/" {
            KeyMatcher::All
        } else {
            KeyMatcher::Prefix(format!("{}/", self.prefix))
        }
    }

    /// Run a store mutation, hand its events to the listener queue while
    /// the lock is still held, then pump with no locks held.
    fn mutate<R>(&self, f: impl FnOnce(&mut EntryStore) -> R) -> R {
        let result = {
            let mut store = self.store.lock().unwrap();
            let result = f(&mut store);
            let events = store.take_events();
            self.listeners.enqueue_entry_events(events);
            result
        };
        self.listeners.pump();
        result
    }

    // =========================================================
    // Writes
    // =========================================================

    /// Write a value, creating the entry on first use.
    ///
    /// Fails with [`TableError::TypeMismatch`] if the entry exists with a
    /// different type.
    pub fn put_value(&self, key: &str, value: EntryValue) -> Result<(), TableError> {
        let key = self.absolute(key);
        self.mutate(|store| store.put_local(&key, value))?;
        Ok(())
    }

    /// Write a value, changing the entry's type if it differs.
    pub fn force_put_value(&self, key: &str, value: EntryValue) -> Result<(), TableError> {
        let key = self.absolute(key);
        self.mutate(|store| store.force_put_local(&key, value))?;
        Ok(())
    }

    /// Write a boolean.
    pub fn put_boolean(&self, key: &str, value: bool) -> Result<(), TableError> {
        self.put_value(key, EntryValue::Boolean(value))
    }

    /// Write a double.
    pub fn put_double(&self, key: &str, value: f64) -> Result<(), TableError> {
        self.put_value(key, EntryValue::Double(value))
    }

    /// Write a string.
    pub fn put_string(&self, key: &str, value: impl Into<String>) -> Result<(), TableError> {
        self.put_value(key, EntryValue::String(value.into()))
    }

    /// Write a boolean array.
    pub fn put_boolean_array(&self, key: &str, value: Vec<bool>) -> Result<(), TableError> {
        self.put_value(key, EntryValue::BooleanArray(value))
    }

    /// Write a double array.
    pub fn put_double_array(&self, key: &str, value: Vec<f64>) -> Result<(), TableError> {
        self.put_value(key, EntryValue::DoubleArray(value))
    }

    /// Write a string array.
    pub fn put_string_array(&self, key: &str, value: Vec<String>) -> Result<(), TableError> {
        self.put_value(key, EntryValue::StringArray(value))
    }

    /// Write an opaque byte blob.
    pub fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), TableError> {
        self.put_value(key, EntryValue::Raw(value))
    }

    /// Remove an entry. Returns false if the key does not exist.
    pub fn delete(&self, key: &str) -> bool {
        let key = self.absolute(key);
        self.mutate(|store| store.delete(&key))
    }

    // =========================================================
    // Reads
    // =========================================================

    /// The current value, if the entry exists.
    pub fn get_value(&self, key: &str) -> Option<EntryValue> {
        let key = self.absolute(key);
        let store = self.store.lock().unwrap();
        store.get(&key).map(|e| e.value().clone())
    }

    /// Whether the key exists.
    pub fn contains(&self, key: &str) -> bool {
        let key = self.absolute(key);
        self.store.lock().unwrap().get(&key).is_some()
    }

    /// Read a boolean, falling back to `default` when the key is missing
    /// or holds a different type.
    pub fn get_boolean(&self, key: &str, default: bool) -> bool {
        match self.get_value(key) {
            Some(EntryValue::Boolean(v)) => v,
            _ => default,
        }
    }

    /// Read a double with a fallback.
    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        match self.get_value(key) {
            Some(EntryValue::Double(v)) => v,
            _ => default,
        }
    }

    /// Read a string with a fallback.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get_value(key) {
            Some(EntryValue::String(v)) => v,
            _ => default.to_string(),
        }
    }

    /// Read a boolean array with a fallback.
    pub fn get_boolean_array(&self, key: &str, default: Vec<bool>) -> Vec<bool> {
        match self.get_value(key) {
            Some(EntryValue::BooleanArray(v)) => v,
            _ => default,
        }
    }

    /// Read a double array with a fallback.
    pub fn get_double_array(&self, key: &str, default: Vec<f64>) -> Vec<f64> {
        match self.get_value(key) {
            Some(EntryValue::DoubleArray(v)) => v,
            _ => default,
        }
    }

    /// Read a string array with a fallback.
    pub fn get_string_array(&self, key: &str, default: Vec<String>) -> Vec<String> {
        match self.get_value(key) {
            Some(EntryValue::StringArray(v)) => v,
            _ => default,
        }
    }

    /// Read a byte blob with a fallback.
    pub fn get_raw(&self, key: &str, default: Vec<u8>) -> Vec<u8> {
        match self.get_value(key) {
            Some(EntryValue::Raw(v)) => v,
            _ => default,
        }
    }

    /// Absolute keys currently under this table's prefix, in no particular
    /// order.
    pub fn keys(&self) -> Vec<String> {
        let matcher = self.prefix_matcher();
        let store = self.store.lock().unwrap();
        store
            .snapshot_values()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| matcher.matches(name))
            .collect()
    }

    // =========================================================
    // Listeners
    // =========================================================

    /// Register a listener for one key.
    ///
    /// With `immediate_notify`, the current value (if any) is delivered
    /// before this returns, tagged as new. The replay is queued under the
    /// store lock, so the new listener sees the snapshot value before any
    /// later revision and never sees a revision the snapshot already
    /// covers.
    pub fn listen(
        &self,
        key: &str,
        immediate_notify: bool,
        callback: impl Fn(&EntryEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let matcher = KeyMatcher::Exact(self.absolute(key));
        self.register(matcher, immediate_notify, Arc::new(callback))
    }

    /// Register a listener for every key under this table's prefix.
    pub fn listen_all(
        &self,
        immediate_notify: bool,
        callback: impl Fn(&EntryEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let matcher = self.prefix_matcher();
        self.register(matcher, immediate_notify, Arc::new(callback))
    }

    fn register(
        &self,
        matcher: KeyMatcher,
        immediate_notify: bool,
        callback: EntryCallback,
    ) -> ListenerId {
        if !immediate_notify {
            return self.listeners.add_entry_listener(matcher, callback);
        }
        let id = {
            let store = self.store.lock().unwrap();
            let id = self.listeners.add_entry_listener(matcher.clone(), callback);
            self.listeners
                .enqueue_replay(id, &matcher, store.snapshot_values());
            id
        };
        self.listeners.pump();
        id
    }

    /// Unregister an entry listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_entry_listener(id)
    }

    /// Register a listener for connection state changes.
    ///
    /// With `immediate_notify`, the most recent connection event (if any)
    /// is delivered synchronously before this returns.
    pub fn listen_connection(
        &self,
        immediate_notify: bool,
        callback: impl Fn(&crate::listener::ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let callback: ConnectionCallback = Arc::new(callback);
        self.listeners
            .add_connection_listener(callback, immediate_notify)
    }

    /// Unregister a connection listener.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_connection_listener(id)
    }

    // =========================================================
    // Node introspection
    // =========================================================

    /// Whether the backing store arbitrates (server role).
    pub fn is_server(&self) -> bool {
        self.store.lock().unwrap().role() == Role::Server
    }

    /// Whether the node behind this table currently has a live link,
    /// judged from the last connection event. A standalone table (and a
    /// server table, which has no upstream) reports false.
    pub fn is_connected(&self) -> bool {
        self.listeners
            .connection_snapshot()
            .map(|e| e.connected)
            .unwrap_or(false)
    }
}
