//! Main TableServer coordination.
//!
//! TableServer owns the authoritative entry store, tracks active sessions,
//! and routes entry traffic between them. Each client session registers a
//! byte channel here; applying a client's message broadcasts the result to
//! every other session, and server-local writes are broadcast to all of
//! them on a periodic flush tick.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use table_core::{EntryStore, ListenerSet, Role, Table};
use table_types::{EntryAssign, Message};

use crate::config::Config;
use crate::error::{ProtocolError, ProtocolResult, Result};
use crate::session::Session;

/// Operational metrics for monitoring server activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64` - no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total connections accepted (before session establishment).
    pub connections_total: AtomicU64,
    /// Total entry assignments processed.
    pub assigns_total: AtomicU64,
    /// Total entry updates applied.
    pub updates_total: AtomicU64,
    /// Total entry deletes applied.
    pub deletes_total: AtomicU64,
    /// Total keepalives received.
    pub keepalives_total: AtomicU64,
    /// Total broadcast fan-outs performed.
    pub broadcasts_total: AtomicU64,
    /// Total protocol errors (invalid messages, version mismatches, etc.).
    pub errors_total: AtomicU64,
}

/// A registered session's delivery channel.
struct SessionHandle {
    identity: String,
    sender: UnboundedSender<Vec<u8>>,
}

/// The server node.
pub struct TableServer {
    config: Config,
    store: Arc<StdMutex<EntryStore>>,
    listeners: Arc<ListenerSet>,
    sessions: DashMap<u64, SessionHandle>,
    next_session_id: AtomicU64,
    metrics: ServerMetrics,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TableServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableServer")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("sessions_count", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl TableServer {
    /// Create a new TableServer with the given config.
    pub fn new(config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store: Arc::new(StdMutex::new(EntryStore::new(Role::Server))),
            listeners: Arc::new(ListenerSet::new()),
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            metrics: ServerMetrics::default(),
            shutdown,
        }
    }

    /// Stop serving: the accept loop and flush task unwind, and every
    /// session tears down its connection. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// The root table over the authoritative store. Writes made here are
    /// broadcast to every client on the next flush tick.
    pub fn table(&self) -> Table {
        Table::from_shared(Arc::clone(&self.store), Arc::clone(&self.listeners))
    }

    /// Count of active sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Register a session and snapshot the table in one step.
    ///
    /// The snapshot and the registration happen under the store lock, so
    /// every write is covered either by the snapshot or by a subsequent
    /// broadcast; none can fall between.
    pub fn register_session(
        &self,
        identity: &str,
        sender: UnboundedSender<Vec<u8>>,
    ) -> (u64, Vec<EntryAssign>) {
        let store = self.store.lock().unwrap();
        let snapshot = store.snapshot_assigns();
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            session_id,
            SessionHandle {
                identity: identity.to_string(),
                sender,
            },
        );
        tracing::debug!(
            session_id,
            identity,
            entries = snapshot.len(),
            total = self.sessions.len(),
            "registered session"
        );
        (session_id, snapshot)
    }

    /// Unregister a session (client disconnected).
    pub fn unregister_session(&self, session_id: u64) {
        if let Some((_, handle)) = self.sessions.remove(&session_id) {
            tracing::debug!(
                session_id,
                identity = %handle.identity,
                remaining = self.sessions.len(),
                "unregistered session"
            );
        }
    }

    /// Run a store mutation, routing its events to the listener queue.
    fn with_store<R>(&self, f: impl FnOnce(&mut EntryStore) -> R) -> R {
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

    /// Send serialized message bytes to every session except `exclude`.
    fn broadcast_bytes(&self, bytes: &[u8], exclude: Option<u64>) {
        let mut delivered = 0usize;
        for entry in self.sessions.iter() {
            if Some(*entry.key()) == exclude {
                continue;
            }
            // A closed channel means the session is tearing down; its own
            // read loop performs the unregistration.
            if entry.value().sender.send(bytes.to_vec()).is_ok() {
                delivered += 1;
            }
        }
        if delivered > 0 {
            self.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply one message from an established session.
    ///
    /// Returns the direct replies for the originating session; side
    /// effects on other sessions happen via broadcast.
    pub fn apply_message(
        &self,
        session_id: u64,
        message: Message,
    ) -> ProtocolResult<Vec<Message>> {
        match message {
            Message::EntryAssign(assign) => {
                let outcome = self.with_store(|store| {
                    store.receive_assignment(assign.id, &assign.name, assign.seq, assign.value)
                })?;
                self.metrics.assigns_total.fetch_add(1, Ordering::Relaxed);

                // Everyone, the offerer included, learns the authoritative
                // id and the winning value.
                let authoritative = Message::EntryAssign(EntryAssign {
                    id: outcome.id,
                    name: outcome.name,
                    seq: outcome.seq,
                    value: outcome.value,
                });
                let bytes = serialize(&authoritative)?;
                self.broadcast_bytes(&bytes, Some(session_id));
                Ok(vec![authoritative])
            }
            Message::EntryUpdate(update) => {
                let applied = self.with_store(|store| {
                    store.receive_update(update.id, update.seq, update.value.clone())
                })?;
                if applied {
                    self.metrics.updates_total.fetch_add(1, Ordering::Relaxed);
                    let bytes = serialize(&Message::EntryUpdate(update))?;
                    self.broadcast_bytes(&bytes, Some(session_id));
                }
                Ok(Vec::new())
            }
            Message::EntryDelete(delete) => {
                let removed = self.with_store(|store| store.receive_delete(delete.id));
                if let Some(name) = removed {
                    self.metrics.deletes_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(session_id, %name, "entry deleted");
                    let bytes = serialize(&Message::EntryDelete(delete))?;
                    self.broadcast_bytes(&bytes, Some(session_id));
                }
                Ok(Vec::new())
            }
            Message::KeepAlive => {
                self.metrics.keepalives_total.fetch_add(1, Ordering::Relaxed);
                Ok(Vec::new())
            }
            other @ (Message::ClientHello(_) | Message::ServerHello(_)) => {
                Err(ProtocolError::UnexpectedMessage {
                    expected: "entry traffic".to_string(),
                    actual: message_name(&other).to_string(),
                })
            }
        }
    }

    /// Broadcast pending server-local writes to every session.
    pub fn flush_local_writes(&self) -> ProtocolResult<()> {
        let messages = {
            let mut store = self.store.lock().unwrap();
            store.drain_outgoing()
        };
        for message in messages {
            let bytes = serialize(&message)?;
            self.broadcast_bytes(&bytes, None);
        }
        Ok(())
    }

    /// Bind the configured address and serve until failure.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.bind_address).await?;
        tracing::info!(address = %self.config.server.bind_address, "listening");
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener until [`close`](Self::close).
    pub async fn run_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let flusher = Arc::clone(&self);
        let flush_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(flusher.config.sync.flush_period());
            let mut shutdown = flusher.shutdown_signal();
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(error) = flusher.flush_local_writes() {
                            tracing::error!(%error, "local flush failed");
                        }
                    }
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
            }
        });

        let mut shutdown = self.shutdown_signal();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    self.metrics
                        .connections_total
                        .fetch_add(1, Ordering::Relaxed);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        run_session(server, socket, peer).await;
                    });
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        flush_task.abort();
        // Sessions observe the same signal and hang up on their own; the
        // registry is cleared here so the count settles immediately.
        self.sessions.clear();
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn run_session(server: Arc<TableServer>, socket: tokio::net::TcpStream, peer: SocketAddr) {
    match Session::new(Arc::clone(&server), socket, peer).run().await {
        Ok(()) => tracing::debug!(%peer, "session closed"),
        Err(error) => {
            server.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%peer, %error, "session ended with error");
        }
    }
}

pub(crate) fn serialize(message: &Message) -> ProtocolResult<Vec<u8>> {
    message.to_bytes().map_err(|e| ProtocolError::InvalidMessage {
        reason: e.to_string(),
    })
}

fn message_name(message: &Message) -> &'static str {
    match message {
        Message::ClientHello(_) => "ClientHello",
        Message::ServerHello(_) => "ServerHello",
        Message::EntryAssign(_) => "EntryAssign",
        Message::EntryUpdate(_) => "EntryUpdate",
        Message::EntryDelete(_) => "EntryDelete",
        Message::KeepAlive => "KeepAlive",
    }
}
