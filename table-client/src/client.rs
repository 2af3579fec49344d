//! TableClient - the client node for the table protocol.
//!
//! This module provides [`TableClient`], which connects a local table
//! replica to a server and keeps the two converged.
//!
//! # Architecture
//!
//! TableClient uses a pure state machine (from nettable-core) for the
//! connection lifecycle and interprets the actions to perform actual I/O
//! via the Transport trait.
//!
//! ```text
//! Application → Table → EntryStore ←→ TableClient → Transport → Network
//!                                          ↓
//!                            nettable-core (pure state machine)
//! ```
//!
//! Local reads and writes go straight to the store and keep working while
//! disconnected; the client only moves bytes. A periodic flush tick drains
//! the store's outgoing queue, so N writes between ticks collapse into one
//! message per entry. A quiet tick sends a KeepAlive instead.
//!
//! # Example
//!
//! ```ignore
//! use nettable_client::{ClientConfig, TableClient, TcpTransport};
//!
//! let config = ClientConfig::new("127.0.0.1:1735").with_identity("dashboard");
//! let client = Arc::new(TableClient::new(config, TcpTransport::new()));
//! client.start().await;
//!
//! let table = client.table();
//! table.put_double("/arm/setpoint", 1.25)?;
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use table_core::{
    calculate_backoff, Action, ConnectionEvent, ConnectionState, EntryStore, Event, LinkEvent,
    ListenerSet, Role, Table,
};
use table_types::{ClientHello, Message, TableError, PROTOCOL_VERSION};

use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Table state error.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server speaks a protocol version we do not.
    #[error("server speaks unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Configuration for TableClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the server to connect to (`host:port` for TCP).
    pub server_address: String,
    /// Human-readable client identity sent in the hello.
    pub identity: String,
    /// Interval between flush ticks.
    pub flush_period: Duration,
    /// Ceiling on the exponential reconnect backoff (jitter excluded).
    pub reconnect_backoff_max: Duration,
}

impl ClientConfig {
    /// Create a configuration with default identity and flush period.
    pub fn new(server_address: &str) -> Self {
        Self {
            server_address: server_address.to_string(),
            identity: "nettable client".to_string(),
            flush_period: Duration::from_millis(100),
            reconnect_backoff_max: Duration::from_secs(30),
        }
    }

    /// Set the client identity.
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Set the flush period.
    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Set the reconnect backoff ceiling.
    pub fn with_reconnect_backoff_max(mut self, max: Duration) -> Self {
        self.reconnect_backoff_max = max;
        self
    }
}

/// The client node.
///
/// Owns the local replica and the connection lifecycle.
pub struct TableClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    store: Arc<StdMutex<EntryStore>>,
    listeners: Arc<ListenerSet>,
    state: Arc<Mutex<ConnectionState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> TableClient<T> {
    /// Create a new TableClient.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            store: Arc::new(StdMutex::new(EntryStore::new(Role::Client))),
            listeners: Arc::new(ListenerSet::new()),
            state: Arc::new(Mutex::new(ConnectionState::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The root table backed by this client's replica.
    pub fn table(&self) -> Table {
        Table::from_shared(Arc::clone(&self.store), Arc::clone(&self.listeners))
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_connected()
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn apply(&self, event: Event) -> Vec<Action> {
        let mut state = self.state.lock().await;
        let (new_state, actions) = state.clone().on_event(event);
        *state = new_state;
        actions
    }

    /// Turn EmitEvent actions into connection listener notifications.
    fn emit_link_events(&self, actions: &[Action]) {
        let mut any = false;
        for action in actions {
            if let Action::EmitEvent(event) = action {
                any = true;
                self.listeners.enqueue_connection_event(ConnectionEvent {
                    connected: matches!(event, LinkEvent::Connected),
                    remote: self.config.server_address.clone(),
                });
            }
        }
        if any {
            self.listeners.pump();
        }
    }

    fn reconnect_delay(&self, actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::StartReconnectTimer { attempt } => {
                Some(calculate_backoff(*attempt, self.config.reconnect_backoff_max))
            }
            _ => None,
        })
    }

    /// Make one connection attempt and perform the hello exchange.
    ///
    /// On success the whole table is re-offered for assignment; the server
    /// replies with authoritative ids (and streams its own entries).
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _ = self.apply(Event::ConnectRequested).await;

        if let Err(e) = self.transport.connect(&self.config.server_address).await {
            let actions = self
                .apply(Event::ConnectFailed {
                    error: e.to_string(),
                })
                .await;
            self.emit_link_events(&actions);
            return Err(ClientError::ConnectionFailed(e.to_string()));
        }
        let _ = self.apply(Event::ConnectSucceeded).await;

        match self.exchange_hellos().await {
            Ok(()) => {
                let actions = self.apply(Event::HelloAccepted).await;
                {
                    let mut store = self.store.lock().unwrap();
                    store.queue_all_for_assignment();
                }
                self.emit_link_events(&actions);
                tracing::info!(server = %self.config.server_address, "connected");
                Ok(())
            }
            Err(error) => {
                let actions = self
                    .apply(Event::HelloRejected {
                        error: error.to_string(),
                    })
                    .await;
                let _ = self.transport.close().await;
                self.emit_link_events(&actions);
                Err(error)
            }
        }
    }

    async fn exchange_hellos(&self) -> Result<(), ClientError> {
        let hello = Message::ClientHello(ClientHello {
            version: PROTOCOL_VERSION,
            identity: self.config.identity.clone(),
        });
        self.transport.send(&hello.to_bytes()?).await?;

        let reply = self.transport.recv().await?;
        match Message::from_bytes(&reply).map_err(|e| ClientError::Protocol(e.to_string()))? {
            Message::ServerHello(server_hello) => {
                if server_hello.version != PROTOCOL_VERSION {
                    return Err(ClientError::UnsupportedVersion(server_hello.version));
                }
                Ok(())
            }
            other => Err(ClientError::Protocol(format!(
                "expected ServerHello, got {:?}",
                other
            ))),
        }
    }

    /// Drain the outgoing queue onto the wire. A quiet tick sends a
    /// KeepAlive so the server can tell silence from death.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let messages = {
            let mut store = self.store.lock().unwrap();
            store.drain_outgoing()
        };
        if messages.is_empty() {
            self.transport.send(&Message::KeepAlive.to_bytes()?).await?;
            return Ok(());
        }
        for message in messages {
            self.transport.send(&message.to_bytes()?).await?;
        }
        Ok(())
    }

    /// Apply one received frame to the local replica.
    fn process_incoming(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let message =
            Message::from_bytes(bytes).map_err(|e| ClientError::Protocol(e.to_string()))?;
        {
            let mut store = self.store.lock().unwrap();
            match message {
                Message::EntryAssign(assign) => {
                    store.receive_assignment(assign.id, &assign.name, assign.seq, assign.value)?;
                }
                Message::EntryUpdate(update) => {
                    store.receive_update(update.id, update.seq, update.value)?;
                }
                Message::EntryDelete(delete) => {
                    store.receive_delete(delete.id);
                }
                Message::KeepAlive => {}
                other => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected message from server: {:?}",
                        other
                    )));
                }
            }
            let events = store.take_events();
            self.listeners.enqueue_entry_events(events);
        }
        self.listeners.pump();
        Ok(())
    }

    /// Drop id assignments and pending transmissions; values survive.
    fn reset_store_for_disconnect(&self) {
        let mut store = self.store.lock().unwrap();
        store.clear_ids();
        store.reset_outgoing();
    }

    /// Receive and flush until the connection dies. Returns the reason.
    async fn session_loop(&self) -> String {
        let mut flush_tick = tokio::time::interval(self.config.flush_period);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                received = self.transport.recv() => match received {
                    Ok(bytes) => {
                        if let Err(error) = self.process_incoming(&bytes) {
                            tracing::warn!(%error, "dropping connection");
                            return error.to_string();
                        }
                    }
                    Err(error) => return error.to_string(),
                },
                _ = flush_tick.tick() => {
                    if let Err(error) = self.flush().await {
                        return error.to_string();
                    }
                }
            }
        }
    }

    /// Drive the connection until closed: connect, run the session, and
    /// reconnect with exponential backoff when it drops.
    pub async fn run(&self) {
        let mut delay: Option<Duration> = None;
        loop {
            if let Some(d) = delay.take() {
                tokio::time::sleep(d).await;
            }
            match self.connect().await {
                Ok(()) => {
                    let reason = self.session_loop().await;
                    tracing::warn!(reason = %reason, "connection lost");
                    let actions = self.apply(Event::ConnectionLost { reason }).await;
                    self.reset_store_for_disconnect();
                    let _ = self.transport.close().await;
                    self.emit_link_events(&actions);
                    match self.reconnect_delay(&actions) {
                        Some(d) => delay = Some(d),
                        None => break,
                    }
                }
                Err(error) => {
                    let state = self.state.lock().await.clone();
                    match state {
                        ConnectionState::Reconnecting { attempt } => {
                            let d = calculate_backoff(attempt, self.config.reconnect_backoff_max);
                            tracing::warn!(%error, attempt, delay_ms = d.as_millis() as u64, "connect failed");
                            delay = Some(d);
                        }
                        _ => break,
                    }
                }
            }
        }
    }
}

impl<T: Transport + 'static> TableClient<T> {
    /// Spawn the connection driver in the background.
    pub async fn start(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move { client.run().await });
        self.tasks.lock().await.push(handle);
    }

    /// Disconnect and stop the background driver.
    pub async fn close(&self) -> Result<(), ClientError> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let actions = self.apply(Event::DisconnectRequested).await;
        let _ = self.transport.close().await;
        self.reset_store_for_disconnect();
        self.emit_link_events(&actions);
        Ok(())
    }
}
