//! Per-connection session handling.
//!
//! Each accepted TCP connection runs one [`Session`]. The session owns the
//! socket: it performs the hello exchange, streams the initial table
//! snapshot, and then splits into a read loop (applying client messages to
//! the server) and a writer task (draining the broadcast channel).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use table_types::{Message, ServerHello, PROTOCOL_VERSION};

use crate::error::{ProtocolError, Result};
use crate::framing;
use crate::server::{serialize, TableServer};

/// One client connection's lifecycle.
pub struct Session {
    server: Arc<TableServer>,
    socket: TcpStream,
    peer: SocketAddr,
}

impl Session {
    /// Create a session for an accepted connection.
    pub fn new(server: Arc<TableServer>, socket: TcpStream, peer: SocketAddr) -> Self {
        Self {
            server,
            socket,
            peer,
        }
    }

    /// Drive the session to completion.
    ///
    /// Returns `Ok(())` on a clean disconnect. Protocol violations and
    /// stream failures after establishment surface as errors.
    pub async fn run(self) -> Result<()> {
        let Session {
            server,
            socket,
            peer,
        } = self;

        let max_size = server.config().limits.max_message_size;
        let hello_timeout = Duration::from_secs(server.config().limits.hello_timeout_secs);
        let (mut reader, mut writer) = socket.into_split();

        // The client speaks first. Connections that stay silent are dropped.
        let first = match tokio::time::timeout(
            hello_timeout,
            framing::read_message(&mut reader, max_size),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(%peer, "no hello within timeout, dropping connection");
                return Ok(());
            }
        };

        let hello = match first {
            Message::ClientHello(hello) => hello,
            other => {
                tracing::warn!(%peer, message = ?other, "expected ClientHello");
                return Err(ProtocolError::HelloRequired.into());
            }
        };

        if hello.version != PROTOCOL_VERSION {
            // Answer with our version so the client can report the mismatch,
            // then close.
            send_server_hello(&mut writer).await?;
            return Err(ProtocolError::VersionMismatch {
                client: hello.version,
                server: PROTOCOL_VERSION,
            }
            .into());
        }

        // Establish: queue the hello reply first, then register (which
        // snapshots the table under the store lock), then queue the
        // snapshot. Broadcasts that land between registration and the
        // snapshot carry entries the snapshot already covers, so the
        // client converges in every interleaving.
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let hello_reply = Message::ServerHello(ServerHello {
            version: PROTOCOL_VERSION,
        });
        let _ = tx.send(serialize(&hello_reply)?);

        let (session_id, snapshot) = server.register_session(&hello.identity, tx.clone());
        for assign in snapshot {
            let _ = tx.send(serialize(&Message::EntryAssign(assign))?);
        }

        tracing::info!(%peer, session_id, identity = %hello.identity, "session established");

        let writer_task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(error) = framing::write_frame(&mut writer, &bytes).await {
                    tracing::debug!(%error, "writer stopped");
                    break;
                }
            }
        });

        let mut shutdown = server.shutdown_signal();
        let result = loop {
            let read = tokio::select! {
                read = framing::read_message(&mut reader, max_size) => read,
                _ = shutdown.wait_for(|stop| *stop) => {
                    tracing::debug!(%peer, "server closing, dropping session");
                    break Ok(());
                }
            };
            match read {
                Ok(message) => match server.apply_message(session_id, message) {
                    Ok(replies) => {
                        for reply in replies {
                            match serialize(&reply) {
                                Ok(bytes) => {
                                    if tx.send(bytes).is_err() {
                                        break;
                                    }
                                }
                                Err(error) => {
                                    tracing::error!(%error, "failed to serialize reply");
                                }
                            }
                        }
                    }
                    Err(error) => break Err(error.into()),
                },
                // A stream error here is the client going away.
                Err(ProtocolError::Stream(reason)) => {
                    tracing::debug!(%peer, %reason, "connection closed");
                    break Ok(());
                }
                Err(error) => break Err(error.into()),
            }
        };

        server.unregister_session(session_id);
        writer_task.abort();
        result
    }
}

async fn send_server_hello(writer: &mut OwnedWriteHalf) -> Result<()> {
    let hello = Message::ServerHello(ServerHello {
        version: PROTOCOL_VERSION,
    });
    framing::write_message(writer, &hello).await?;
    Ok(())
}
