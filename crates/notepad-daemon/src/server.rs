//! WebSocket server for accepting client connections.
//!
//! Manages connection lifecycle, client ID mapping, and message routing.
//! The handshake lifecycle is encapsulated: callers only see `ServerEvent`s
//! with resolved client IDs via `poll_event()`.

use crate::connection::{ClientConnection, ConnectionEvent, IncomingMessage};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// Event emitted by the server after the handshake lifecycle is resolved.
#[derive(Debug)]
pub enum ServerEvent {
    ClientConnected { client_id: String },
    /// A frame from an identified client
    Message(IncomingMessage),
    ClientDisconnected { client_id: String },
}

pub struct WebSocketServer {
    /// Our ID, sent in the handshake
    server_id: String,
    /// Pre-handshake connections indexed by conn_id
    pending: HashMap<String, ClientConnection>,
    /// Post-handshake clients indexed by client ID
    clients: HashMap<String, ClientConnection>,
    /// Map from conn_id to client ID (for resolving messages/closes)
    conn_id_to_client: HashMap<String, String>,
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl WebSocketServer {
    pub fn new(server_id: String) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            server_id,
            pending: HashMap::new(),
            clients: HashMap::new(),
            conn_id_to_client: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Hub listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Upgrade a new TCP connection and send our handshake.
    ///
    /// The connection stays pending until the client's handshake arrives.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks connect and close without a WebSocket handshake
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = ClientConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());

        if let Err(e) = conn.send_handshake(&self.server_id).await {
            error!("Failed to send handshake to {}: {}", conn_id, e);
            return;
        }

        self.pending.insert(conn_id, conn);
    }

    /// Wait for the next server event.
    ///
    /// Connections that close before handshake are cleaned up silently.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        loop {
            let event = self.event_rx.recv().await?;

            match event {
                ConnectionEvent::Handshake { conn_id, client_id } => {
                    let Some(mut conn) = self.pending.remove(&conn_id) else {
                        continue;
                    };
                    debug!("Handshake complete: {} is now known as {}", conn_id, client_id);

                    conn.set_client_id(client_id.clone());
                    if let Some(mut previous) = self.clients.insert(client_id.clone(), conn) {
                        warn!("Client {} reconnected, closing its previous connection", client_id);
                        self.conn_id_to_client.remove(&previous.conn_id);
                        previous.close().await;
                    }
                    self.conn_id_to_client.insert(conn_id, client_id.clone());

                    return Some(ServerEvent::ClientConnected { client_id });
                }
                ConnectionEvent::Message(mut msg) => {
                    let Some(client_id) = self.conn_id_to_client.get(&msg.client_id) else {
                        continue;
                    };
                    msg.client_id = client_id.clone();
                    return Some(ServerEvent::Message(msg));
                }
                ConnectionEvent::Closed { conn_id } => {
                    if let Some(client_id) = self.conn_id_to_client.remove(&conn_id) {
                        self.clients.remove(&client_id);
                        return Some(ServerEvent::ClientDisconnected { client_id });
                    }
                    self.pending.remove(&conn_id);
                    debug!("Connection closed before handshake: {}, not emitting event", conn_id);
                }
            }
        }
    }

    /// Send a frame to a client by ID.
    pub async fn send(&self, client_id: &str, data: &[u8]) -> Result<()> {
        let conn = self
            .clients
            .get(client_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown client: {}", client_id))?;

        conn.send(data).await
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn connected_clients(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Close every connection.
    pub async fn close_all(&mut self) {
        for (_, mut conn) in self.clients.drain().chain(self.pending.drain()) {
            conn.close().await;
        }
        self.conn_id_to_client.clear();
    }
}
