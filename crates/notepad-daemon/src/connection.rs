//! A single client connection accepted by the hub.
//!
//! The WebSocket stream is split: the write half sits behind a mutex so
//! the server can send from its event loop, and a spawned task drains the
//! read half into the server's event channel.

use crate::message::{HandshakeMessage, MAX_MESSAGE_SIZE};
use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Message received from a client.
#[derive(Debug)]
pub struct IncomingMessage {
    /// Connection ID until the handshake resolves it, then the client ID
    pub client_id: String,
    /// Raw frame payload
    pub data: Vec<u8>,
}

/// Event emitted by a connection's read task.
#[derive(Debug)]
pub enum ConnectionEvent {
    Message(IncomingMessage),
    /// Client completed handshake, revealing its client ID
    Handshake { conn_id: String, client_id: String },
    Closed { conn_id: String },
}

pub struct ClientConnection {
    /// Server-assigned ID (e.g. "conn-1")
    pub conn_id: String,
    /// Client ID (known after handshake)
    pub client_id: Option<String>,
    write: Arc<Mutex<WsSink>>,
    read_task: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Wrap an upgraded stream and start forwarding its frames to `event_tx`.
    pub fn new(
        conn_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        Self {
            conn_id,
            client_id: None,
            write,
            read_task: Some(read_task),
        }
    }

    async fn read_loop(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        let mut handshaken = false;
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data: Vec<u8> = match msg {
                        Message::Binary(data) => data.into(),
                        Message::Text(text) => text.as_bytes().to_vec(),
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    if !handshaken {
                        match HandshakeMessage::from_binary(&data) {
                            Some(handshake) => {
                                debug!(
                                    "Received handshake from {} (client_id: {}, role: {})",
                                    conn_id, handshake.client_id, handshake.role
                                );
                                handshaken = true;
                                let _ = event_tx.send(ConnectionEvent::Handshake {
                                    conn_id: conn_id.clone(),
                                    client_id: handshake.client_id,
                                });
                            }
                            None => warn!("Dropping message from {} before handshake", conn_id),
                        }
                        continue;
                    }

                    let _ = event_tx.send(ConnectionEvent::Message(IncomingMessage {
                        client_id: conn_id.clone(),
                        data,
                    }));
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn_id });
    }

    /// Send a binary frame.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    pub async fn send_handshake(&self, server_id: &str) -> Result<()> {
        self.send(&HandshakeMessage::new(server_id, "server").to_binary())
            .await
    }

    pub fn set_client_id(&mut self, client_id: String) {
        self.client_id = Some(client_id);
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.send(Message::Close(None)).await;
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
