//! The hub daemon: WebSocket server, note state and persistence in one loop.

use anyhow::Result;
use std::future::Future;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::hub::{HubReply, NoteHub};
use crate::message::{ClientMessage, ServerMessage, decode, encode, peek_request_id};
use crate::persistence::NoteStorage;
use crate::server::{ServerEvent, WebSocketServer};

pub struct HubDaemon {
    server: WebSocketServer,
    hub: NoteHub,
    storage: NoteStorage,
}

impl HubDaemon {
    /// Load the notes under `data_dir` and prepare to serve them.
    pub fn open(data_dir: &Path, server_id: String) -> Result<Self> {
        let storage = NoteStorage::new(data_dir);
        let persisted = storage.load()?;
        info!("Loaded {} note(s) from {:?}", persisted.notes.len(), storage.path());

        Ok(Self {
            server: WebSocketServer::new(server_id),
            hub: NoteHub::with_notes(persisted.notes),
            storage,
        })
    }

    pub fn hub(&self) -> &NoteHub {
        &self.hub
    }

    /// Serve clients until `shutdown` resolves.
    pub async fn run(mut self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.server.accept_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                Some(event) = self.server.poll_event() => {
                    match event {
                        ServerEvent::ClientConnected { client_id } => {
                            info!("Client connected: {}", client_id);
                        }
                        ServerEvent::Message(msg) => {
                            self.on_message(&msg.client_id, &msg.data).await;
                        }
                        ServerEvent::ClientDisconnected { client_id } => {
                            info!("Client disconnected: {}", client_id);
                            self.hub.disconnect(&client_id);
                        }
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.server.close_all().await;
        info!("Hub stopped");
        Ok(())
    }

    async fn on_message(&mut self, client_id: &str, data: &[u8]) {
        let message: ClientMessage = match decode(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Bad request from {}: {}", client_id, e);
                let reply = ServerMessage::Error {
                    request_id: peek_request_id(data),
                    message: e.to_string(),
                };
                self.send(client_id, &reply).await;
                return;
            }
        };

        let reply = self.hub.handle(client_id, message);
        self.deliver(reply).await;
    }

    async fn deliver(&mut self, reply: HubReply) {
        if reply.mutated {
            // Logged only; clients keep being served from memory
            if let Err(e) = self.storage.save(self.hub.notes()) {
                error!("Failed to persist notes: {}", e);
            }
        }
        for outbound in reply.outbound {
            self.send(&outbound.client_id, &outbound.message).await;
        }
    }

    async fn send(&self, client_id: &str, message: &ServerMessage) {
        let data = match encode(message) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode reply for {}: {}", client_id, e);
                return;
            }
        };
        if let Err(e) = self.server.send(client_id, &data).await {
            warn!("Failed to send to {}: {}", client_id, e);
        }
    }
}
