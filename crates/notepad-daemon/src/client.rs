//! RemoteStore: a `DocumentStore` backed by a hub over WebSocket.
//!
//! Requests are correlated with replies by `requestId`. A read task routes
//! replies to the waiting request and fans `changed` notifications out to
//! subscription streams. When the last stream for a note is dropped the
//! next notification for it triggers an `unsubscribe`. If the connection
//! drops, outstanding requests fail and every stream ends.

use async_trait::async_trait;
use futures::channel::mpsc as note_channel;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use notepad_core::store::Result;
use notepad_core::{DocumentStore, NoteId, NotePatch, NoteRecord, NoteStream, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::message::{ClientMessage, HandshakeMessage, MAX_MESSAGE_SIZE, ServerMessage, decode, encode};

/// How long to wait for the hub's handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Default)]
struct Shared {
    connected: bool,
    pending: HashMap<u64, oneshot::Sender<ServerMessage>>,
    streams: HashMap<NoteId, Vec<note_channel::UnboundedSender<NoteRecord>>>,
    /// Latest value per subscribed note, to seed streams opened later
    latest: HashMap<NoteId, NoteRecord>,
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct RemoteStore {
    client_id: String,
    server_id: String,
    write: Arc<AsyncMutex<WsSink>>,
    shared: Arc<Mutex<Shared>>,
    next_request_id: AtomicU64,
    read_task: Option<JoinHandle<()>>,
}

impl RemoteStore {
    /// Connect to a hub and complete the handshake.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect to {}: {}", url, e)))?;
        let (mut write, mut read) = ws.split();

        let client_id = format!("client-{}", uuid::Uuid::new_v4());
        write
            .send(Message::Binary(
                HandshakeMessage::new(&client_id, "client").to_binary().into(),
            ))
            .await
            .map_err(|e| StoreError::Unavailable(format!("handshake: {}", e)))?;

        let server_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::await_handshake(&mut read))
            .await
            .map_err(|_| StoreError::Unavailable("timed out waiting for hub handshake".into()))??;
        info!("Connected to hub {} at {} as {}", server_id, url, client_id);

        let write = Arc::new(AsyncMutex::new(write));
        let shared = Arc::new(Mutex::new(Shared {
            connected: true,
            ..Shared::default()
        }));

        let read_task = tokio::spawn(Self::read_loop(read, Arc::clone(&shared), Arc::clone(&write)));

        Ok(Self {
            client_id,
            server_id,
            write,
            shared,
            next_request_id: AtomicU64::new(1),
            read_task: Some(read_task),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }

    /// Close the connection. Outstanding requests fail and streams end.
    pub async fn close(&mut self) {
        let _ = self.write.lock().await.send(Message::Close(None)).await;
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        Self::disconnect(&self.shared);
    }

    async fn await_handshake(read: &mut SplitStream<WsStream>) -> Result<String> {
        while let Some(frame) = read.next().await {
            let frame = frame.map_err(|e| StoreError::Unavailable(format!("handshake: {}", e)))?;
            let data: Vec<u8> = match frame {
                Message::Binary(data) => data.into(),
                Message::Text(text) => text.as_bytes().to_vec(),
                _ => continue,
            };
            if let Some(handshake) = HandshakeMessage::from_binary(&data) {
                return Ok(handshake.client_id);
            }
        }
        Err(StoreError::Unavailable("hub closed before handshake".into()))
    }

    async fn read_loop(mut read: SplitStream<WsStream>, shared: Arc<Mutex<Shared>>, write: Arc<AsyncMutex<WsSink>>) {
        while let Some(frame) = read.next().await {
            let data: Vec<u8> = match frame {
                Ok(Message::Binary(data)) => data.into(),
                Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                Ok(Message::Close(_)) => {
                    debug!("Hub closed the connection");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Hub connection error: {}", e);
                    break;
                }
            };
            if data.len() > MAX_MESSAGE_SIZE {
                warn!("Dropping oversized message from hub ({} bytes)", data.len());
                continue;
            }

            let message: ServerMessage = match decode(&data) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Ignoring malformed message from hub: {}", e);
                    continue;
                }
            };

            match message {
                ServerMessage::Changed { note_id, record } => {
                    if Self::publish(&shared, &note_id, record) {
                        Self::unsubscribe_if_abandoned(&shared, &write, note_id).await;
                    }
                }
                ServerMessage::Error {
                    request_id: None,
                    message,
                } => {
                    warn!("Hub error: {}", message);
                }
                reply => {
                    let Some(request_id) = reply.request_id() else {
                        continue;
                    };
                    let waiter = lock(&shared).pending.remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => debug!("Reply for unknown request {}", request_id),
                    }
                }
            }
        }

        Self::disconnect(&shared);
    }

    /// Deliver a value to the note's streams. Returns true if none are left.
    fn publish(shared: &Mutex<Shared>, note_id: &NoteId, record: NoteRecord) -> bool {
        let mut shared = lock(shared);
        let Some(senders) = shared.streams.get_mut(note_id) else {
            return false;
        };
        senders.retain(|tx| tx.unbounded_send(record.clone()).is_ok());
        if senders.is_empty() {
            shared.streams.remove(note_id);
            shared.latest.remove(note_id);
            return true;
        }
        shared.latest.insert(note_id.clone(), record);
        false
    }

    /// Tell the hub to stop sending changes for a note nobody follows.
    ///
    /// The check runs with the write half held, so a `subscribe` sent in the
    /// meantime is never followed by a stale `unsubscribe`.
    async fn unsubscribe_if_abandoned(shared: &Mutex<Shared>, write: &AsyncMutex<WsSink>, note_id: NoteId) {
        let mut write = write.lock().await;
        if lock(shared).streams.contains_key(&note_id) {
            debug!("Note {} was subscribed again, keeping it", note_id);
            return;
        }
        debug!("No streams left for {}, unsubscribing", note_id);
        if let Ok(data) = encode(&ClientMessage::Unsubscribe { note_id }) {
            let _ = write.send(Message::Binary(data.into())).await;
        }
    }

    fn disconnect(shared: &Mutex<Shared>) {
        let mut shared = lock(shared);
        if shared.connected {
            info!("Disconnected from hub");
        }
        shared.connected = false;
        // Dropping the senders fails waiters and ends streams
        shared.pending.clear();
        shared.streams.clear();
        shared.latest.clear();
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        let data = encode(message).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write
            .lock()
            .await
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<ServerMessage> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = lock(&self.shared);
            if !shared.connected {
                return Err(StoreError::Unavailable("not connected to hub".into()));
            }
            shared.pending.insert(request_id, tx);
        }

        if let Err(e) = self.send(&build(request_id)).await {
            lock(&self.shared).pending.remove(&request_id);
            return Err(e);
        }

        rx.await
            .map_err(|_| StoreError::Unavailable("connection to hub lost".into()))
    }
}

fn unexpected(reply: ServerMessage) -> StoreError {
    StoreError::Unavailable(format!("unexpected reply from hub: {:?}", reply))
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn allocate(&self) -> Result<NoteId> {
        match self.request(|request_id| ClientMessage::Push { request_id }).await? {
            ServerMessage::Pushed { note_id, .. } => Ok(note_id),
            ServerMessage::Error { message, .. } => Err(StoreError::AllocationFailed(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()> {
        let reply = self
            .request(|request_id| ClientMessage::Set {
                request_id,
                note_id: id.clone(),
                record: record.clone(),
            })
            .await?;
        match reply {
            ServerMessage::Ack { .. } => Ok(()),
            ServerMessage::Error { message, .. } => Err(StoreError::WriteFailed(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>> {
        let reply = self
            .request(|request_id| ClientMessage::Get {
                request_id,
                note_id: id.clone(),
            })
            .await?;
        match reply {
            ServerMessage::Value { record, .. } => Ok(record),
            ServerMessage::Error { message, .. } => Err(StoreError::Unavailable(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()> {
        let reply = self
            .request(|request_id| ClientMessage::Update {
                request_id,
                note_id: id.clone(),
                patch: patch.clone(),
            })
            .await?;
        match reply {
            ServerMessage::Ack { .. } => Ok(()),
            ServerMessage::Error { message, .. } => Err(StoreError::WriteFailed(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream> {
        let (tx, rx) = note_channel::unbounded();
        let first = {
            let mut shared = lock(&self.shared);
            if !shared.connected {
                return Err(StoreError::Unavailable("not connected to hub".into()));
            }
            if let Some(record) = shared.latest.get(id) {
                let _ = tx.unbounded_send(record.clone());
            }
            let senders = shared.streams.entry(id.clone()).or_default();
            senders.push(tx);
            senders.len() == 1
        };

        if first {
            self.send(&ClientMessage::Subscribe { note_id: id.clone() }).await?;
        }
        Ok(rx)
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
