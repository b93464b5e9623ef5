//! Hub wire protocol.
//!
//! Every frame is UTF-8 JSON sent as a binary WebSocket frame. Both sides
//! open with a `HandshakeMessage`; after that clients send `ClientMessage`s
//! and the hub answers with `ServerMessage`s. Requests carry a `requestId`
//! that the matching reply echoes.

use notepad_core::{NoteId, NotePatch, NoteRecord};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Maximum message size (50MB). Embedded images make notes large.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;

/// Handshake exchanged when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Always "handshake"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Sender's identifier
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// "server" or "client"
    pub role: String,
}

impl HandshakeMessage {
    pub fn new(client_id: &str, role: &str) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            client_id: client_id.to_string(),
            role: role.to_string(),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HandshakeMessage serialization should not fail")
    }

    /// Returns None if the data is not a handshake.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let msg: Self = serde_json::from_slice(data).ok()?;
        (msg.msg_type == "handshake").then_some(msg)
    }
}

/// Requests from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Mint a new note id
    Push { request_id: u64 },
    /// Replace a whole record
    Set {
        request_id: u64,
        note_id: NoteId,
        record: NoteRecord,
    },
    /// Write only the fields in `patch`
    Update {
        request_id: u64,
        note_id: NoteId,
        patch: NotePatch,
    },
    /// Read once
    Get { request_id: u64, note_id: NoteId },
    /// Receive `changed` for this note until unsubscribed
    Subscribe { note_id: NoteId },
    Unsubscribe { note_id: NoteId },
}

/// Replies and notifications from the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Pushed { request_id: u64, note_id: NoteId },
    Ack { request_id: u64 },
    Value {
        request_id: u64,
        note_id: NoteId,
        record: Option<NoteRecord>,
    },
    /// Current value of a subscribed note
    Changed { note_id: NoteId, record: NoteRecord },
    Error {
        request_id: Option<u64>,
        message: String,
    },
}

impl ServerMessage {
    /// The request this message answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::Pushed { request_id, .. }
            | ServerMessage::Ack { request_id }
            | ServerMessage::Value { request_id, .. } => Some(*request_id),
            ServerMessage::Error { request_id, .. } => *request_id,
            ServerMessage::Changed { .. } => None,
        }
    }
}

/// Serialize a protocol message for a binary frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

/// Parse a binary frame, enforcing `MAX_MESSAGE_SIZE`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(MessageError::TooLarge(data.len()));
    }
    Ok(serde_json::from_slice(data)?)
}

/// Best-effort `requestId` of a frame that failed to decode.
pub fn peek_request_id(data: &[u8]) -> Option<u64> {
    serde_json::from_slice::<serde_json::Value>(data)
        .ok()?
        .get("requestId")?
        .as_u64()
}
