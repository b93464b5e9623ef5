//! notepad-daemon library: the hub server and the native notepad client.
//!
//! Exposes the daemon's components so integration tests and the binary
//! share one implementation.

pub mod client;
pub mod connection;
pub mod daemon;
pub mod driver;
pub mod hub;
pub mod message;
pub mod persistence;
pub mod server;
pub mod surface;
pub mod watcher;

// Re-export key types for convenience
pub use client::RemoteStore;
pub use daemon::HubDaemon;
pub use driver::{ExternalSurface, SessionCommand, SessionHandle, open_session};
pub use hub::NoteHub;
pub use message::{ClientMessage, HandshakeMessage, MAX_MESSAGE_SIZE, ServerMessage};
pub use persistence::NoteStorage;
pub use server::{ServerEvent, WebSocketServer};
pub use surface::FileSurface;
pub use watcher::{FileEventKind, FileWatcher};
