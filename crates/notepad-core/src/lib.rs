//! notepad-core: Shared Rust library for the shared notepad.
//!
//! This crate provides the core functionality for:
//! - Resolving the active note from the navigation fragment (`/notes/<id>`)
//! - Debouncing local edits into a bounded stream of store writes
//! - Gating edits behind the plaintext lock workflow
//! - DocumentStore, KeyValue and EditSurface trait abstractions

pub mod config;
pub mod events;
pub mod format;
pub mod identity;
pub mod image;
pub mod local;
pub mod lock;
pub mod note;
pub mod note_id;
pub mod session;
pub mod store;
pub mod surface;
pub mod sync;

pub use config::NotepadConfig;
pub use events::{EventBus, NotepadEvent, SharedEventBus, Subscription};
pub use format::{Alignment, Color, FontFamily, FontSize, FormatCommand};
pub use identity::{MemoryNavigator, Navigator, Resolution, parse_fragment, resolve_document, share_url};
pub use local::{KeyValue, LocalStore, MemoryKeyValue};
pub use image::{EmbedError, MIN_IMAGE_WIDTH_PX, ResizeDrag, embed_image};
pub use lock::{LockError, LockState, LockStep, LockWorkflow};
pub use note::{EMPTY_MARKUP, NotePatch, NoteRecord};
pub use note_id::{NoteId, NoteIdError};
pub use session::{Session, SessionError, commit_patch};
pub use store::{DocumentStore, InMemoryStore, NoteStream, RecordedWrite, StoreError, Subscribers};
pub use surface::{EditSurface, MemorySurface};
pub use sync::{RemoteApply, Synchronizer, WriteBuffer, now_ms};
