//! DocumentStore trait abstraction for path-addressed note storage.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and single-process embedding
//! - `LocalStore` - Single note in an origin-scoped key-value store
//! - `RemoteStore` (in notepad-daemon) - Realtime hub over WebSocket
//! - `JsStoreBridge` (in notepad-wasm) - Browser database via JS callbacks
//!
//! Uses `target_arch = "wasm32"` for conditional compilation instead of feature flags
//! to avoid Cargo's feature unification issues when building the workspace.

use async_trait::async_trait;
use futures::channel::mpsc;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::note::{NotePatch, NoteRecord};
use crate::note_id::{NoteId, NoteIdGenerator};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    WriteFailed(String),

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Stream of values for one note: the current value on subscribe, then every change.
///
/// Dropping the stream unsubscribes.
pub type NoteStream = mpsc::UnboundedReceiver<NoteRecord>;

/// Platform-independent note storage.
///
/// On native platforms, implementations must be `Send + Sync` for use across threads.
/// On WASM (wasm32), these bounds are relaxed since WASM is single-threaded.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
pub trait DocumentStore: Send + Sync {
    /// Mint a new unique note id
    async fn allocate(&self) -> Result<NoteId>;

    /// Write a full record, replacing whatever was there
    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()>;

    /// Read the current record
    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>>;

    /// Write only the fields present in `patch`
    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()>;

    /// Subscribe to a note's value
    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream>;
}

/// Platform-independent note storage (WASM version without Send + Sync).
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(target_arch = "wasm32")]
pub trait DocumentStore {
    /// Mint a new unique note id
    async fn allocate(&self) -> Result<NoteId>;

    /// Write a full record, replacing whatever was there
    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()>;

    /// Read the current record
    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>>;

    /// Write only the fields present in `patch`
    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()>;

    /// Subscribe to a note's value
    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream>;
}

/// Fan-out of note values to open subscription streams.
///
/// Closed streams are pruned on the next publish.
#[derive(Default)]
pub struct Subscribers {
    streams: RwLock<HashMap<NoteId, Vec<mpsc::UnboundedSender<NoteRecord>>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stream, seeding it with `current` if the note exists.
    pub fn open(&self, id: &NoteId, current: Option<NoteRecord>) -> NoteStream {
        let (tx, rx) = mpsc::unbounded();
        if let Some(record) = current {
            let _ = tx.unbounded_send(record);
        }
        self.streams
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.clone())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver a value to every open stream for `id`.
    pub fn publish(&self, id: &NoteId, record: &NoteRecord) {
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        if let Some(senders) = streams.get_mut(id) {
            senders.retain(|tx| tx.unbounded_send(record.clone()).is_ok());
            if senders.is_empty() {
                streams.remove(id);
            }
        }
    }

    /// Number of live streams for `id`.
    pub fn count(&self, id: &NoteId) -> usize {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// A write that reached an `InMemoryStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Create { id: NoteId, record: NoteRecord },
    Update { id: NoteId, patch: NotePatch },
}

/// In-memory store for testing
pub struct InMemoryStore {
    records: RwLock<HashMap<NoteId, NoteRecord>>,
    subscribers: Subscribers,
    ids: RwLock<NoteIdGenerator>,
    /// Every create/update in arrival order
    writes: RwLock<Vec<RecordedWrite>>,
    fail_allocation: RwLock<bool>,
    fail_writes: RwLock<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            subscribers: Subscribers::new(),
            ids: RwLock::new(NoteIdGenerator::new()),
            writes: RwLock::new(Vec::new()),
            fail_allocation: RwLock::new(false),
            fail_writes: RwLock::new(false),
        }
    }

    /// Seed a record without recording a write or notifying subscribers
    pub fn insert(&self, id: NoteId, record: NoteRecord) {
        self.records.write().unwrap().insert(id, record);
    }

    /// Peek at a record synchronously
    pub fn get(&self, id: &NoteId) -> Option<NoteRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// All writes seen so far
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.read().unwrap().clone()
    }

    /// Content updates for one note, in order
    pub fn content_writes(&self, id: &NoteId) -> Vec<String> {
        self.writes
            .read()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                RecordedWrite::Update { id: wid, patch } if wid == id => patch.content.clone(),
                _ => None,
            })
            .collect()
    }

    /// Make subsequent `allocate` calls fail
    pub fn set_fail_allocation(&self, fail: bool) {
        *self.fail_allocation.write().unwrap() = fail;
    }

    /// Make subsequent `create`/`update` calls fail
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().unwrap() = fail;
    }

    /// Live subscription streams for a note
    pub fn subscriber_count(&self, id: &NoteId) -> usize {
        self.subscribers.count(id)
    }

    fn check_writable(&self) -> Result<()> {
        if *self.fail_writes.read().unwrap() {
            return Err(StoreError::WriteFailed("writes disabled".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DocumentStore for InMemoryStore {
    async fn allocate(&self) -> Result<NoteId> {
        if *self.fail_allocation.read().unwrap() {
            return Err(StoreError::AllocationFailed("allocation disabled".into()));
        }
        let id = self.ids.write().unwrap().next(crate::sync::now_ms());
        debug!("Allocated note {}", id);
        Ok(id)
    }

    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .unwrap()
            .insert(id.clone(), record.clone());
        self.writes.write().unwrap().push(RecordedWrite::Create {
            id: id.clone(),
            record: record.clone(),
        });
        self.subscribers.publish(id, record);
        Ok(())
    }

    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>> {
        Ok(self.get(id))
    }

    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()> {
        self.check_writable()?;
        let updated = {
            let mut records = self.records.write().unwrap();
            let record = records.entry(id.clone()).or_default();
            record.apply(patch);
            record.clone()
        };
        self.writes.write().unwrap().push(RecordedWrite::Update {
            id: id.clone(),
            patch: patch.clone(),
        });
        self.subscribers.publish(id, &updated);
        Ok(())
    }

    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream> {
        Ok(self.subscribers.open(id, self.get(id)))
    }
}

// Implement DocumentStore for Arc<T> where T: DocumentStore
// This allows sharing one store between several sessions in tests
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
impl<T: DocumentStore + Send + Sync> DocumentStore for std::sync::Arc<T> {
    async fn allocate(&self) -> Result<NoteId> {
        (**self).allocate().await
    }

    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()> {
        (**self).create(id, record).await
    }

    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>> {
        (**self).read(id).await
    }

    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()> {
        (**self).update(id, patch).await
    }

    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream> {
        (**self).subscribe(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_inmemory_store_basic_operations() {
        let store = InMemoryStore::new();
        let id = store.allocate().await.unwrap();

        assert_eq!(store.read(&id).await.unwrap(), None);

        store.create(&id, &NoteRecord::empty()).await.unwrap();
        assert_eq!(store.read(&id).await.unwrap(), Some(NoteRecord::empty()));

        store.update(&id, &NotePatch::content("<p>a</p>")).await.unwrap();
        let record = store.read(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "<p>a</p>");
        assert!(!record.is_locked);

        assert_eq!(store.writes().len(), 2);
        assert_eq!(store.content_writes(&id), vec!["<p>a</p>".to_string()]);
    }

    #[tokio::test]
    async fn test_update_creates_missing_record() {
        let store = InMemoryStore::new();
        let id: NoteId = "fresh".parse().unwrap();
        store.update(&id, &NotePatch::locked(true)).await.unwrap();

        let record = store.get(&id).unwrap();
        assert!(record.is_locked);
        assert_eq!(record.content, crate::note::EMPTY_MARKUP);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = InMemoryStore::new();
        let id: NoteId = "abc123".parse().unwrap();
        store.insert(id.clone(), NoteRecord::with_content("first"));

        let mut stream = store.subscribe(&id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().content, "first");

        store.update(&id, &NotePatch::content("second")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_subscribe_missing_note_waits_for_first_write() {
        let store = InMemoryStore::new();
        let id: NoteId = "later".parse().unwrap();
        let mut stream = store.subscribe(&id).await.unwrap();

        store.create(&id, &NoteRecord::empty()).await.unwrap();
        assert_eq!(stream.next().await.unwrap(), NoteRecord::empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_is_pruned() {
        let store = InMemoryStore::new();
        let id: NoteId = "abc".parse().unwrap();
        let stream = store.subscribe(&id).await.unwrap();
        assert_eq!(store.subscriber_count(&id), 1);

        drop(stream);
        assert_eq!(store.subscriber_count(&id), 0);
        store.update(&id, &NotePatch::content("x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryStore::new();
        store.set_fail_allocation(true);
        assert!(matches!(store.allocate().await, Err(StoreError::AllocationFailed(_))));

        store.set_fail_writes(true);
        let id: NoteId = "abc".parse().unwrap();
        assert!(matches!(
            store.update(&id, &NotePatch::content("x")).await,
            Err(StoreError::WriteFailed(_))
        ));
        assert!(store.writes().is_empty());
    }
}
