//! Local persistence: the whole notepad in an origin-scoped key-value store.
//!
//! The markup lives verbatim under `notepad-content`. Lock metadata, when
//! present, lives as JSON under `notepad-lock` so the content key always
//! holds plain markup. `LocalStore` also implements `DocumentStore` for the
//! single note `local`, so a session runs unchanged on either backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use crate::note::{EMPTY_MARKUP, NotePatch, NoteRecord};
use crate::note_id::NoteId;
use crate::store::{DocumentStore, NoteStream, Result, StoreError, Subscribers};

/// Key holding the note's markup.
pub const CONTENT_KEY: &str = "notepad-content";

/// Key holding `{ isLocked, password }` as JSON.
pub const LOCK_KEY: &str = "notepad-lock";

/// Synchronous string key-value storage (browser `localStorage` and friends).
#[cfg(not(target_arch = "wasm32"))]
pub trait KeyValue: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Synchronous string key-value storage (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait KeyValue {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory key-value store for testing
#[derive(Default)]
pub struct MemoryKeyValue {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValue for MemoryKeyValue {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().unwrap().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredLock {
    #[serde(rename = "isLocked", default)]
    is_locked: bool,
    #[serde(default)]
    password: Option<String>,
}

/// The single local note.
pub struct LocalStore<K> {
    items: K,
    subscribers: Subscribers,
}

impl<K: KeyValue> LocalStore<K> {
    pub fn new(items: K) -> Self {
        Self {
            items,
            subscribers: Subscribers::new(),
        }
    }

    /// Stored markup, or the empty paragraph if nothing has been saved.
    pub fn load_content(&self) -> String {
        self.items
            .get_item(CONTENT_KEY)
            .unwrap_or_else(|| EMPTY_MARKUP.to_string())
    }

    pub fn save_content(&self, markup: &str) -> Result<()> {
        self.items.set_item(CONTENT_KEY, markup)
    }

    fn load_lock(&self) -> StoredLock {
        match self.items.get_item(LOCK_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable lock metadata: {}", e);
                StoredLock::default()
            }),
            None => StoredLock::default(),
        }
    }

    fn save_lock(&self, lock: &StoredLock) -> Result<()> {
        let raw = serde_json::to_string(lock).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.items.set_item(LOCK_KEY, &raw)
    }

    /// The stored note. A never-saved store reads as an empty note.
    pub fn load_record(&self) -> NoteRecord {
        let lock = self.load_lock();
        NoteRecord {
            content: self.load_content(),
            is_locked: lock.is_locked,
            password: lock.password,
        }
    }

    fn save_record(&self, record: &NoteRecord) -> Result<()> {
        self.save_content(&record.content)?;
        if record.is_locked || record.password.is_some() || self.items.get_item(LOCK_KEY).is_some() {
            self.save_lock(&StoredLock {
                is_locked: record.is_locked,
                password: record.password.clone(),
            })?;
        }
        Ok(())
    }

    fn check_id(id: &NoteId) -> Result<()> {
        if *id != NoteId::local() {
            return Err(StoreError::Unavailable(format!(
                "local store only holds note {}, not {}",
                NoteId::local(),
                id
            )));
        }
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<K: KeyValue> DocumentStore for LocalStore<K> {
    async fn allocate(&self) -> Result<NoteId> {
        Ok(NoteId::local())
    }

    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()> {
        Self::check_id(id)?;
        self.save_record(record)?;
        self.subscribers.publish(id, record);
        Ok(())
    }

    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>> {
        Self::check_id(id)?;
        Ok(Some(self.load_record()))
    }

    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()> {
        Self::check_id(id)?;
        let mut record = self.load_record();
        record.apply(patch);
        self.save_record(&record)?;
        self.subscribers.publish(id, &record);
        Ok(())
    }

    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream> {
        Self::check_id(id)?;
        Ok(self.subscribers.open(id, Some(self.load_record())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_load_defaults_to_empty_paragraph() {
        let store = LocalStore::new(MemoryKeyValue::new());
        assert_eq!(store.load_content(), EMPTY_MARKUP);
        assert_eq!(store.load_record(), NoteRecord::empty());
    }

    #[test]
    fn test_content_stored_verbatim_under_fixed_key() {
        let store = LocalStore::new(MemoryKeyValue::new());
        store.save_content("<div><b>hi</b></div>").unwrap();
        assert_eq!(
            store.items.get_item(CONTENT_KEY).as_deref(),
            Some("<div><b>hi</b></div>")
        );
        assert_eq!(store.items.get_item(LOCK_KEY), None);
    }

    #[tokio::test]
    async fn test_update_persists_lock_separately() {
        let store = LocalStore::new(MemoryKeyValue::new());
        let id = store.allocate().await.unwrap();
        store.update(&id, &NotePatch::content("<p>x</p>")).await.unwrap();
        assert_eq!(store.items.get_item(LOCK_KEY), None);

        store
            .update(&id, &NotePatch::lock_with_password("pw"))
            .await
            .unwrap();
        assert_eq!(store.load_content(), "<p>x</p>");

        let record = store.read(&id).await.unwrap().unwrap();
        assert!(record.is_locked);
        assert_eq!(record.password.as_deref(), Some("pw"));
    }

    #[tokio::test]
    async fn test_subscribe_sees_current_then_updates() {
        let store = LocalStore::new(MemoryKeyValue::new());
        let id = NoteId::local();
        let mut stream = store.subscribe(&id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().content, EMPTY_MARKUP);

        store.update(&id, &NotePatch::content("typed")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().content, "typed");
    }

    #[tokio::test]
    async fn test_other_ids_rejected() {
        let store = LocalStore::new(MemoryKeyValue::new());
        let other: NoteId = "abc".parse().unwrap();
        assert!(matches!(store.read(&other).await, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_corrupt_lock_metadata_reads_unlocked() {
        let items = MemoryKeyValue::new();
        items.set_item(LOCK_KEY, "{not json").unwrap();
        let store = LocalStore::new(items);
        assert!(!store.load_record().is_locked);
    }
}
