//! Persistence for the hub's records.
//!
//! Notes are stored as pretty JSON in `notes.json` within the data directory.
//! Writes go to a temporary file first and are renamed into place.

use anyhow::Result;
use notepad_core::{NoteId, NoteRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the note database within the data directory.
pub const NOTES_FILE: &str = "notes.json";

/// On-disk shape of the note database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedNotes {
    pub notes: BTreeMap<NoteId, NoteRecord>,
}

/// Storage for the hub's records.
pub struct NoteStorage {
    path: PathBuf,
}

impl NoteStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(NOTES_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load notes from disk. A missing file is an empty database.
    pub fn load(&self) -> Result<PersistedNotes> {
        if !self.path.exists() {
            return Ok(PersistedNotes::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let notes: PersistedNotes = serde_json::from_str(&contents)?;
        Ok(notes)
    }

    /// Save all notes to disk.
    pub fn save(&self, notes: &BTreeMap<NoteId, NoteRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        #[derive(Serialize)]
        struct Borrowed<'a> {
            notes: &'a BTreeMap<NoteId, NoteRecord>,
        }

        let contents = serde_json::to_string_pretty(&Borrowed { notes })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> BTreeMap<NoteId, NoteRecord> {
        let mut notes = BTreeMap::new();
        notes.insert("abc123".parse().unwrap(), NoteRecord::with_content("<b>hi</b>"));
        notes.insert(
            "locked1".parse().unwrap(),
            NoteRecord {
                content: "secret".into(),
                is_locked: true,
                password: Some("pw".into()),
            },
        );
        notes
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = NoteStorage::new(temp_dir.path());
        assert!(storage.load().unwrap().notes.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();

        {
            let storage = NoteStorage::new(temp_dir.path());
            storage.save(&sample()).unwrap();
        }

        let storage = NoteStorage::new(temp_dir.path());
        assert_eq!(storage.load().unwrap().notes, sample());
        assert!(!temp_dir.path().join("notes.json.tmp").exists());
    }

    #[test]
    fn test_file_uses_store_field_names() {
        let temp_dir = TempDir::new().unwrap();
        let storage = NoteStorage::new(temp_dir.path());
        storage.save(&sample()).unwrap();

        let contents = fs::read_to_string(storage.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["notes"]["locked1"]["isLocked"], true);
        assert_eq!(json["notes"]["abc123"]["content"], "<b>hi</b>");
    }

    #[test]
    fn test_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let storage = NoteStorage::new(&temp_dir.path().join("nested/data"));
        storage.save(&sample()).unwrap();
        assert!(storage.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(NOTES_FILE), "{ nope").unwrap();
        assert!(NoteStorage::new(temp_dir.path()).load().is_err());
    }
}
