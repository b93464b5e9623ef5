//! NoteRecord: the persisted shape of one notepad document.
//!
//! Stored under its `NoteId` as `{ content, isLocked, password }`. The
//! password is plaintext; the lock hides content but does not encrypt it.

use serde::{Deserialize, Serialize};

/// Markup of an empty note: a single empty paragraph.
pub const EMPTY_MARKUP: &str = "<div><br></div>";

/// A single note as stored in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Serialized rich-text markup
    #[serde(default)]
    pub content: String,

    /// Whether edits are currently rejected
    #[serde(rename = "isLocked", default)]
    pub is_locked: bool,

    /// Plaintext password, set the first time the note is locked
    #[serde(default)]
    pub password: Option<String>,
}

impl NoteRecord {
    /// A freshly created note: empty paragraph, unlocked, no password.
    pub fn empty() -> Self {
        Self::with_content(EMPTY_MARKUP)
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_locked: false,
            password: None,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Apply a partial update in place. Absent fields are left untouched.
    pub fn apply(&mut self, patch: &NotePatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(is_locked) = patch.is_locked {
            self.is_locked = is_locked;
        }
        if let Some(password) = &patch.password {
            self.password = Some(password.clone());
        }
    }
}

impl Default for NoteRecord {
    fn default() -> Self {
        Self::empty()
    }
}

/// Partial update of a `NoteRecord`. Only present fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(rename = "isLocked", default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NotePatch {
    pub fn content(markup: impl Into<String>) -> Self {
        Self {
            content: Some(markup.into()),
            ..Self::default()
        }
    }

    pub fn locked(is_locked: bool) -> Self {
        Self {
            is_locked: Some(is_locked),
            ..Self::default()
        }
    }

    /// First lock: store the password and lock in one write.
    pub fn lock_with_password(password: impl Into<String>) -> Self {
        Self {
            is_locked: Some(true),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.is_locked.is_none() && self.password.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record() {
        let record = NoteRecord::empty();
        assert_eq!(record.content, "<div><br></div>");
        assert!(!record.is_locked);
        assert!(!record.has_password());
    }

    #[test]
    fn test_wire_field_names() {
        let record = NoteRecord {
            content: "<p>hi</p>".into(),
            is_locked: true,
            password: Some("pw".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"isLocked\":true"));
        assert!(json.contains("\"password\":\"pw\""));
        assert!(json.contains("\"content\":\"<p>hi</p>\""));
    }

    #[test]
    fn test_missing_fields_default() {
        // Records written before the lock existed carry only content
        let record: NoteRecord = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert_eq!(record.content, "x");
        assert!(!record.is_locked);
        assert_eq!(record.password, None);

        let record: NoteRecord =
            serde_json::from_str(r#"{"content":"x","isLocked":false,"password":null}"#).unwrap();
        assert_eq!(record.password, None);
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let json = serde_json::to_string(&NotePatch::locked(true)).unwrap();
        assert_eq!(json, r#"{"isLocked":true}"#);
        assert!(NotePatch::default().is_empty());
    }

    #[test]
    fn test_apply_patch() {
        let mut record = NoteRecord::empty();
        record.apply(&NotePatch::content("<b>x</b>"));
        assert_eq!(record.content, "<b>x</b>");
        assert!(!record.is_locked);

        record.apply(&NotePatch::lock_with_password("secret"));
        assert!(record.is_locked);
        assert_eq!(record.password.as_deref(), Some("secret"));
        assert_eq!(record.content, "<b>x</b>");

        record.apply(&NotePatch::locked(false));
        assert!(!record.is_locked);
        // Unlocking keeps the password so the next lock needs no prompt
        assert_eq!(record.password.as_deref(), Some("secret"));
    }
}
