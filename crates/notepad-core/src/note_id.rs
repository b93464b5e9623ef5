//! NoteId: Opaque identifier for one notepad document.
//!
//! Allocated ids are 20 characters from an ordered 64-character alphabet:
//! 8 characters of millisecond timestamp followed by 12 random characters,
//! so ids sort by creation time. Any other non-empty string without path
//! or fragment metacharacters is accepted when parsed from a URL.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Ordered alphabet for allocated ids (ASCII order matches value order).
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// Longest id accepted from outside.
pub const MAX_NOTE_ID_LEN: usize = 768;

/// Id of the single note kept by the local store.
pub const LOCAL_NOTE_ID: &str = "local";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteIdError {
    #[error("Note ID is empty")]
    Empty,
    #[error("Note ID exceeds {MAX_NOTE_ID_LEN} bytes")]
    TooLong,
    #[error("Note ID contains forbidden character {0:?}")]
    ForbiddenChar(char),
}

/// Identifier of a note, as embedded in `#/notes/<id>`.
///
/// # Examples
/// ```
/// use notepad_core::NoteId;
///
/// let id: NoteId = "abc123".parse().unwrap();
/// assert_eq!(id.as_str(), "abc123");
/// assert!("a/b".parse::<NoteId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(String);

impl NoteId {
    /// Allocate a fresh id from the current wall clock.
    pub fn generate() -> Self {
        NoteIdGenerator::new().next(crate::sync::now_ms())
    }

    /// Id of the note kept by `LocalStore`.
    pub fn local() -> Self {
        Self(LOCAL_NOTE_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), NoteIdError> {
        if s.is_empty() {
            return Err(NoteIdError::Empty);
        }
        if s.len() > MAX_NOTE_ID_LEN {
            return Err(NoteIdError::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']' | '?') || c.is_whitespace() || c.is_control())
        {
            return Err(NoteIdError::ForbiddenChar(c));
        }
        Ok(())
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = NoteIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for NoteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Serialize as plain string, matching the store's key
impl serde::Serialize for NoteId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NoteId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Allocates time-ordered ids.
///
/// Two ids minted in the same millisecond reuse the previous random suffix
/// incremented by one, so they still sort in allocation order.
#[derive(Debug, Default)]
pub struct NoteIdGenerator {
    last_ms: Option<u64>,
    last_random: [u8; RANDOM_LEN],
}

impl NoteIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now_ms: u64) -> NoteId {
        let duplicate = self.last_ms == Some(now_ms);
        self.last_ms = Some(now_ms);

        if !duplicate || !increment(&mut self.last_random) {
            use rand::Rng;
            let mut rng = rand::rng();
            for digit in self.last_random.iter_mut() {
                *digit = rng.random_range(0..64);
            }
        }

        let mut id = String::with_capacity(TIMESTAMP_LEN + RANDOM_LEN);
        let mut timestamp_chars = [0u8; TIMESTAMP_LEN];
        let mut ts = now_ms;
        for slot in timestamp_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(ts % 64) as usize];
            ts /= 64;
        }
        id.extend(timestamp_chars.iter().map(|&b| b as char));
        id.extend(self.last_random.iter().map(|&d| PUSH_CHARS[d as usize] as char));

        NoteId(id)
    }
}

/// Add one to a base-64 digit string. Returns false on overflow.
fn increment(digits: &mut [u8; RANDOM_LEN]) -> bool {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_shape() {
        let id = NoteIdGenerator::new().next(1_700_000_000_000);
        assert_eq!(id.as_str().len(), 20);
        assert!(id.as_str().bytes().all(|b| PUSH_CHARS.contains(&b)));
        // Generated ids always survive a parse
        let parsed: NoteId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_ids_sort_by_time() {
        let mut generator = NoteIdGenerator::new();
        let earlier = generator.next(1_000);
        let later = generator.next(2_000);
        assert!(earlier < later);
    }

    #[test]
    fn test_same_millisecond_stays_ordered() {
        let mut generator = NoteIdGenerator::new();
        let ids: Vec<NoteId> = (0..100).map(|_| generator.next(42)).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_increment_carries() {
        let mut digits = [0u8; RANDOM_LEN];
        digits[RANDOM_LEN - 1] = 63;
        assert!(increment(&mut digits));
        assert_eq!(digits[RANDOM_LEN - 1], 0);
        assert_eq!(digits[RANDOM_LEN - 2], 1);

        let mut full = [63u8; RANDOM_LEN];
        assert!(!increment(&mut full));
    }

    #[test]
    fn test_parse_accepts_opaque_ids() {
        let id: NoteId = "abc123".parse().unwrap();
        assert_eq!(id.to_string(), "abc123");
        assert!("-Nx_9aB".parse::<NoteId>().is_ok());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!("".parse::<NoteId>(), Err(NoteIdError::Empty));
        assert_eq!("a/b".parse::<NoteId>(), Err(NoteIdError::ForbiddenChar('/')));
        assert_eq!("a b".parse::<NoteId>(), Err(NoteIdError::ForbiddenChar(' ')));
        assert!("a.b".parse::<NoteId>().is_err());
        assert!("a#b".parse::<NoteId>().is_err());
        assert_eq!("x".repeat(MAX_NOTE_ID_LEN + 1).parse::<NoteId>(), Err(NoteIdError::TooLong));
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = NoteId::generate();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: NoteId = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
        assert!(serde_json::from_str::<NoteId>("\"a/b\"").is_err());
    }
}
