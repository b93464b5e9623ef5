//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::note::EMPTY_MARKUP;

/// Tunables shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotepadConfig {
    /// Quiet period before a local edit is written to the store (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Markup for a freshly created or cleared note
    #[serde(default = "default_empty_markup")]
    pub empty_markup: String,
}

impl NotepadConfig {
    /// Debounce window as a `Duration`.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Same config with a different debounce window.
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }
}

impl Default for NotepadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            empty_markup: default_empty_markup(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_empty_markup() -> String {
    EMPTY_MARKUP.to_string()
}
