//! Edit buffer synchronizer: debounced outbound writes, idempotent inbound apply.
//!
//! Local edits land in a single-slot `WriteBuffer`. Each edit replaces the
//! slot and pushes the deadline out by the debounce window, so a burst of
//! keystrokes becomes one write of the final markup. The buffer only knows
//! deadlines; whoever owns the event loop sleeps until `next_due()` and then
//! calls `take_due()`. A timer that fires for a superseded edit finds nothing
//! due and does nothing, which is what makes re-staging a cancellation.
//!
//! Inbound values are applied to the surface only when their markup differs
//! from what the surface already shows. Our own writes echo back through the
//! subscription; an echo of the last markup we sent is also skipped while a
//! newer local edit is still pending. There is no merge: the last write to
//! land wins.

use std::time::Duration;
use tracing::debug;

use crate::note::{NotePatch, NoteRecord};
use crate::surface::EditSurface;

/// Current wall-clock time in milliseconds since Unix epoch.
pub fn now_ms() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingWrite {
    markup: String,
    due_at_ms: u64,
}

/// Single-slot pending write with a resettable deadline.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    delay: Duration,
    pending: Option<PendingWrite>,
}

impl WriteBuffer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Replace the pending markup and restart the quiet period.
    ///
    /// Returns the new deadline.
    pub fn stage(&mut self, markup: String, now_ms: u64) -> u64 {
        let due_at_ms = now_ms.saturating_add(self.delay.as_millis() as u64);
        self.pending = Some(PendingWrite { markup, due_at_ms });
        due_at_ms
    }

    /// Deadline of the pending write, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.due_at_ms)
    }

    /// Take the pending markup if its quiet period has elapsed.
    pub fn take_due(&mut self, now_ms: u64) -> Option<String> {
        match &self.pending {
            Some(p) if now_ms >= p.due_at_ms => self.pending.take().map(|p| p.markup),
            _ => None,
        }
    }

    /// Take the pending markup regardless of its deadline.
    pub fn take_now(&mut self) -> Option<String> {
        self.pending.take().map(|p| p.markup)
    }

    /// Drop the pending write. Returns the markup that would have been written.
    pub fn cancel(&mut self) -> Option<String> {
        self.take_now()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Outcome of applying a remote value to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Surface markup was replaced
    Applied,
    /// Surface already showed this markup; left untouched
    Unchanged,
}

/// Mirrors a note between the edit surface and the store.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    buffer: WriteBuffer,
    /// Markup of the most recent write we issued
    last_sent: Option<String>,
}

impl Synchronizer {
    pub fn new(delay: Duration) -> Self {
        Self {
            buffer: WriteBuffer::new(delay),
            last_sent: None,
        }
    }

    /// Stage the surface's latest markup for a debounced write.
    pub fn on_local_edit(&mut self, markup: String, now_ms: u64) -> u64 {
        let due = self.buffer.stage(markup, now_ms);
        debug!("Staged local edit, due at {}", due);
        due
    }

    /// The write to issue now, if the quiet period has elapsed.
    pub fn take_due_write(&mut self, now_ms: u64) -> Option<NotePatch> {
        let markup = self.buffer.take_due(now_ms)?;
        Some(self.sent(markup))
    }

    /// The pending write, issued immediately (shutdown, explicit flush).
    pub fn flush_now(&mut self) -> Option<NotePatch> {
        let markup = self.buffer.take_now()?;
        Some(self.sent(markup))
    }

    /// Record markup written outside the buffer (e.g. a clear).
    pub fn sent(&mut self, markup: String) -> NotePatch {
        self.last_sent = Some(markup.clone());
        NotePatch::content(markup)
    }

    pub fn cancel_pending(&mut self) -> Option<String> {
        self.buffer.cancel()
    }

    pub fn next_write_due(&self) -> Option<u64> {
        self.buffer.next_due()
    }

    pub fn has_pending_write(&self) -> bool {
        self.buffer.is_pending()
    }

    /// Apply a remote value to the surface unless it already shows that markup.
    pub fn on_remote_update<E: EditSurface + ?Sized>(
        &self,
        surface: &mut E,
        record: &NoteRecord,
    ) -> RemoteApply {
        if surface.markup() == record.content {
            return RemoteApply::Unchanged;
        }
        // Stale echo of our own write; the pending edit supersedes it
        if self.buffer.is_pending() && self.last_sent.as_deref() == Some(record.content.as_str()) {
            debug!("Skipping echo of our last write");
            return RemoteApply::Unchanged;
        }
        surface.set_markup(&record.content);
        RemoteApply::Applied
    }
}
