//! Event infrastructure for notepad-core.
//!
//! Provides `NotepadEvent` for UI notifications and monitoring, and `EventBus`
//! for subscriptions. Platform-specific implementations handle thread safety:
//! - Native: `Arc<EventBus>` with `RwLock` for multi-threaded Tokio runtime
//! - WASM: `Rc<EventBus>` with `RefCell` for single-threaded browser environment

use serde::Serialize;

use crate::lock::LockState;
use crate::note_id::NoteId;

/// Events emitted by a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotepadEvent {
    /// The active note was resolved from the fragment or freshly created.
    DocumentResolved {
        #[serde(rename = "noteId")]
        note_id: NoteId,
        created: bool,
    },
    /// A remote value replaced the surface markup.
    RemoteApplied {
        /// Markup size in bytes.
        size: usize,
    },
    /// A remote value matched the surface and was skipped (usually our own echo).
    RemoteSkipped,
    /// A debounced write was handed to the store.
    WriteFlushed {
        /// Markup size in bytes.
        size: usize,
        /// When the write was issued, in milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A write failed and was dropped.
    WriteFailed { message: String },
    /// The note was locked or unlocked.
    LockChanged { locked: bool },
    /// A password prompt opened.
    PromptOpened {
        /// "set" for a new password, "unlock" to unlock.
        mode: String,
    },
    /// An unlock attempt used the wrong password.
    UnlockRejected,
}

impl NotepadEvent {
    pub fn prompt_opened(state: LockState) -> Self {
        let mode = match state {
            LockState::PromptingSetPassword => "set",
            _ => "unlock",
        };
        NotepadEvent::PromptOpened { mode: mode.into() }
    }
}

// ============================================================================
// Native (multi-threaded) implementation
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod platform {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, RwLock, Weak};

    /// Shared handle to an event bus.
    pub type SharedEventBus = Arc<EventBus>;

    /// Subscription handle that unsubscribes automatically when dropped.
    ///
    /// Follows the disposer pattern: hold this value to keep receiving events,
    /// drop it (or let it go out of scope) to unsubscribe.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing notepad events to subscribers.
    ///
    /// Thread-safe for use in multi-threaded Tokio runtime.
    /// Wrap in `Arc` to enable subscriptions.
    pub struct EventBus {
        callbacks: RwLock<Vec<(usize, Arc<dyn Fn(NotepadEvent) + Send + Sync>)>>,
        next_id: AtomicUsize,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RwLock::new(Vec::new()),
                next_id: AtomicUsize::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> SharedEventBus {
            Arc::new(Self::new())
        }

        /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
        ///
        /// Requires `self` to be wrapped in `Arc`.
        pub fn subscribe(
            self: &Arc<Self>,
            callback: impl Fn(NotepadEvent) + Send + Sync + 'static,
        ) -> Subscription {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.callbacks
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, Arc::new(callback)));
            Subscription {
                bus: Arc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            // Use try_write to avoid deadlock if Drop runs during panic unwinding
            // while a read lock is held (e.g., during emit).
            if let Ok(mut guard) = self.callbacks.try_write() {
                guard.retain(|(i, _)| *i != id);
            }
        }

        /// Emit an event to all subscribers.
        pub fn emit(&self, event: NotepadEvent) {
            // Clone the callback list to prevent deadlock if a callback calls subscribe.
            let callbacks: Vec<_> = self
                .callbacks
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

// ============================================================================
// WASM (single-threaded) implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod platform {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::{Rc, Weak};

    /// Shared handle to an event bus.
    pub type SharedEventBus = Rc<EventBus>;

    /// Subscription handle that unsubscribes automatically when dropped.
    ///
    /// Follows the disposer pattern: hold this value to keep receiving events,
    /// drop it (or let it go out of scope) to unsubscribe.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing notepad events to subscribers.
    ///
    /// Single-threaded for WASM browser environment.
    /// Wrap in `Rc` to enable subscriptions.
    pub struct EventBus {
        callbacks: RefCell<Vec<(usize, Rc<dyn Fn(NotepadEvent)>)>>,
        next_id: Cell<usize>,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> SharedEventBus {
            Rc::new(Self::new())
        }

        /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
        ///
        /// Requires `self` to be wrapped in `Rc`.
        pub fn subscribe(self: &Rc<Self>, callback: impl Fn(NotepadEvent) + 'static) -> Subscription {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            self.callbacks.borrow_mut().push((id, Rc::new(callback)));
            Subscription {
                bus: Rc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            self.callbacks.borrow_mut().retain(|(i, _)| *i != id);
        }

        /// Emit an event to all subscribers.
        pub fn emit(&self, event: NotepadEvent) {
            // Clone the callback list to prevent panic if a callback calls subscribe.
            let callbacks: Vec<_> = self
                .callbacks
                .borrow()
                .iter()
                .map(|(_, cb)| Rc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

pub use platform::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[cfg(not(target_arch = "wasm32"))]
    use std::sync::Arc;

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::shared();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(NotepadEvent::RemoteSkipped);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = EventBus::shared();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(NotepadEvent::UnlockRejected);
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(NotepadEvent::UnlockRejected);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_partial_unsubscribe() {
        let bus = EventBus::shared();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let sub1 = bus.subscribe(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(NotepadEvent::LockChanged { locked: true });
        drop(sub1);
        bus.emit(NotepadEvent::LockChanged { locked: false });

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_event_serialization() {
        let event = NotepadEvent::DocumentResolved {
            note_id: "abc123".parse().unwrap(),
            created: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"documentResolved\""));
        assert!(json.contains("\"noteId\":\"abc123\""));

        let json = serde_json::to_string(&NotepadEvent::prompt_opened(LockState::PromptingUnlock)).unwrap();
        assert_eq!(json, r#"{"type":"promptOpened","mode":"unlock"}"#);
    }
}
