//! Editing session: one note mirrored into one edit surface.
//!
//! `Session` owns the surface, the write buffer and the lock workflow. It
//! never touches the store itself: operations that change the note return the
//! `NotePatch` to write, and the driver that owns the store issues it with
//! `commit_patch`. That keeps the session synchronous and lets the same code
//! run under Tokio and in the browser.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NotepadConfig;
use crate::events::{EventBus, NotepadEvent, SharedEventBus};
use crate::format::FormatCommand;
use crate::identity::share_url;
use crate::image::{EmbedError, ResizeDrag, embed_image};
use crate::lock::{LockError, LockState, LockStep, LockWorkflow};
use crate::note::{NotePatch, NoteRecord};
use crate::note_id::NoteId;
use crate::store::DocumentStore;
use crate::surface::EditSurface;
use crate::sync::{RemoteApply, Synchronizer, now_ms};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Note is locked")]
    Locked,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("No image selected")]
    NoImageSelected,
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct Session<E> {
    id: NoteId,
    surface: E,
    sync: Synchronizer,
    lock: LockWorkflow,
    /// Last value received from the store
    snapshot: Option<NoteRecord>,
    selected_image: Option<usize>,
    empty_markup: String,
    events: SharedEventBus,
}

impl<E: EditSurface> Session<E> {
    pub fn new(id: NoteId, surface: E, config: &NotepadConfig) -> Self {
        Self::with_events(id, surface, config, EventBus::shared())
    }

    pub fn with_events(id: NoteId, surface: E, config: &NotepadConfig, events: SharedEventBus) -> Self {
        Self {
            id,
            surface,
            sync: Synchronizer::new(config.debounce()),
            lock: LockWorkflow::new(),
            snapshot: None,
            selected_image: None,
            empty_markup: config.empty_markup.clone(),
            events,
        }
    }

    pub fn id(&self) -> &NoteId {
        &self.id
    }

    pub fn surface(&self) -> &E {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut E {
        &mut self.surface
    }

    pub fn snapshot(&self) -> Option<&NoteRecord> {
        self.snapshot.as_ref()
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Mirror a value from the store into the surface.
    pub fn on_remote_update(&mut self, record: NoteRecord) -> RemoteApply {
        let was_locked = self.lock.is_locked();
        self.lock.observe(&record);
        let locked = self.lock.is_locked();

        let outcome = self.sync.on_remote_update(&mut self.surface, &record);
        self.surface.set_editable(!locked);

        if was_locked != locked {
            info!("Note {} {} remotely", self.id, if locked { "locked" } else { "unlocked" });
            self.events.emit(NotepadEvent::LockChanged { locked });
        }
        match outcome {
            RemoteApply::Applied => self.events.emit(NotepadEvent::RemoteApplied {
                size: record.content.len(),
            }),
            RemoteApply::Unchanged => self.events.emit(NotepadEvent::RemoteSkipped),
        }

        self.snapshot = Some(record);
        outcome
    }

    /// The user changed the surface; stage its markup. Returns the write deadline.
    pub fn on_local_edit(&mut self, now_ms: u64) -> Result<u64> {
        self.ensure_unlocked()?;
        let markup = self.surface.markup();
        Ok(self.sync.on_local_edit(markup, now_ms))
    }

    /// The debounced write, once its quiet period has elapsed.
    pub fn take_due_write(&mut self, now_ms: u64) -> Option<NotePatch> {
        self.sync.take_due_write(now_ms)
    }

    /// The pending write, regardless of its deadline.
    pub fn flush_now(&mut self) -> Option<NotePatch> {
        self.sync.flush_now()
    }

    pub fn next_write_due(&self) -> Option<u64> {
        self.sync.next_write_due()
    }

    pub fn has_pending_write(&self) -> bool {
        self.sync.has_pending_write()
    }

    pub fn apply_format(&mut self, command: FormatCommand, now_ms: u64) -> Result<()> {
        self.ensure_unlocked()?;
        debug!("Applying {}", command.command_name());
        self.surface.apply_format(&command);
        self.on_local_edit(now_ms)?;
        Ok(())
    }

    /// Embed an image file at the caret as a data URL.
    pub fn insert_image(&mut self, mime: &str, bytes: &[u8], now_ms: u64) -> Result<()> {
        self.ensure_unlocked()?;
        let url = embed_image(mime, bytes)?;
        self.apply_format(FormatCommand::InsertImage(url), now_ms)
    }

    /// Select the `index`-th image for resizing, or clear the selection.
    pub fn select_image(&mut self, index: Option<usize>) {
        self.selected_image = index;
    }

    pub fn selected_image(&self) -> Option<usize> {
        self.selected_image
    }

    /// Apply a drag position to the selected image. Returns whether the width changed.
    pub fn resize_selected_image(&mut self, drag: &ResizeDrag, x: i32) -> Result<bool> {
        self.ensure_unlocked()?;
        let index = self.selected_image.ok_or(SessionError::NoImageSelected)?;
        match drag.width_at(x) {
            Some(width) => Ok(self.surface.resize_image(index, width)),
            None => Ok(false),
        }
    }

    /// The drag ended; persist the resized markup like any other edit.
    pub fn finish_resize(&mut self, now_ms: u64) -> Result<u64> {
        if self.selected_image.is_none() {
            return Err(SessionError::NoImageSelected);
        }
        self.on_local_edit(now_ms)
    }

    /// Reset the note to the empty paragraph. The write is immediate.
    pub fn clear(&mut self) -> Result<NotePatch> {
        self.ensure_unlocked()?;
        if self.sync.cancel_pending().is_some() {
            debug!("Clear superseded a pending write");
        }
        self.selected_image = None;
        self.surface.set_markup(&self.empty_markup);
        Ok(self.sync.sent(self.empty_markup.clone()))
    }

    /// The single lock button.
    pub fn toggle_lock(&mut self) -> LockStep {
        let step = self.lock.toggle();
        self.after_lock_step(&step);
        step
    }

    pub fn request_lock(&mut self) -> LockStep {
        let step = self.lock.request_lock();
        self.after_lock_step(&step);
        step
    }

    pub fn request_unlock(&mut self) -> LockStep {
        let step = self.lock.request_unlock();
        self.after_lock_step(&step);
        step
    }

    /// Submit the open prompt. The lock takes effect locally before the write lands.
    ///
    /// A wrong password leaves the note locked with the prompt closed; call
    /// `request_unlock` to ask again.
    pub fn submit_password(&mut self, input: &str) -> Result<NotePatch> {
        match self.lock.submit_password(input) {
            Ok(patch) => {
                let locked = self.lock.is_locked();
                self.surface.set_editable(!locked);
                self.events.emit(NotepadEvent::LockChanged { locked });
                Ok(patch)
            }
            Err(LockError::IncorrectPassword) => {
                warn!("Incorrect password for note {}", self.id);
                self.events.emit(NotepadEvent::UnlockRejected);
                Err(LockError::IncorrectPassword.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn cancel_prompt(&mut self) -> bool {
        self.lock.cancel_prompt()
    }

    /// A patch this session produced was not written.
    ///
    /// A failed lock change is rolled back to the last stored record.
    pub fn on_write_failed(&mut self, patch: &NotePatch) {
        if patch.is_locked.is_none() || !self.lock.has_pending_change() {
            return;
        }
        self.lock.abandon_pending();
        let Some(record) = &self.snapshot else {
            return;
        };
        let was_locked = self.lock.is_locked();
        self.lock.observe(record);
        let locked = self.lock.is_locked();
        self.surface.set_editable(!locked);
        if was_locked != locked {
            warn!("Lock change for note {} was not saved", self.id);
            self.events.emit(NotepadEvent::LockChanged { locked });
        }
    }

    pub fn share_url(&self, base: &str) -> String {
        share_url(base, &self.id)
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.lock.is_locked() {
            return Err(SessionError::Locked);
        }
        Ok(())
    }

    fn after_lock_step(&mut self, step: &LockStep) {
        match step {
            LockStep::Commit(_) => {
                let locked = self.lock.is_locked();
                self.surface.set_editable(!locked);
                self.events.emit(NotepadEvent::LockChanged { locked });
            }
            LockStep::Prompt(state) => self.events.emit(NotepadEvent::prompt_opened(*state)),
            LockStep::Unchanged => {}
        }
    }
}

/// Issue a patch produced by a session, reporting the outcome on `events`.
///
/// Failed writes are logged and dropped. Returns whether the write landed.
pub async fn commit_patch<S>(store: &S, id: &NoteId, patch: &NotePatch, events: &EventBus) -> bool
where
    S: DocumentStore + ?Sized,
{
    match store.update(id, patch).await {
        Ok(()) => {
            if let Some(content) = &patch.content {
                events.emit(NotepadEvent::WriteFlushed {
                    size: content.len(),
                    timestamp: now_ms() as f64,
                });
            }
            true
        }
        Err(e) => {
            warn!("Write to note {} failed: {}", id, e);
            events.emit(NotepadEvent::WriteFailed {
                message: e.to_string(),
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemoryNavigator, Navigator, resolve_document};
    use crate::note::EMPTY_MARKUP;
    use crate::store::InMemoryStore;
    use crate::surface::MemorySurface;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    fn session(markup: &str) -> Session<MemorySurface> {
        Session::new("abc123".parse().unwrap(), MemorySurface::new(markup), &NotepadConfig::default())
    }

    fn locked_record(password: &str) -> NoteRecord {
        NoteRecord {
            content: "<p>secret</p>".into(),
            is_locked: true,
            password: Some(password.into()),
        }
    }

    fn recorded_events(session: &Session<MemorySurface>) -> (Arc<Mutex<Vec<NotepadEvent>>>, crate::events::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = session.events().subscribe(move |event| sink.lock().unwrap().push(event));
        (seen, sub)
    }

    #[test]
    fn test_typing_burst_writes_once() {
        let mut session = session(EMPTY_MARKUP);
        let mut writes = Vec::new();
        for (i, markup) in ["a", "ab", "abc", "abcd"].iter().enumerate() {
            let now = i as u64 * 100;
            session.surface_mut().type_markup(markup);
            session.on_local_edit(now).unwrap();
            writes.extend(session.take_due_write(now + 50));
        }
        assert!(writes.is_empty());
        assert_eq!(session.next_write_due(), Some(800));

        writes.extend(session.take_due_write(800));
        assert_eq!(writes, vec![NotePatch::content("abcd")]);
        assert!(!session.has_pending_write());
    }

    #[test]
    fn test_remote_update_applies_once() {
        let mut session = session(EMPTY_MARKUP);
        let record = NoteRecord::with_content("<p>from elsewhere</p>");

        assert_eq!(session.on_remote_update(record.clone()), RemoteApply::Applied);
        assert_eq!(session.on_remote_update(record.clone()), RemoteApply::Unchanged);
        assert_eq!(session.surface().set_count(), 1);
        assert_eq!(session.snapshot(), Some(&record));
    }

    #[test]
    fn test_own_echo_leaves_surface_alone() {
        let mut session = session(EMPTY_MARKUP);
        session.surface_mut().type_markup("<p>mine</p>");
        session.on_local_edit(0).unwrap();
        let patch = session.take_due_write(500).unwrap();

        let mut record = NoteRecord::empty();
        record.apply(&patch);
        assert_eq!(session.on_remote_update(record), RemoteApply::Unchanged);
        assert_eq!(session.surface().set_count(), 0);
    }

    #[test]
    fn test_locked_record_disables_editing() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(locked_record("pw"));

        assert!(session.is_locked());
        assert!(!session.surface().is_editable());
        assert_eq!(session.on_local_edit(0), Err(SessionError::Locked));
        assert_eq!(
            session.apply_format(FormatCommand::Bold, 0),
            Err(SessionError::Locked)
        );
        assert_eq!(session.clear(), Err(SessionError::Locked));
        assert!(!session.has_pending_write());
    }

    #[test]
    fn test_first_lock_prompts_for_password() {
        let mut session = session(EMPTY_MARKUP);
        let (seen, _sub) = recorded_events(&session);

        assert_eq!(
            session.toggle_lock(),
            LockStep::Prompt(LockState::PromptingSetPassword)
        );
        assert!(session.surface().is_editable());

        let patch = session.submit_password("hunter2").unwrap();
        assert_eq!(patch, NotePatch::lock_with_password("hunter2"));
        assert!(!session.surface().is_editable());

        let events = seen.lock().unwrap();
        assert!(matches!(events[0], NotepadEvent::PromptOpened { ref mode } if mode == "set"));
        assert!(matches!(events[1], NotepadEvent::LockChanged { locked: true }));
    }

    #[test]
    fn test_relock_with_existing_password_is_immediate() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(NoteRecord {
            content: EMPTY_MARKUP.into(),
            is_locked: false,
            password: Some("pw".into()),
        });

        assert_eq!(session.toggle_lock(), LockStep::Commit(NotePatch::locked(true)));
        assert!(session.is_locked());
        assert!(!session.surface().is_editable());
    }

    #[test]
    fn test_unlock_with_correct_password() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(locked_record("Secret"));

        session.toggle_lock();
        assert_eq!(session.submit_password("Secret"), Ok(NotePatch::locked(false)));
        assert!(!session.is_locked());
        assert!(session.surface().is_editable());
    }

    #[test]
    fn test_unlock_with_wrong_password() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(locked_record("Secret"));
        let (seen, _sub) = recorded_events(&session);

        session.toggle_lock();
        assert_eq!(
            session.submit_password("nope"),
            Err(SessionError::Lock(LockError::IncorrectPassword))
        );
        assert!(session.is_locked());
        assert!(!session.surface().is_editable());
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, NotepadEvent::UnlockRejected)));
    }

    #[test]
    fn test_stale_echo_does_not_undo_lock() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(NoteRecord {
            content: EMPTY_MARKUP.into(),
            is_locked: false,
            password: Some("pw".into()),
        });
        session.surface_mut().type_markup("a");
        session.on_local_edit(0).unwrap();
        session.take_due_write(500).unwrap();

        assert_eq!(session.toggle_lock(), LockStep::Commit(NotePatch::locked(true)));

        // Echo of the content write, which the hub handled before the lock
        session.on_remote_update(NoteRecord {
            content: "a".into(),
            is_locked: false,
            password: Some("pw".into()),
        });
        assert!(session.is_locked());
        assert!(!session.surface().is_editable());
        assert_eq!(session.on_local_edit(1_000), Err(SessionError::Locked));

        session.on_remote_update(NoteRecord {
            content: "a".into(),
            is_locked: true,
            password: Some("pw".into()),
        });
        assert!(session.is_locked());
    }

    #[test]
    fn test_stale_echo_keeps_new_password() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(NoteRecord::empty());
        session.toggle_lock();
        session.submit_password("pw").unwrap();

        session.on_remote_update(NoteRecord::with_content("<div>late</div>"));
        assert!(session.is_locked());

        session.toggle_lock();
        assert_eq!(session.submit_password("pw"), Ok(NotePatch::locked(false)));
    }

    #[test]
    fn test_failed_lock_write_rolls_back() {
        let mut session = session(EMPTY_MARKUP);
        session.on_remote_update(NoteRecord {
            content: EMPTY_MARKUP.into(),
            is_locked: false,
            password: Some("pw".into()),
        });
        let LockStep::Commit(patch) = session.toggle_lock() else {
            panic!("expected an immediate lock");
        };
        assert!(session.is_locked());

        session.on_write_failed(&patch);
        assert!(!session.is_locked());
        assert!(session.surface().is_editable());
    }

    #[test]
    fn test_clear_cancels_pending_write() {
        let mut session = session("<p>text</p>");
        session.surface_mut().type_markup("<p>more text</p>");
        session.on_local_edit(0).unwrap();

        assert_eq!(session.clear(), Ok(NotePatch::content(EMPTY_MARKUP)));
        assert_eq!(session.surface().markup(), EMPTY_MARKUP);
        assert_eq!(session.take_due_write(10_000), None);
    }

    #[test]
    fn test_insert_image_embeds_data_url() {
        let mut session = session("");
        session.insert_image("image/png", &[0x89, 0x50], 0).unwrap();

        assert!(session.surface().markup().contains("src=\"data:image/png;base64,iVA=\""));
        assert!(session.has_pending_write());

        assert_eq!(
            session.insert_image("text/plain", b"hi", 0),
            Err(SessionError::Embed(EmbedError::NotAnImage("text/plain".into())))
        );
    }

    #[test]
    fn test_resize_respects_minimum_width() {
        let mut session = session("");
        session.insert_image("image/gif", b"GIF89a", 0).unwrap();
        let drag = ResizeDrag::new(100, 200);

        assert_eq!(
            session.resize_selected_image(&drag, 50),
            Err(SessionError::NoImageSelected)
        );

        session.select_image(Some(0));
        assert_eq!(session.resize_selected_image(&drag, 50), Ok(true));
        assert_eq!(session.surface().image_widths(), &[150]);

        // Dragging past the minimum leaves the last width in place
        assert_eq!(session.resize_selected_image(&drag, -100), Ok(false));
        assert_eq!(session.surface().image_widths(), &[150]);

        assert_eq!(session.finish_resize(1_000), Ok(1_500));
    }

    #[test]
    fn test_share_url() {
        let session = session("");
        assert_eq!(
            session.share_url("https://pad.example/#/notes/other"),
            "https://pad.example/#/notes/abc123"
        );
    }

    #[tokio::test]
    async fn test_fresh_load_edit_and_sync() {
        let store = InMemoryStore::new();
        let mut nav = MemoryNavigator::new(None);
        let resolution = resolve_document(&store, &mut nav).await.unwrap();
        assert!(nav.fragment().unwrap().ends_with(resolution.id.as_str()));

        let mut session = Session::new(
            resolution.id.clone(),
            MemorySurface::new(""),
            &NotepadConfig::default(),
        );
        let mut stream = store.subscribe(&resolution.id).await.unwrap();
        session.on_remote_update(stream.next().await.unwrap());
        assert_eq!(session.surface().markup(), EMPTY_MARKUP);

        session.surface_mut().type_markup("<div>hello</div>");
        session.on_local_edit(0).unwrap();
        let patch = session.take_due_write(500).unwrap();
        assert!(commit_patch(&store, session.id(), &patch, session.events()).await);

        assert_eq!(store.content_writes(&resolution.id), vec!["<div>hello</div>".to_string()]);
        assert_eq!(session.on_remote_update(stream.next().await.unwrap()), RemoteApply::Unchanged);
    }

    #[tokio::test]
    async fn test_existing_note_renders_verbatim() {
        let store = InMemoryStore::new();
        let id: NoteId = "abc123".parse().unwrap();
        store.insert(id.clone(), NoteRecord::with_content("<b>hi</b>"));

        let mut nav = MemoryNavigator::new(Some("#/notes/abc123"));
        let resolution = resolve_document(&store, &mut nav).await.unwrap();
        assert!(!resolution.created);

        let mut session = Session::new(resolution.id, MemorySurface::new(""), &NotepadConfig::default());
        let mut stream = store.subscribe(session.id()).await.unwrap();
        session.on_remote_update(stream.next().await.unwrap());
        assert_eq!(session.surface().markup(), "<b>hi</b>");
        assert!(session.surface().is_editable());
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        let session = session("");
        let (seen, _sub) = recorded_events(&session);

        let landed = commit_patch(&store, session.id(), &NotePatch::content("x"), session.events()).await;
        assert!(!landed);
        assert!(matches!(seen.lock().unwrap()[0], NotepadEvent::WriteFailed { .. }));
    }
}
