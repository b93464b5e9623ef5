//! Session driver: one tokio task owns a `Session` and its store.
//!
//! The task selects over user commands, the note's subscription stream and
//! the debounce deadline. The deadline future is rebuilt every turn from
//! `next_write_due()`, so staging a newer edit replaces the pending timer.

use notepad_core::{
    DocumentStore, EditSurface, FormatCommand, LockStep, MemorySurface, Navigator, NotePatch, NotepadConfig,
    NotepadEvent, NoteId, NoteStream, Resolution, Session, SessionError, SharedEventBus, StoreError,
    commit_patch, now_ms, resolve_document, share_url,
};
use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A surface the user edits outside the session, such as a file.
pub trait ExternalSurface: EditSurface + Send + Sync + 'static {
    /// Adopt markup the user produced. Returns false if nothing changed.
    fn accept_edit(&mut self, markup: String) -> bool;
}

impl ExternalSurface for crate::surface::FileSurface {
    fn accept_edit(&mut self, markup: String) -> bool {
        crate::surface::FileSurface::accept_edit(self, markup)
    }
}

impl ExternalSurface for MemorySurface {
    fn accept_edit(&mut self, markup: String) -> bool {
        if self.markup() == markup {
            return false;
        }
        self.type_markup(&markup);
        true
    }
}

#[derive(Debug)]
pub enum SessionCommand {
    /// The user changed the surface to this markup
    Edit(String),
    Format(FormatCommand),
    InsertImage { mime: String, bytes: Vec<u8> },
    ToggleLock,
    RequestLock,
    RequestUnlock,
    SubmitPassword(String),
    CancelPrompt,
    Clear,
    /// Write the pending edit now
    Flush,
    /// Flush and stop
    Shutdown,
}

/// Handle to a running session task.
pub struct SessionHandle {
    id: NoteId,
    created: bool,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: SharedEventBus,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> &NoteId {
        &self.id
    }

    /// Whether the note was allocated when the session opened
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn share_url(&self, base: &str) -> String {
        share_url(base, &self.id)
    }

    /// Queue a command. Returns false if the session has stopped.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Flush the pending edit and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Err(e) = self.task.await {
            error!("Session task failed: {}", e);
        }
    }
}

/// Resolve the note named by `navigator`, subscribe to it and start driving `surface`.
pub async fn open_session<S, N, E>(
    store: Arc<S>,
    navigator: &mut N,
    surface: E,
    config: &NotepadConfig,
    events: SharedEventBus,
) -> Result<SessionHandle, StoreError>
where
    S: DocumentStore + 'static,
    N: Navigator + ?Sized,
    E: ExternalSurface,
{
    let Resolution { id, created } = resolve_document(store.as_ref(), navigator).await?;
    events.emit(NotepadEvent::DocumentResolved {
        note_id: id.clone(),
        created,
    });

    let remote = store.subscribe(&id).await?;
    let session = Session::with_events(id.clone(), surface, config, Arc::clone(&events));
    let (commands, command_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        session,
        store,
        remote: Some(remote),
    };
    let task = tokio::spawn(driver.run(command_rx));
    info!("Session opened for note {}", id);

    Ok(SessionHandle {
        id,
        created,
        commands,
        events,
        task,
    })
}

struct Driver<S, E> {
    session: Session<E>,
    store: Arc<S>,
    /// None once the subscription ended
    remote: Option<NoteStream>,
}

impl<S: DocumentStore + 'static, E: ExternalSurface> Driver<S, E> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            let flush_at = self.session.next_write_due();
            let flush = async move {
                match flush_at {
                    Some(due) => tokio::time::sleep(Duration::from_millis(due.saturating_sub(now_ms()))).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.on_command(command).await,
                    }
                }

                record = next_record(&mut self.remote) => {
                    match record {
                        Some(record) => {
                            self.session.on_remote_update(record);
                        }
                        None => {
                            warn!("Subscription to note {} ended", self.session.id());
                            self.remote = None;
                        }
                    }
                }

                _ = flush => {
                    if let Some(patch) = self.session.take_due_write(now_ms()) {
                        self.commit(patch).await;
                    }
                }
            }
        }

        if let Some(patch) = self.session.flush_now() {
            debug!("Flushing pending edit before shutdown");
            self.commit(patch).await;
        }
        info!("Session for note {} closed", self.session.id());
    }

    async fn on_command(&mut self, command: SessionCommand) {
        let now = now_ms();
        let result = match command {
            SessionCommand::Edit(markup) => {
                if !self.session.surface_mut().accept_edit(markup) {
                    return;
                }
                self.session.on_local_edit(now).map(drop)
            }
            SessionCommand::Format(command) => self.session.apply_format(command, now),
            SessionCommand::InsertImage { mime, bytes } => self.session.insert_image(&mime, &bytes, now),
            SessionCommand::ToggleLock => {
                let step = self.session.toggle_lock();
                self.on_lock_step(step).await;
                Ok(())
            }
            SessionCommand::RequestLock => {
                let step = self.session.request_lock();
                self.on_lock_step(step).await;
                Ok(())
            }
            SessionCommand::RequestUnlock => {
                let step = self.session.request_unlock();
                self.on_lock_step(step).await;
                Ok(())
            }
            SessionCommand::SubmitPassword(input) => match self.session.submit_password(&input) {
                Ok(patch) => {
                    self.commit(patch).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            SessionCommand::CancelPrompt => {
                self.session.cancel_prompt();
                Ok(())
            }
            SessionCommand::Clear => match self.session.clear() {
                Ok(patch) => {
                    self.commit(patch).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            SessionCommand::Flush => {
                if let Some(patch) = self.session.flush_now() {
                    self.commit(patch).await;
                }
                Ok(())
            }
            SessionCommand::Shutdown => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Locked) => {
                warn!("Note {} is locked; edit rejected", self.session.id());
                self.restore_surface();
            }
            Err(e) => warn!("{}", e),
        }
    }

    async fn on_lock_step(&mut self, step: LockStep) {
        match step {
            LockStep::Commit(patch) => self.commit(patch).await,
            LockStep::Prompt(state) => debug!("Prompt open: {:?}", state),
            LockStep::Unchanged => debug!("Lock request ignored in {:?}", self.session.lock_state()),
        }
    }

    /// Put the last stored markup back after a rejected edit.
    fn restore_surface(&mut self) {
        let Some(content) = self.session.snapshot().map(|record| record.content.clone()) else {
            return;
        };
        if self.session.surface().markup() != content {
            self.session.surface_mut().set_markup(&content);
        }
    }

    async fn commit(&mut self, patch: NotePatch) {
        let landed = commit_patch(self.store.as_ref(), self.session.id(), &patch, self.session.events()).await;
        if !landed {
            self.session.on_write_failed(&patch);
        }
    }
}

async fn next_record(remote: &mut Option<NoteStream>) -> Option<notepad_core::NoteRecord> {
    match remote {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
