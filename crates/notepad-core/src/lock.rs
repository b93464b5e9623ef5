//! Access lock workflow.
//!
//! A four-state machine gating edits behind a plaintext password:
//!
//! ```text
//! Unlocked ──request_lock (no password)──> PromptingSetPassword ──submit──> Locked
//! Unlocked ──request_lock (password set)─────────────────────────────────> Locked
//! Locked ──request_unlock──> PromptingUnlock ──submit (match)──> Unlocked
//!                                            ──submit (mismatch)──> Locked
//! ```
//!
//! Any prompt can be cancelled back to the state it was opened from.
//! Transitions that change the stored note return the `NotePatch` to write.
//! Until a record carrying that change comes back, records with other lock
//! flags are stale and `observe` leaves the lock alone.
//! The password is compared byte-for-byte in cleartext: the lock hides
//! content in the editor and is bypassed by anyone with store access.

use thiserror::Error;

use crate::note::{NotePatch, NoteRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("No password prompt is open")]
    NoPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    PromptingSetPassword,
    PromptingUnlock,
}

impl LockState {
    /// Whether edits are rejected in this state.
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked | LockState::PromptingUnlock)
    }

    pub fn is_prompting(&self) -> bool {
        matches!(self, LockState::PromptingSetPassword | LockState::PromptingUnlock)
    }
}

/// What a lock request led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStep {
    /// A password prompt opened; nothing to write yet
    Prompt(LockState),
    /// The note changed state; write this patch
    Commit(NotePatch),
    /// Request did not apply in the current state
    Unchanged,
}

/// Lock flags written optimistically and not yet seen in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingLock {
    is_locked: bool,
    password: Option<String>,
}

impl PendingLock {
    fn seen_in(&self, record: &NoteRecord) -> bool {
        record.is_locked == self.is_locked
            && (self.password.is_none() || record.password == self.password)
    }
}

#[derive(Debug, Clone)]
pub struct LockWorkflow {
    state: LockState,
    password: Option<String>,
    pending: Option<PendingLock>,
}

impl LockWorkflow {
    pub fn new() -> Self {
        Self {
            state: LockState::Unlocked,
            password: None,
            pending: None,
        }
    }

    /// Start from a stored record.
    pub fn from_record(record: &NoteRecord) -> Self {
        let mut workflow = Self::new();
        workflow.observe(record);
        workflow
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Whether a lock change is waiting to show up in the store.
    pub fn has_pending_change(&self) -> bool {
        self.pending.is_some()
    }

    /// The write carrying the pending lock change failed; stop waiting for it.
    ///
    /// The caller reconciles with the last stored record afterwards.
    pub fn abandon_pending(&mut self) {
        self.pending = None;
    }

    pub fn request_lock(&mut self) -> LockStep {
        if self.state != LockState::Unlocked {
            return LockStep::Unchanged;
        }
        if self.password.is_some() {
            self.state = LockState::Locked;
            self.expect_change(true, None);
            LockStep::Commit(NotePatch::locked(true))
        } else {
            self.state = LockState::PromptingSetPassword;
            LockStep::Prompt(self.state)
        }
    }

    pub fn request_unlock(&mut self) -> LockStep {
        if self.state != LockState::Locked {
            return LockStep::Unchanged;
        }
        self.state = LockState::PromptingUnlock;
        LockStep::Prompt(self.state)
    }

    /// The single lock button: unlock when locked, lock otherwise.
    pub fn toggle(&mut self) -> LockStep {
        match self.state {
            LockState::Locked => self.request_unlock(),
            LockState::Unlocked => self.request_lock(),
            LockState::PromptingSetPassword | LockState::PromptingUnlock => LockStep::Unchanged,
        }
    }

    /// Answer the open prompt.
    ///
    /// A wrong password closes the unlock prompt and leaves the note
    /// `Locked`; the caller reports the failure and the user retries through
    /// `request_unlock`, which reopens the prompt.
    pub fn submit_password(&mut self, input: &str) -> Result<NotePatch, LockError> {
        match self.state {
            LockState::PromptingSetPassword => {
                if input.is_empty() {
                    return Err(LockError::EmptyPassword);
                }
                self.password = Some(input.to_string());
                self.state = LockState::Locked;
                self.expect_change(true, Some(input.to_string()));
                Ok(NotePatch::lock_with_password(input))
            }
            LockState::PromptingUnlock => {
                if input.is_empty() {
                    return Err(LockError::EmptyPassword);
                }
                if self.password.as_deref().map(str::as_bytes) == Some(input.as_bytes()) {
                    self.state = LockState::Unlocked;
                    self.expect_change(false, None);
                    Ok(NotePatch::locked(false))
                } else {
                    self.state = LockState::Locked;
                    Err(LockError::IncorrectPassword)
                }
            }
            LockState::Unlocked | LockState::Locked => Err(LockError::NoPrompt),
        }
    }

    /// Close an open prompt without changing anything.
    pub fn cancel_prompt(&mut self) -> bool {
        match self.state {
            LockState::PromptingSetPassword => self.state = LockState::Unlocked,
            LockState::PromptingUnlock => self.state = LockState::Locked,
            LockState::Unlocked | LockState::Locked => return false,
        }
        true
    }

    /// Reconcile with the stored record after a remote update.
    ///
    /// An open prompt stays open unless the remote change made it moot.
    /// While a lock change is pending, records that do not carry it predate
    /// our write and are ignored.
    pub fn observe(&mut self, record: &NoteRecord) {
        if let Some(pending) = &self.pending {
            if !pending.seen_in(record) {
                return;
            }
            self.pending = None;
        }
        self.password = record.password.clone();
        self.state = match (self.state, record.is_locked) {
            (LockState::PromptingSetPassword, false) => LockState::PromptingSetPassword,
            (LockState::PromptingUnlock, true) => LockState::PromptingUnlock,
            (_, true) => LockState::Locked,
            (_, false) => LockState::Unlocked,
        };
    }
}

impl LockWorkflow {
    fn expect_change(&mut self, is_locked: bool, password: Option<String>) {
        self.pending = Some(PendingLock { is_locked, password });
    }
}

impl Default for LockWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked_with(password: &str) -> LockWorkflow {
        LockWorkflow::from_record(&NoteRecord {
            content: String::new(),
            is_locked: true,
            password: Some(password.into()),
        })
    }

    #[test]
    fn test_lock_without_password_prompts() {
        let mut lock = LockWorkflow::new();
        assert_eq!(lock.request_lock(), LockStep::Prompt(LockState::PromptingSetPassword));
        assert_eq!(lock.state(), LockState::PromptingSetPassword);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_set_password_locks() {
        let mut lock = LockWorkflow::new();
        lock.request_lock();
        let patch = lock.submit_password("hunter2").unwrap();
        assert_eq!(patch, NotePatch::lock_with_password("hunter2"));
        assert_eq!(lock.state(), LockState::Locked);
        assert!(lock.has_password());
    }

    #[test]
    fn test_lock_with_existing_password_skips_prompt() {
        let mut lock = LockWorkflow::from_record(&NoteRecord {
            content: String::new(),
            is_locked: false,
            password: Some("pw".into()),
        });
        assert_eq!(lock.request_lock(), LockStep::Commit(NotePatch::locked(true)));
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn test_unlock_with_correct_password() {
        let mut lock = locked_with("Secret");
        assert_eq!(lock.request_unlock(), LockStep::Prompt(LockState::PromptingUnlock));
        assert_eq!(lock.submit_password("Secret"), Ok(NotePatch::locked(false)));
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_unlock_with_wrong_password_stays_locked() {
        let mut lock = locked_with("Secret");
        lock.request_unlock();
        // Comparison is case-sensitive
        assert_eq!(lock.submit_password("secret"), Err(LockError::IncorrectPassword));
        assert_eq!(lock.state(), LockState::Locked);

        // Retry through a fresh prompt
        lock.request_unlock();
        assert!(lock.submit_password("Secret").is_ok());
    }

    #[test]
    fn test_empty_password_rejected_without_transition() {
        let mut lock = LockWorkflow::new();
        lock.request_lock();
        assert_eq!(lock.submit_password(""), Err(LockError::EmptyPassword));
        assert_eq!(lock.state(), LockState::PromptingSetPassword);
    }

    #[test]
    fn test_cancel_returns_to_previous_state() {
        let mut lock = LockWorkflow::new();
        lock.request_lock();
        assert!(lock.cancel_prompt());
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(!lock.has_password());

        let mut lock = locked_with("pw");
        lock.request_unlock();
        assert!(lock.cancel_prompt());
        assert_eq!(lock.state(), LockState::Locked);
        assert!(!lock.cancel_prompt());
    }

    #[test]
    fn test_submit_without_prompt() {
        let mut lock = LockWorkflow::new();
        assert_eq!(lock.submit_password("x"), Err(LockError::NoPrompt));
    }

    #[test]
    fn test_toggle() {
        let mut lock = locked_with("pw");
        assert_eq!(lock.toggle(), LockStep::Prompt(LockState::PromptingUnlock));
        assert_eq!(lock.toggle(), LockStep::Unchanged);
        lock.submit_password("pw").unwrap();
        assert_eq!(lock.toggle(), LockStep::Commit(NotePatch::locked(true)));
    }

    #[test]
    fn test_observe_keeps_open_prompt() {
        let mut lock = locked_with("pw");
        lock.request_unlock();
        lock.observe(&NoteRecord {
            content: "edited elsewhere".into(),
            is_locked: true,
            password: Some("pw".into()),
        });
        assert_eq!(lock.state(), LockState::PromptingUnlock);

        // Unlocked by another session while our prompt was open
        lock.observe(&NoteRecord {
            content: String::new(),
            is_locked: false,
            password: Some("pw".into()),
        });
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_observe_ignores_records_older_than_pending_lock() {
        let mut lock = LockWorkflow::new();
        lock.request_lock();
        lock.submit_password("pw").unwrap();
        assert!(lock.has_pending_change());

        // Written before the lock landed
        lock.observe(&NoteRecord::with_content("a"));
        assert_eq!(lock.state(), LockState::Locked);
        assert!(lock.has_password());

        lock.observe(&NoteRecord {
            content: "a".into(),
            is_locked: true,
            password: Some("pw".into()),
        });
        assert!(!lock.has_pending_change());

        // Later records are authoritative again
        lock.observe(&NoteRecord {
            content: "a".into(),
            is_locked: false,
            password: Some("pw".into()),
        });
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_abandoned_change_reconciles_with_next_record() {
        let mut lock = locked_with("pw");
        lock.request_unlock();
        lock.submit_password("pw").unwrap();
        lock.abandon_pending();

        lock.observe(&NoteRecord {
            content: String::new(),
            is_locked: true,
            password: Some("pw".into()),
        });
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn test_observe_remote_lock_closes_set_prompt() {
        let mut lock = LockWorkflow::new();
        lock.request_lock();
        lock.observe(&NoteRecord {
            content: String::new(),
            is_locked: true,
            password: Some("theirs".into()),
        });
        assert_eq!(lock.state(), LockState::Locked);
        assert!(lock.has_password());
    }
}
