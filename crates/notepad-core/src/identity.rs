//! Document identity: which note is active, from the navigation fragment.
//!
//! A fragment of the form `#/notes/<id>` names an existing note. Anything
//! else means "new note": allocate an id, seed an empty record under it, and
//! only then rewrite the fragment so reloads and shared links land on it.

use tracing::{debug, info};

use crate::note::NoteRecord;
use crate::note_id::NoteId;
use crate::store::{DocumentStore, Result};

/// Fragment path prefix that carries a note id.
pub const NOTES_ROUTE_PREFIX: &str = "/notes/";

/// Read/write access to the navigation address fragment.
pub trait Navigator {
    /// Current fragment, with or without the leading `#`
    fn fragment(&self) -> Option<String>;

    /// Replace the fragment (without the leading `#`)
    fn set_fragment(&mut self, fragment: &str);
}

/// In-memory navigator for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryNavigator {
    fragment: Option<String>,
}

impl MemoryNavigator {
    pub fn new(fragment: Option<&str>) -> Self {
        Self {
            fragment: fragment.map(str::to_string),
        }
    }
}

impl Navigator for MemoryNavigator {
    fn fragment(&self) -> Option<String> {
        self.fragment.clone()
    }

    fn set_fragment(&mut self, fragment: &str) {
        self.fragment = Some(fragment.to_string());
    }
}

/// Extract the note id from a fragment like `#/notes/<id>`.
///
/// Only the first path segment after the prefix is used. Returns None
/// when the prefix is missing or the id is empty or malformed.
pub fn parse_fragment(fragment: &str) -> Option<NoteId> {
    let path = fragment.strip_prefix('#').unwrap_or(fragment);
    let rest = path.strip_prefix(NOTES_ROUTE_PREFIX)?;
    let id = rest.split(['/', '?']).next().unwrap_or_default();
    id.parse().ok()
}

/// Fragment (without `#`) that names `id`.
pub fn note_fragment(id: &NoteId) -> String {
    format!("{}{}", NOTES_ROUTE_PREFIX, id)
}

/// Shareable link: `base` with its fragment replaced by the note's route.
pub fn share_url(base: &str, id: &NoteId) -> String {
    let base = base.split('#').next().unwrap_or(base);
    format!("{}#{}", base, note_fragment(id))
}

/// The note a session should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: NoteId,
    /// True when the note was allocated and seeded by this call
    pub created: bool,
}

/// Resolve the active note, allocating and seeding a new one if the fragment has none.
pub async fn resolve_document<S, N>(store: &S, navigator: &mut N) -> Result<Resolution>
where
    S: DocumentStore + ?Sized,
    N: Navigator + ?Sized,
{
    if let Some(id) = navigator.fragment().as_deref().and_then(parse_fragment) {
        debug!("Opening note {} from fragment", id);
        return Ok(Resolution { id, created: false });
    }

    let id = store.allocate().await?;
    store.create(&id, &NoteRecord::empty()).await?;
    navigator.set_fragment(&note_fragment(&id));
    info!("Created note {}", id);

    Ok(Resolution { id, created: true })
}
