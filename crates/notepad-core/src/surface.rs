//! EditSurface trait: the editable view a session mirrors the note into.
//!
//! Implementations:
//! - `MemorySurface` - For testing
//! - `FileSurface` (in notepad-daemon) - A local file kept in sync with the note
//! - `JsSurfaceBridge` (in notepad-wasm) - A contenteditable element via JS callbacks

use crate::format::FormatCommand;

pub trait EditSurface {
    /// Markup the surface currently shows
    fn markup(&self) -> String;

    /// Replace the surface's markup
    fn set_markup(&mut self, markup: &str);

    /// Allow or reject user edits
    fn set_editable(&mut self, editable: bool);

    /// Run a formatting command against the current selection
    fn apply_format(&mut self, command: &FormatCommand);

    /// Set the width of the `index`-th embedded image. Returns false if there is no such image.
    fn resize_image(&mut self, index: usize, width_px: u32) -> bool;
}

/// In-memory surface for testing
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    markup: String,
    editable: bool,
    /// Commands applied, in order
    applied: Vec<FormatCommand>,
    /// Widths of embedded images, in document order
    image_widths: Vec<u32>,
    /// Number of `set_markup` calls (remote applies, clears)
    set_count: usize,
}

impl MemorySurface {
    pub fn new(markup: &str) -> Self {
        Self {
            markup: markup.to_string(),
            editable: true,
            ..Self::default()
        }
    }

    /// Simulate the user typing: replace markup without counting a `set_markup`.
    pub fn type_markup(&mut self, markup: &str) {
        self.markup = markup.to_string();
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn applied(&self) -> &[FormatCommand] {
        &self.applied
    }

    pub fn image_widths(&self) -> &[u32] {
        &self.image_widths
    }

    pub fn set_count(&self) -> usize {
        self.set_count
    }
}

impl EditSurface for MemorySurface {
    fn markup(&self) -> String {
        self.markup.clone()
    }

    fn set_markup(&mut self, markup: &str) {
        self.markup = markup.to_string();
        self.set_count += 1;
    }

    fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    fn apply_format(&mut self, command: &FormatCommand) {
        if let FormatCommand::InsertImage(url) = command {
            self.markup.push_str(&format!("<img src=\"{}\">", url));
            self.image_widths.push(0);
        }
        self.applied.push(command.clone());
    }

    fn resize_image(&mut self, index: usize, width_px: u32) -> bool {
        match self.image_widths.get_mut(index) {
            Some(width) => {
                *width = width_px;
                true
            }
            None => false,
        }
    }
}
