//! FileSurface: a note mirrored into a local file.
//!
//! The user edits the file with any editor; the watcher reports the new
//! contents and the driver hands them to `accept_edit`. Remote values are
//! written back to the file. A locked note makes the file read-only.

use notepad_core::{EditSurface, FormatCommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub struct FileSurface {
    path: PathBuf,
    /// Markup last read from or written to the file
    markup: String,
    editable: bool,
}

impl FileSurface {
    /// Open `path`, creating it empty if missing.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let markup = if path.exists() {
            fs::read_to_string(path)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, "")?;
            String::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            markup,
            editable: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Adopt markup the user wrote to the file. Returns false if nothing changed.
    ///
    /// Our own writes come back through the watcher; they match the cached
    /// markup and are ignored here.
    pub fn accept_edit(&mut self, markup: String) -> bool {
        if markup == self.markup {
            return false;
        }
        self.markup = markup;
        true
    }

    /// Re-read the file from disk.
    pub fn read_file(&self) -> std::io::Result<String> {
        fs::read_to_string(&self.path)
    }

    fn write_file(&mut self) {
        let readonly = !self.editable;
        if readonly {
            self.set_readonly(false);
        }
        if let Err(e) = fs::write(&self.path, &self.markup) {
            error!("Failed to write {:?}: {}", self.path, e);
        }
        if readonly {
            self.set_readonly(true);
        }
    }

    fn set_readonly(&self, readonly: bool) {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                let mut permissions = metadata.permissions();
                permissions.set_readonly(readonly);
                if let Err(e) = fs::set_permissions(&self.path, permissions) {
                    warn!("Failed to change permissions of {:?}: {}", self.path, e);
                }
            }
            Err(e) => warn!("Failed to stat {:?}: {}", self.path, e),
        }
    }
}

impl EditSurface for FileSurface {
    fn markup(&self) -> String {
        self.markup.clone()
    }

    fn set_markup(&mut self, markup: &str) {
        self.markup = markup.to_string();
        self.write_file();
    }

    fn set_editable(&mut self, editable: bool) {
        if self.editable != editable {
            self.editable = editable;
            self.set_readonly(!editable);
        }
    }

    fn apply_format(&mut self, command: &FormatCommand) {
        match command {
            FormatCommand::InsertImage(url) => {
                self.markup.push_str(&format!("<img src=\"{}\">", url));
                self.write_file();
            }
            // No selection in a plain file
            other => debug!("Ignoring {} on file surface", other.command_name()),
        }
    }

    fn resize_image(&mut self, _index: usize, _width_px: u32) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("note.html");
        let surface = FileSurface::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(surface.markup(), "");
    }

    #[test]
    fn test_set_markup_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("note.html");
        let mut surface = FileSurface::open(&path).unwrap();

        surface.set_markup("<div>remote</div>");
        assert_eq!(fs::read_to_string(&path).unwrap(), "<div>remote</div>");
    }

    #[test]
    fn test_accept_edit_ignores_own_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("note.html");
        let mut surface = FileSurface::open(&path).unwrap();

        surface.set_markup("<div>a</div>");
        assert!(!surface.accept_edit(surface.read_file().unwrap()));
        assert!(surface.accept_edit("<div>ab</div>".into()));
        assert_eq!(surface.markup(), "<div>ab</div>");
    }

    #[test]
    fn test_locked_surface_is_readonly_but_still_mirrors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("note.html");
        let mut surface = FileSurface::open(&path).unwrap();

        surface.set_editable(false);
        assert!(fs::metadata(&path).unwrap().permissions().readonly());

        surface.set_markup("<div>locked</div>");
        assert_eq!(fs::read_to_string(&path).unwrap(), "<div>locked</div>");
        assert!(fs::metadata(&path).unwrap().permissions().readonly());

        surface.set_editable(true);
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[test]
    fn test_insert_image_appends_tag() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("note.html");
        let mut surface = FileSurface::open(&path).unwrap();

        surface.apply_format(&FormatCommand::Bold);
        assert_eq!(surface.markup(), "");

        surface.apply_format(&FormatCommand::InsertImage("data:image/png;base64,AA==".into()));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "<img src=\"data:image/png;base64,AA==\">"
        );
    }
}
