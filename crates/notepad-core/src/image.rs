//! Embedded images: data-URL encoding and drag-to-resize.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Images never shrink below this width while dragging.
pub const MIN_IMAGE_WIDTH_PX: u32 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbedError {
    #[error("Not an image type: {0}")]
    NotAnImage(String),

    #[error("Image file is empty")]
    Empty,
}

/// Encode image bytes as a `data:` URL for inline insertion.
pub fn embed_image(mime: &str, bytes: &[u8]) -> Result<String, EmbedError> {
    let mime = mime.trim().to_ascii_lowercase();
    if !mime.starts_with("image/") || mime.len() == "image/".len() {
        return Err(EmbedError::NotAnImage(mime));
    }
    if bytes.is_empty() {
        return Err(EmbedError::Empty);
    }
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

/// An in-progress resize drag on the selected image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeDrag {
    /// Pointer x when the drag started
    pub start_x: i32,
    /// Image width when the drag started
    pub start_width: u32,
}

impl ResizeDrag {
    pub fn new(start_x: i32, start_width: u32) -> Self {
        Self {
            start_x,
            start_width,
        }
    }

    /// Width for the pointer at `x`, or None if it would drop to the minimum or below.
    ///
    /// Widths past `u32::MAX` saturate.
    pub fn width_at(&self, x: i32) -> Option<u32> {
        let width = i64::from(self.start_width) + i64::from(x) - i64::from(self.start_x);
        (width > i64::from(MIN_IMAGE_WIDTH_PX)).then(|| u32::try_from(width).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_png() {
        let url = embed_image("image/png", &[0x89, b'P', b'N', b'G']).unwrap();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_embed_rejects_non_images() {
        assert_eq!(
            embed_image("text/plain", b"hi"),
            Err(EmbedError::NotAnImage("text/plain".into()))
        );
        assert!(embed_image("image/", b"hi").is_err());
        assert_eq!(embed_image("image/gif", &[]), Err(EmbedError::Empty));
    }

    #[test]
    fn test_resize_drag() {
        let drag = ResizeDrag::new(100, 200);
        assert_eq!(drag.width_at(150), Some(250));
        assert_eq!(drag.width_at(0), Some(100));
        assert_eq!(drag.width_at(-79), Some(21));
        // Minimum width is exclusive
        assert_eq!(drag.width_at(-80), None);
        assert_eq!(drag.width_at(-500), None);
    }

    #[test]
    fn test_resize_drag_saturates() {
        let drag = ResizeDrag::new(0, u32::MAX - 5);
        assert_eq!(drag.width_at(5), Some(u32::MAX));
        assert_eq!(drag.width_at(i32::MAX), Some(u32::MAX));
        assert_eq!(drag.width_at(-5), Some(u32::MAX - 10));
    }
}
