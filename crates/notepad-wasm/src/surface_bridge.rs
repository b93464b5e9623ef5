//! JavaScript edit surface bridge for WASM.
//!
//! Implements `EditSurface` over a contenteditable element through
//! synchronous JS callbacks. Formatting is handed to `execCommand`.

use notepad_core::{EditSurface, FormatCommand};
use tracing::warn;
use wasm_bindgen::prelude::*;

use crate::store_bridge::js_error_message;

/// JavaScript edit surface bridge.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const surface = new JsSurfaceBridge(
///   () => editor.innerHTML,
///   (html) => { editor.innerHTML = html; },
///   (editable) => { editor.contentEditable = String(editable); },
///   (name, value) => document.execCommand(name, false, value),
///   (index, width) => resizeImage(editor, index, width),
/// );
/// ```
#[wasm_bindgen]
pub struct JsSurfaceBridge {
    get_markup_fn: js_sys::Function,
    set_markup_fn: js_sys::Function,
    set_editable_fn: js_sys::Function,
    exec_command_fn: js_sys::Function,
    resize_image_fn: js_sys::Function,
}

#[wasm_bindgen]
impl JsSurfaceBridge {
    /// Create a new surface bridge with JS callback functions.
    ///
    /// All callbacks are synchronous. `resizeImage(index, widthPx)` returns
    /// whether an image was found at that index.
    #[wasm_bindgen(constructor)]
    pub fn new(
        get_markup_fn: js_sys::Function,
        set_markup_fn: js_sys::Function,
        set_editable_fn: js_sys::Function,
        exec_command_fn: js_sys::Function,
        resize_image_fn: js_sys::Function,
    ) -> Self {
        Self {
            get_markup_fn,
            set_markup_fn,
            set_editable_fn,
            exec_command_fn,
            resize_image_fn,
        }
    }
}

impl EditSurface for JsSurfaceBridge {
    fn markup(&self) -> String {
        match self.get_markup_fn.call0(&JsValue::NULL) {
            Ok(value) => value.as_string().unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read editor markup: {}", js_error_message(&e));
                String::new()
            }
        }
    }

    fn set_markup(&mut self, markup: &str) {
        if let Err(e) = self.set_markup_fn.call1(&JsValue::NULL, &markup.into()) {
            warn!("Failed to set editor markup: {}", js_error_message(&e));
        }
    }

    fn set_editable(&mut self, editable: bool) {
        if let Err(e) = self.set_editable_fn.call1(&JsValue::NULL, &editable.into()) {
            warn!("Failed to toggle editing: {}", js_error_message(&e));
        }
    }

    fn apply_format(&mut self, command: &FormatCommand) {
        let name = JsValue::from_str(command.command_name());
        let value = command
            .command_value()
            .map(|v| JsValue::from_str(&v))
            .unwrap_or(JsValue::UNDEFINED);
        if let Err(e) = self.exec_command_fn.call2(&JsValue::NULL, &name, &value) {
            warn!("{} failed: {}", command.command_name(), js_error_message(&e));
        }
    }

    fn resize_image(&mut self, index: usize, width_px: u32) -> bool {
        match self
            .resize_image_fn
            .call2(&JsValue::NULL, &(index as u32).into(), &width_px.into())
        {
            Ok(found) => found.as_bool().unwrap_or(false),
            Err(e) => {
                warn!("Failed to resize image {}: {}", index, js_error_message(&e));
                false
            }
        }
    }
}
