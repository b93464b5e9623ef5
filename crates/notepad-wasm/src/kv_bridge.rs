//! JavaScript key-value bridge for WASM (`localStorage` and friends).

use notepad_core::store::Result;
use notepad_core::{KeyValue, StoreError};
use wasm_bindgen::prelude::*;

use crate::store_bridge::js_error_message;

/// JavaScript key-value bridge.
///
/// ```typescript
/// const items = new JsKeyValueBridge(
///   (key) => localStorage.getItem(key),
///   (key, value) => localStorage.setItem(key, value),
/// );
/// ```
#[wasm_bindgen]
pub struct JsKeyValueBridge {
    get_fn: js_sys::Function,
    set_fn: js_sys::Function,
}

#[wasm_bindgen]
impl JsKeyValueBridge {
    #[wasm_bindgen(constructor)]
    pub fn new(get_fn: js_sys::Function, set_fn: js_sys::Function) -> Self {
        Self { get_fn, set_fn }
    }
}

impl KeyValue for JsKeyValueBridge {
    fn get_item(&self, key: &str) -> Option<String> {
        self.get_fn.call1(&JsValue::NULL, &key.into()).ok()?.as_string()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        // Throws when the origin's quota is exhausted
        self.set_fn
            .call2(&JsValue::NULL, &key.into(), &value.into())
            .map_err(|e| StoreError::WriteFailed(js_error_message(&e)))?;
        Ok(())
    }
}
