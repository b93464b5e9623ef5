//! JavaScript document store bridge for WASM.
//!
//! Implements the `DocumentStore` trait by calling JavaScript callback
//! functions that wrap the hosted realtime database. Each callback except
//! `subscribe` is an async JS function returning a Promise, which we convert
//! to a Rust Future.

use async_trait::async_trait;
use futures::channel::mpsc;
use notepad_core::store::Result;
use notepad_core::{DocumentStore, NoteId, NotePatch, NoteRecord, NoteStream, StoreError};
use serde::Serialize;
use std::cell::RefCell;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

/// JavaScript document store bridge.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const bridge = new JsStoreBridge(
///   () => push(ref(db, "notes")).key,
///   (id, record) => set(ref(db, `notes/${id}`), record),
///   (id, patch) => update(ref(db, `notes/${id}`), patch),
///   async (id) => (await get(ref(db, `notes/${id}`))).val(),
///   (id, emit) => onValue(ref(db, `notes/${id}`), (snap) => emit(snap.val())),
/// );
/// ```
#[wasm_bindgen]
pub struct JsStoreBridge {
    push_fn: js_sys::Function,
    set_fn: js_sys::Function,
    update_fn: js_sys::Function,
    get_fn: js_sys::Function,
    subscribe_fn: js_sys::Function,
    listeners: RefCell<Vec<Listener>>,
}

/// A live `subscribe` registration on the JS side.
struct Listener {
    tx: mpsc::UnboundedSender<NoteRecord>,
    unsubscribe: Option<js_sys::Function>,
    /// Must outlive the JS registration
    _callback: Closure<dyn FnMut(JsValue)>,
}

impl Listener {
    fn stop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            let _ = unsubscribe.call0(&JsValue::NULL);
        }
    }
}

#[wasm_bindgen]
impl JsStoreBridge {
    /// Create a new store bridge with JS callback functions.
    ///
    /// `push`, `set`, `update` and `get` return Promises. `subscribe(id, emit)`
    /// registers `emit` synchronously and returns an unsubscribe function.
    #[wasm_bindgen(constructor)]
    pub fn new(
        push_fn: js_sys::Function,
        set_fn: js_sys::Function,
        update_fn: js_sys::Function,
        get_fn: js_sys::Function,
        subscribe_fn: js_sys::Function,
    ) -> Self {
        Self {
            push_fn,
            set_fn,
            update_fn,
            get_fn,
            subscribe_fn,
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Number of subscriptions whose stream is still open.
    #[wasm_bindgen(js_name = listenerCount)]
    pub fn listener_count(&self) -> usize {
        self.prune();
        self.listeners.borrow().len()
    }
}

impl JsStoreBridge {
    /// Detach JS listeners whose Rust stream was dropped.
    fn prune(&self) {
        self.listeners.borrow_mut().retain_mut(|listener| {
            if listener.tx.is_closed() {
                listener.stop();
                false
            } else {
                true
            }
        });
    }
}

impl Drop for JsStoreBridge {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().iter_mut() {
            listener.stop();
        }
    }
}

/// Call a JS function and await its Promise result.
///
/// Plain return values are accepted too; `Promise.resolve` passes them through.
async fn call_js_async(func: &js_sys::Function, args: &[JsValue]) -> std::result::Result<JsValue, JsValue> {
    let js_args = args.iter().collect::<js_sys::Array>();
    let value = func.apply(&JsValue::NULL, &js_args)?;
    JsFuture::from(js_sys::Promise::resolve(&value)).await
}

/// Human-readable message from a thrown JS value.
pub(crate) fn js_error_message(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| {
            js_sys::Reflect::get(err, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", err))
}

/// Serialize a record or patch for the database.
///
/// `None` becomes `null`: realtime databases reject `undefined` values.
fn to_js<T: Serialize>(value: &T) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::new().serialize_missing_as_null(true);
    value
        .serialize(&serializer)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_record(value: JsValue) -> Result<NoteRecord> {
    serde_wasm_bindgen::from_value(value).map_err(|e| StoreError::Serialization(format!("Failed to parse note: {}", e)))
}

#[async_trait(?Send)]
impl DocumentStore for JsStoreBridge {
    async fn allocate(&self) -> Result<NoteId> {
        let result = call_js_async(&self.push_fn, &[])
            .await
            .map_err(|e| StoreError::AllocationFailed(js_error_message(&e)))?;

        let key = result
            .as_string()
            .ok_or_else(|| StoreError::AllocationFailed("push did not return a key".into()))?;
        key.parse()
            .map_err(|e| StoreError::AllocationFailed(format!("Invalid key {:?}: {}", key, e)))
    }

    async fn create(&self, id: &NoteId, record: &NoteRecord) -> Result<()> {
        call_js_async(&self.set_fn, &[id.as_str().into(), to_js(record)?])
            .await
            .map_err(|e| StoreError::WriteFailed(js_error_message(&e)))?;
        Ok(())
    }

    async fn read(&self, id: &NoteId) -> Result<Option<NoteRecord>> {
        let result = call_js_async(&self.get_fn, &[id.as_str().into()])
            .await
            .map_err(|e| StoreError::Unavailable(js_error_message(&e)))?;

        if result.is_null() || result.is_undefined() {
            return Ok(None);
        }
        parse_record(result).map(Some)
    }

    async fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<()> {
        call_js_async(&self.update_fn, &[id.as_str().into(), to_js(patch)?])
            .await
            .map_err(|e| StoreError::WriteFailed(js_error_message(&e)))?;
        Ok(())
    }

    async fn subscribe(&self, id: &NoteId) -> Result<NoteStream> {
        self.prune();

        let (tx, rx) = mpsc::unbounded();
        let sender = tx.clone();
        let note = id.clone();
        let callback = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            // A deleted note reads as null; keep showing what we have
            if value.is_null() || value.is_undefined() {
                debug!("Note {} has no value", note);
                return;
            }
            match parse_record(value) {
                Ok(record) => {
                    let _ = sender.unbounded_send(record);
                }
                Err(e) => warn!("Ignoring value for note {}: {}", note, e),
            }
        });

        let unsubscribe = self
            .subscribe_fn
            .call2(&JsValue::NULL, &id.as_str().into(), callback.as_ref())
            .map_err(|e| StoreError::Unavailable(js_error_message(&e)))?;

        self.listeners.borrow_mut().push(Listener {
            tx,
            unsubscribe: unsubscribe.dyn_into::<js_sys::Function>().ok(),
            _callback: callback,
        });
        Ok(rx)
    }
}
