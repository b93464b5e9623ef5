//! WASM bindings for notepad-core.
//!
//! Provides the bridge between the browser page and the Rust session.
//!
//! # Architecture
//!
//! The page creates bridges with callbacks into the realtime database, the
//! contenteditable editor and `localStorage`. The bridges implement the core
//! traits, and `WasmNotepad` runs a `Session` over them.
//!
//! ```text
//! JavaScript                      WASM (Rust)
//! ──────────                      ───────────
//! database ───callbacks──> JsStoreBridge ──┐
//! localStorage ──────────> JsKeyValueBridge ──> LocalStore ──┤ impl DocumentStore
//!                                                            ▼
//! editor ────────────────> JsSurfaceBridge ──> Session<JsSurfaceBridge>
//!                                                            │
//!                                                            ▼
//!                                                WasmNotepad (exposed to JS)
//! ```
//!
//! The debounce timer lives on the JS side: `onInput` returns how long to
//! wait before calling `flush`. A newer edit moves the deadline, so a timer
//! that fires early finds nothing due.
//!
//! **Note**: This crate only compiles for `wasm32` targets. When building for native
//! targets (e.g., during `cargo check --workspace`), this crate provides no exports.

#[cfg(target_arch = "wasm32")]
mod kv_bridge;
#[cfg(target_arch = "wasm32")]
mod store_bridge;
#[cfg(target_arch = "wasm32")]
mod surface_bridge;

#[cfg(target_arch = "wasm32")]
pub use kv_bridge::JsKeyValueBridge;
#[cfg(target_arch = "wasm32")]
pub use store_bridge::JsStoreBridge;
#[cfg(target_arch = "wasm32")]
pub use surface_bridge::JsSurfaceBridge;

// ============================================================================
// All WASM-specific code is gated behind target_arch = "wasm32"
// This allows `cargo check --workspace` to succeed on native targets.
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use futures::StreamExt;
    use futures::future::{AbortHandle, Abortable};
    use notepad_core::{
        DocumentStore, EventBus, LocalStore, LockState, LockStep, Navigator, NoteId, NotePatch, NotepadConfig,
        NotepadEvent, ResizeDrag, Resolution, Session, SharedEventBus, commit_patch, now_ms, resolve_document,
    };
    use std::cell::RefCell;
    use std::rc::Rc;
    use tracing::{info, warn};
    use tracing_subscriber::layer::SubscriberExt;
    use wasm_bindgen::prelude::*;

    // ========== Callback Logger Layer ==========

    thread_local! {
        static LOGGER_CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    }

    /// A tracing layer that invokes a JavaScript callback for each log event.
    struct JsCallbackLayer;

    impl<S> tracing_subscriber::Layer<S> for JsCallbackLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            LOGGER_CALLBACK.with(|cb| {
                if let Some(callback) = cb.borrow().as_ref() {
                    let metadata = event.metadata();

                    let mut visitor = MessageVisitor::default();
                    event.record(&mut visitor);

                    let timestamp = web_time::SystemTime::now()
                        .duration_since(web_time::UNIX_EPOCH)
                        .map(|d| d.as_millis() as f64)
                        .unwrap_or(0.0);

                    let js_event = js_sys::Object::new();
                    let _ = js_sys::Reflect::set(&js_event, &"level".into(), &metadata.level().as_str().into());
                    let _ = js_sys::Reflect::set(&js_event, &"target".into(), &metadata.target().into());
                    let _ = js_sys::Reflect::set(&js_event, &"message".into(), &visitor.message.into());
                    let _ = js_sys::Reflect::set(&js_event, &"timestamp".into(), &timestamp.into());

                    let _ = callback.call1(&JsValue::NULL, &js_event);
                }
            });
        }
    }

    /// Collects the `message` field, with any other fields appended as `key=value`.
    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl MessageVisitor {
        fn push_field(&mut self, name: &str, value: String) {
            if name == "message" {
                if !self.message.is_empty() {
                    self.message.insert(0, ' ');
                }
                self.message.insert_str(0, &value);
            } else {
                if !self.message.is_empty() {
                    self.message.push(' ');
                }
                self.message.push_str(&format!("{}={}", name, value));
            }
        }
    }

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.push_field(field.name(), format!("{:?}", value));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.push_field(field.name(), value.to_string());
        }
    }

    /// Initialize the WASM module (sets up panic hook and tracing).
    ///
    /// - `init()` - console-only logging (default)
    /// - `init({ logger: (event) => {...} })` - callback + console logging
    ///
    /// The logger callback receives events with: `{ level, target, message, timestamp }`
    #[wasm_bindgen]
    pub fn init(config: Option<js_sys::Object>) {
        console_error_panic_hook::set_once();

        let callback = config
            .as_ref()
            .and_then(|cfg| js_sys::Reflect::get(cfg, &"logger".into()).ok())
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok());

        let console_config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::DEBUG)
            .build();

        match callback {
            Some(cb) => {
                LOGGER_CALLBACK.with(|cell| {
                    *cell.borrow_mut() = Some(cb);
                });

                let subscriber = tracing_subscriber::registry()
                    .with(JsCallbackLayer)
                    .with(tracing_wasm::WASMLayer::new(console_config));
                tracing::subscriber::set_global_default(subscriber).ok();
            }
            None => tracing_wasm::set_as_global_default_with_config(console_config),
        }

        info!("notepad-wasm {} initialized", env!("CARGO_PKG_VERSION"));
    }

    /// Get version string
    #[wasm_bindgen]
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Note id named by a `#/notes/<id>` fragment, or null.
    #[wasm_bindgen(js_name = parseFragment)]
    pub fn parse_fragment(fragment: &str) -> Option<String> {
        notepad_core::parse_fragment(fragment).map(|id| id.to_string())
    }

    // ========== WASM Subscription Handle ==========

    /// Subscription handle exposed to JavaScript.
    ///
    /// Call `dispose()` to unsubscribe, or let the JS garbage collector
    /// collect it (the Rust Drop will run via FinalizationRegistry).
    #[wasm_bindgen]
    pub struct WasmSubscription {
        inner: RefCell<Option<notepad_core::Subscription>>,
    }

    #[wasm_bindgen]
    impl WasmSubscription {
        /// Unsubscribe from events. Safe to call multiple times.
        pub fn dispose(&self) {
            self.inner.borrow_mut().take();
        }
    }

    // ========== Navigation ==========

    /// The page's location fragment, read once and written through a callback.
    struct PageNavigator {
        fragment: Option<String>,
        set_fn: js_sys::Function,
    }

    impl Navigator for PageNavigator {
        fn fragment(&self) -> Option<String> {
            self.fragment.clone()
        }

        fn set_fragment(&mut self, fragment: &str) {
            self.fragment = Some(fragment.to_string());
            if let Err(e) = self.set_fn.call1(&JsValue::NULL, &fragment.into()) {
                warn!("Failed to update location: {:?}", e);
            }
        }
    }

    fn lock_state_name(state: LockState) -> &'static str {
        match state {
            LockState::Unlocked => "unlocked",
            LockState::Locked => "locked",
            LockState::PromptingSetPassword => "promptingSetPassword",
            LockState::PromptingUnlock => "promptingUnlock",
        }
    }

    fn config_for(debounce_ms: Option<u32>) -> NotepadConfig {
        match debounce_ms {
            Some(ms) => NotepadConfig::default().with_debounce_ms(u64::from(ms)),
            None => NotepadConfig::default(),
        }
    }

    // ========== Notepad ==========

    /// An open note mirrored into the page's editor.
    ///
    /// Session borrows never span an await: each method takes what it needs
    /// from the session, releases it, then talks to the store.
    #[wasm_bindgen]
    pub struct WasmNotepad {
        store: Rc<dyn DocumentStore>,
        session: Rc<RefCell<Session<JsSurfaceBridge>>>,
        events: SharedEventBus,
        created: bool,
        drag: RefCell<Option<ResizeDrag>>,
        remote: AbortHandle,
    }

    #[wasm_bindgen]
    impl WasmNotepad {
        /// Open the note named by `fragment` in the realtime database, or
        /// create one and report its fragment through `setFragment`.
        #[wasm_bindgen(js_name = openRemote)]
        pub async fn open_remote(
            store: JsStoreBridge,
            surface: JsSurfaceBridge,
            fragment: Option<String>,
            set_fragment: js_sys::Function,
            debounce_ms: Option<u32>,
        ) -> Result<WasmNotepad, JsError> {
            let store: Rc<dyn DocumentStore> = Rc::new(store);
            let mut navigator = PageNavigator {
                fragment,
                set_fn: set_fragment,
            };

            let Resolution { id, created } = resolve_document(store.as_ref(), &mut navigator)
                .await
                .map_err(|e| JsError::new(&e.to_string()))?;

            Self::open(store, id, created, surface, &config_for(debounce_ms)).await
        }

        /// Open the single note kept in `localStorage`.
        #[wasm_bindgen(js_name = openLocal)]
        pub async fn open_local(
            items: JsKeyValueBridge,
            surface: JsSurfaceBridge,
            debounce_ms: Option<u32>,
        ) -> Result<WasmNotepad, JsError> {
            let store: Rc<dyn DocumentStore> = Rc::new(LocalStore::new(items));
            Self::open(store, NoteId::local(), false, surface, &config_for(debounce_ms)).await
        }

        /// The open note's id.
        #[wasm_bindgen(getter, js_name = noteId)]
        pub fn note_id(&self) -> String {
            self.session.borrow().id().to_string()
        }

        /// Whether the note was created when it was opened.
        #[wasm_bindgen(getter)]
        pub fn created(&self) -> bool {
            self.created
        }

        /// The user edited the editor. Returns the delay in ms before `flush` is due.
        #[wasm_bindgen(js_name = onInput)]
        pub fn on_input(&self) -> Result<f64, JsError> {
            let now = now_ms();
            let due = self
                .session
                .borrow_mut()
                .on_local_edit(now)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(due.saturating_sub(now) as f64)
        }

        /// Write the pending edit if its quiet period has elapsed.
        ///
        /// Returns true if a write landed.
        pub async fn flush(&self) -> bool {
            let patch = self.session.borrow_mut().take_due_write(now_ms());
            match patch {
                Some(patch) => self.commit(&patch).await,
                None => false,
            }
        }

        /// Write the pending edit now, e.g. before the page unloads.
        #[wasm_bindgen(js_name = flushNow)]
        pub async fn flush_now(&self) -> bool {
            let patch = self.session.borrow_mut().flush_now();
            match patch {
                Some(patch) => self.commit(&patch).await,
                None => false,
            }
        }

        /// Run an `execCommand`-style formatting command. Returns the delay before `flush`.
        pub fn format(&self, name: &str, value: Option<String>) -> Result<f64, JsError> {
            let command = notepad_core::FormatCommand::parse(name, value.as_deref())
                .map_err(|e| JsError::new(&e.to_string()))?;
            let now = now_ms();
            self.session
                .borrow_mut()
                .apply_format(command, now)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(self.delay_from(now))
        }

        /// Embed an image file at the caret. Returns the delay before `flush`.
        #[wasm_bindgen(js_name = insertImage)]
        pub fn insert_image(&self, mime: &str, bytes: &[u8]) -> Result<f64, JsError> {
            let now = now_ms();
            self.session
                .borrow_mut()
                .insert_image(mime, bytes, now)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(self.delay_from(now))
        }

        /// Select the `index`-th image for resizing, or clear the selection with null.
        #[wasm_bindgen(js_name = selectImage)]
        pub fn select_image(&self, index: Option<u32>) {
            self.session.borrow_mut().select_image(index.map(|i| i as usize));
            if index.is_none() {
                self.drag.borrow_mut().take();
            }
        }

        /// Start dragging the selected image's resize handle.
        #[wasm_bindgen(js_name = beginResize)]
        pub fn begin_resize(&self, start_x: i32, start_width: u32) {
            *self.drag.borrow_mut() = Some(ResizeDrag::new(start_x, start_width));
        }

        /// Pointer moved during a resize. Returns whether the width changed.
        #[wasm_bindgen(js_name = resizeTo)]
        pub fn resize_to(&self, x: i32) -> Result<bool, JsError> {
            let Some(drag) = *self.drag.borrow() else {
                return Ok(false);
            };
            self.session
                .borrow_mut()
                .resize_selected_image(&drag, x)
                .map_err(|e| JsError::new(&e.to_string()))
        }

        /// Pointer released. Returns the delay before `flush`.
        #[wasm_bindgen(js_name = finishResize)]
        pub fn finish_resize(&self) -> Result<f64, JsError> {
            self.drag.borrow_mut().take();
            let now = now_ms();
            let due = self
                .session
                .borrow_mut()
                .finish_resize(now)
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(due.saturating_sub(now) as f64)
        }

        /// The lock button. Returns the resulting lock state.
        #[wasm_bindgen(js_name = toggleLock)]
        pub async fn toggle_lock(&self) -> String {
            let step = self.session.borrow_mut().toggle_lock();
            self.after_lock_step(step).await
        }

        #[wasm_bindgen(js_name = requestLock)]
        pub async fn request_lock(&self) -> String {
            let step = self.session.borrow_mut().request_lock();
            self.after_lock_step(step).await
        }

        #[wasm_bindgen(js_name = requestUnlock)]
        pub async fn request_unlock(&self) -> String {
            let step = self.session.borrow_mut().request_unlock();
            self.after_lock_step(step).await
        }

        /// Submit the open password prompt. Rejects on a wrong password.
        #[wasm_bindgen(js_name = submitPassword)]
        pub async fn submit_password(&self, password: String) -> Result<String, JsError> {
            let patch = self
                .session
                .borrow_mut()
                .submit_password(&password)
                .map_err(|e| JsError::new(&e.to_string()))?;
            self.commit(&patch).await;
            Ok(self.lock_state())
        }

        /// Close the password prompt. Returns false if none was open.
        #[wasm_bindgen(js_name = cancelPrompt)]
        pub fn cancel_prompt(&self) -> bool {
            self.session.borrow_mut().cancel_prompt()
        }

        /// Reset the note to an empty paragraph and write it immediately.
        pub async fn clear(&self) -> Result<bool, JsError> {
            let patch = self
                .session
                .borrow_mut()
                .clear()
                .map_err(|e| JsError::new(&e.to_string()))?;
            Ok(self.commit(&patch).await)
        }

        /// Link that opens this note, built from the page's address.
        #[wasm_bindgen(js_name = shareUrl)]
        pub fn share_url(&self, base: &str) -> String {
            self.session.borrow().share_url(base)
        }

        /// One of `unlocked`, `locked`, `promptingSetPassword`, `promptingUnlock`.
        #[wasm_bindgen(js_name = lockState)]
        pub fn lock_state(&self) -> String {
            lock_state_name(self.session.borrow().lock_state()).to_string()
        }

        #[wasm_bindgen(js_name = isLocked)]
        pub fn is_locked(&self) -> bool {
            self.session.borrow().is_locked()
        }

        /// Subscribe to notepad events.
        ///
        /// Events are delivered on a microtask, so the callback may call back
        /// into this notepad. Call `dispose()` on the handle to unsubscribe.
        pub fn subscribe(&self, callback: js_sys::Function) -> WasmSubscription {
            let rust_closure = move |event: NotepadEvent| {
                let Ok(js_event) = serde_wasm_bindgen::to_value(&event) else {
                    return;
                };
                let callback = callback.clone();
                wasm_bindgen_futures::spawn_local(async move {
                    let _ = callback.call1(&JsValue::NULL, &js_event);
                });
            };

            WasmSubscription {
                inner: RefCell::new(Some(self.events.subscribe(rust_closure))),
            }
        }

        /// Stop following remote changes. Pending edits are not written.
        pub fn close(&self) {
            self.remote.abort();
        }
    }

    impl WasmNotepad {
        async fn open(
            store: Rc<dyn DocumentStore>,
            id: NoteId,
            created: bool,
            surface: JsSurfaceBridge,
            config: &NotepadConfig,
        ) -> Result<WasmNotepad, JsError> {
            let mut remote = store
                .subscribe(&id)
                .await
                .map_err(|e| JsError::new(&e.to_string()))?;

            let events = EventBus::shared();
            let session = Rc::new(RefCell::new(Session::with_events(
                id.clone(),
                surface,
                config,
                Rc::clone(&events),
            )));

            let (remote_handle, registration) = AbortHandle::new_pair();
            let pump = Rc::clone(&session);
            wasm_bindgen_futures::spawn_local(async move {
                let follow = async move {
                    while let Some(record) = remote.next().await {
                        pump.borrow_mut().on_remote_update(record);
                    }
                    warn!("Subscription to note {} ended", id);
                };
                let _ = Abortable::new(follow, registration).await;
            });

            info!("Opened note {}", session.borrow().id());
            Ok(WasmNotepad {
                store,
                session,
                events,
                created,
                drag: RefCell::new(None),
                remote: remote_handle,
            })
        }

        /// Delay until the pending write is due, measured from `now`.
        fn delay_from(&self, now: u64) -> f64 {
            self.session
                .borrow()
                .next_write_due()
                .map(|due| due.saturating_sub(now) as f64)
                .unwrap_or(0.0)
        }

        async fn commit(&self, patch: &NotePatch) -> bool {
            let id = self.session.borrow().id().clone();
            let landed = commit_patch(self.store.as_ref(), &id, patch, &self.events).await;
            if !landed {
                self.session.borrow_mut().on_write_failed(patch);
            }
            landed
        }

        async fn after_lock_step(&self, step: LockStep) -> String {
            if let LockStep::Commit(patch) = step {
                self.commit(&patch).await;
            }
            self.lock_state()
        }
    }

    impl Drop for WasmNotepad {
        fn drop(&mut self) {
            self.remote.abort();
        }
    }
}

// Re-export wasm_impl contents at crate root for wasm32 targets
#[cfg(target_arch = "wasm32")]
pub use wasm_impl::*;
