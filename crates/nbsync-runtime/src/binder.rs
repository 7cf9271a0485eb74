#![forbid(unsafe_code)]

//! Two-way property synchronization between a [`ViewState`] and a remote
//! model.
//!
//! # How it works
//!
//! 1. [`SyncBinder::attach`] copies every mirrored remote field into the
//!    view (one remote-origin update cycle, before anything renders), then
//!    subscribes to each declared remote field.
//! 2. A remote change notification reads the field back through the handle
//!    and assigns it to the mapped local property as a remote-origin write.
//!    Observe-only fields go to the [`Binding::on_observed`] hook instead.
//! 3. At the end of each view update cycle the binder receives the
//!    [`ChangeBatch`]. Every changed, mapped property that is *not*
//!    remote-origin is staged with `set`; then `flush` runs once for the
//!    whole batch.
//!
//! # Invariants
//!
//! 1. A remote-origin write is never echoed back to `set` in the same cycle.
//! 2. `flush` is called at most once per batch, and only if something was
//!    staged.
//! 3. At most one live binding exists per view. The slot lives on the view,
//!    so a second attach through any binder replaces the first or is
//!    rejected per [`ReattachPolicy`].
//! 4. After [`Binding::detach`], no remote notification or local change
//!    reaches the other side.
//!
//! # Failure Modes
//!
//! - **Remote read/write fails** (field unknown, model tearing down): the
//!   field is logged and skipped; the rest of the batch proceeds.
//! - **Host drops the model**: every later step is a logged no-op.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use nbsync_core::{
    BinderConfig, KeyMap, ReattachPolicy, RemoteError, RemoteModelHandle, SubscriptionId,
    WeakHandle,
};
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn};
use web_time::Instant;

use crate::error::BindError;
use crate::view::{ChangeBatch, ViewId, ViewState, WatchGuard, WeakView};

type ObserveCallback = Rc<dyn Fn(&str, &Value)>;
type DetachHook = Box<dyn FnOnce()>;

/// Counters for one binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Remote values written into the view.
    pub remote_writes: u64,
    /// Local values staged on the remote model.
    pub local_sets: u64,
    /// `flush` calls issued.
    pub flushes: u64,
    /// Fields skipped because the remote side failed.
    pub skipped: u64,
    /// Remote-origin changes not echoed back.
    pub suppressed: u64,
}

pub(crate) struct BindingInner {
    view: WeakView,
    view_id: ViewId,
    handle: WeakHandle,
    keymap: Rc<KeyMap>,
    subscriptions: RefCell<Vec<SubscriptionId>>,
    change_guard: RefCell<Option<WatchGuard>>,
    observer: RefCell<Option<ObserveCallback>>,
    on_detach: RefCell<Vec<DetachHook>>,
    detached: Cell<bool>,
    stats: Cell<BindingStats>,
}

impl BindingInner {
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.get()
    }

    fn bump(&self, f: impl FnOnce(&mut BindingStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Remote → local for one field.
    fn pull(&self, remote: &str) {
        if self.detached.get() {
            return;
        }
        let Some(view) = self.view.upgrade() else {
            return;
        };
        let started = Instant::now();
        let span = debug_span!(
            "nbsync.sync",
            direction = "remote_to_local",
            view = self.view_id.get(),
            fields = 1_u64,
            duration_us = tracing::field::Empty
        );
        let _guard = span.enter();

        let value = match self.handle.upgrade().and_then(|h| h.get(remote)) {
            Ok(value) => value,
            Err(error) => {
                warn!(field = remote, %error, "remote read failed; field skipped");
                self.bump(|s| s.skipped += 1);
                return;
            }
        };

        match self.keymap.forward(remote) {
            Some(local) => {
                trace!(field = remote, local, "remote value applied");
                view.assign_remote(local, value);
                self.bump(|s| s.remote_writes += 1);
            }
            None => {
                let observer = self.observer.borrow().clone();
                if let Some(observer) = observer {
                    observer(remote, &value);
                }
            }
        }
        span.record("duration_us", started.elapsed().as_micros() as u64);
    }

    /// Local → remote for one completed update cycle.
    fn push(&self, batch: &ChangeBatch) {
        if self.detached.get() {
            return;
        }
        let Some(view) = self.view.upgrade() else {
            return;
        };
        let handle = match self.handle.upgrade() {
            Ok(handle) => handle,
            Err(error) => {
                debug!(view = self.view_id.get(), %error, "local changes not propagated");
                return;
            }
        };

        let started = Instant::now();
        let span = debug_span!(
            "nbsync.sync",
            direction = "local_to_remote",
            view = self.view_id.get(),
            fields = batch.len() as u64,
            duration_us = tracing::field::Empty
        );
        let _guard = span.enter();

        let mut staged = 0_u64;
        for local in batch.changed() {
            let Some(remote) = self.keymap.remote_for(local) else {
                continue;
            };
            if batch.is_remote_origin(local) {
                trace!(field = remote, "remote-origin change not echoed");
                self.bump(|s| s.suppressed += 1);
                continue;
            }
            let Some(value) = view.get(local) else {
                continue;
            };
            match handle.set(remote, value) {
                Ok(()) => {
                    staged += 1;
                    self.bump(|s| s.local_sets += 1);
                }
                Err(error) => {
                    warn!(field = remote, %error, "remote write failed; field skipped");
                    self.bump(|s| s.skipped += 1);
                }
            }
        }

        if staged > 0 {
            match handle.flush() {
                Ok(()) => self.bump(|s| s.flushes += 1),
                Err(error) => warn!(staged, %error, "flush failed"),
            }
        }

        span.record("duration_us", started.elapsed().as_micros() as u64);
    }

    fn detach(&self) {
        if self.detached.replace(true) {
            return;
        }
        let ids = std::mem::take(&mut *self.subscriptions.borrow_mut());
        match self.handle.upgrade() {
            Ok(handle) => {
                for id in &ids {
                    handle.unsubscribe(*id);
                }
            }
            Err(RemoteError::TornDown) => {}
            Err(error) => debug!(%error, "unsubscribe skipped"),
        }
        self.change_guard.borrow_mut().take();
        self.observer.borrow_mut().take();
        let hooks = std::mem::take(&mut *self.on_detach.borrow_mut());
        for hook in hooks {
            hook();
        }
        debug!(view = self.view_id.get(), subscriptions = ids.len(), "binding detached");
    }
}

/// Live association of one view, one remote model, and one key map.
///
/// Dropping the binding detaches it.
pub struct Binding {
    inner: Rc<BindingInner>,
}

impl Binding {
    /// Unregister every subscription. Idempotent.
    pub fn detach(&self) {
        self.inner.detach();
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.get()
    }

    /// Hook for observe-only fields: called with the field name and its new
    /// value whenever the remote side changes it.
    pub fn on_observed(&self, callback: impl Fn(&str, &Value) + 'static) {
        if self.is_detached() {
            return;
        }
        *self.inner.observer.borrow_mut() = Some(Rc::new(callback));
    }

    /// Run `hook` once when the binding detaches, whether through
    /// [`detach`](Self::detach), drop, or replacement by a later attach.
    pub(crate) fn on_detach(&self, hook: impl FnOnce() + 'static) {
        if self.is_detached() {
            hook();
            return;
        }
        self.inner.on_detach.borrow_mut().push(Box::new(hook));
    }

    #[must_use]
    pub fn view_id(&self) -> ViewId {
        self.inner.view_id
    }

    #[must_use]
    pub fn keymap(&self) -> &KeyMap {
        &self.inner.keymap
    }

    #[must_use]
    pub fn stats(&self) -> BindingStats {
        self.inner.stats.get()
    }

    /// Number of live remote subscriptions held by this binding.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("view", &self.inner.view_id)
            .field("detached", &self.is_detached())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Attaches views to remote models and enforces one live binding per view.
#[derive(Debug, Default)]
pub struct SyncBinder {
    config: BinderConfig,
}

impl SyncBinder {
    #[must_use]
    pub fn new(config: BinderConfig) -> Self {
        Self { config }
    }

    /// Bind `view` to `handle` through `keymap`.
    ///
    /// The returned [`Binding`] is the disposer; keep it alive for as long
    /// as the view should stay synchronized.
    pub fn attach(
        &self,
        view: &ViewState,
        handle: &Rc<dyn RemoteModelHandle>,
        keymap: Rc<KeyMap>,
    ) -> Result<Binding, BindError> {
        let view_id = view.id();
        if let Some(previous) = view.live_binding() {
            match self.config.reattach {
                ReattachPolicy::Reject => return Err(BindError::AlreadyBound(view_id)),
                ReattachPolicy::Replace => {
                    debug!(view = view_id.get(), "replacing previous binding");
                    previous.detach();
                }
            }
        }

        let inner = Rc::new(BindingInner {
            view: view.downgrade(),
            view_id,
            handle: WeakHandle::new(handle),
            keymap,
            subscriptions: RefCell::new(Vec::new()),
            change_guard: RefCell::new(None),
            observer: RefCell::new(None),
            on_detach: RefCell::new(Vec::new()),
            detached: Cell::new(false),
            stats: Cell::new(BindingStats::default()),
        });

        {
            let _span = debug_span!(
                "nbsync.sync",
                direction = "initial",
                view = view_id.get(),
                fields = inner.keymap.len() as u64
            )
            .entered();
            let _cycle = view.begin_cycle();
            for (remote, _) in inner.keymap.mirrored() {
                inner.pull(remote);
            }
        }

        let mut ids = Vec::with_capacity(inner.keymap.len());
        for (remote, _) in inner.keymap.entries() {
            let weak = Rc::downgrade(&inner);
            let field = remote.to_string();
            let callback = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.pull(&field);
                }
            });
            match handle.subscribe(remote, callback) {
                Ok(id) => ids.push(id),
                Err(error) => {
                    warn!(
                        view = view_id.get(),
                        field = remote,
                        %error,
                        "subscribe failed; field not observed"
                    );
                }
            }
        }
        *inner.subscriptions.borrow_mut() = ids;

        let weak = Rc::downgrade(&inner);
        let guard = view.on_changes(move |batch| {
            if let Some(inner) = weak.upgrade() {
                inner.push(batch);
            }
        });
        *inner.change_guard.borrow_mut() = Some(guard);

        view.set_binding(Rc::downgrade(&inner));
        debug!(
            view = view_id.get(),
            subscriptions = inner.subscriptions.borrow().len(),
            "binding attached"
        );

        Ok(Binding { inner })
    }

    /// Detach `binding`. Equivalent to [`Binding::detach`].
    pub fn detach(&self, binding: &Binding) {
        binding.detach();
    }

    /// Whether `view` currently has a live binding from any binder.
    #[must_use]
    pub fn is_bound(&self, view: &ViewState) -> bool {
        view.live_binding().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &BinderConfig {
        &self.config
    }
}
