#![forbid(unsafe_code)]

//! Local view state with update-cycle change reporting.
//!
//! # Design
//!
//! [`ViewState`] is the local half of a synchronized widget: a named bag of
//! [`Value`] properties in shared, reference-counted storage
//! (`Rc<RefCell<..>>`). Cloning a `ViewState` yields another handle to the
//! same view.
//!
//! Mutations are grouped into *update cycles*. While an [`UpdateCycle`]
//! guard is alive, changed property names accumulate; when the outermost
//! guard drops, one [`ChangeBatch`] is reported to every change listener and
//! property watchers fire once with the latest value. A mutation made
//! outside any cycle forms its own single-property cycle.
//!
//! Each change carries its origin. [`ViewState::assign_remote`] marks the
//! property as remote-origin for the rest of the cycle; a later user-origin
//! [`ViewState::set`] of the same property in the same cycle clears the mark.
//! Listeners use the mark to avoid echoing a remote write back to the remote
//! side.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one is a no-op: no version bump,
//!    no change reported.
//! 2. `version` increments by exactly 1 on each value-changing write.
//! 3. Nested cycles are supported; only the outermost one reports.
//! 4. A batch lists each changed property once, in first-change order.
//!
//! # Failure Modes
//!
//! - **Listener panics during report**: remaining listeners still run; the
//!   first panic is re-raised afterwards.
//! - **Guard leak**: dropped [`WatchGuard`]s unsubscribe; dead entries are
//!   pruned lazily on the next report.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::debug_span;
use web_time::Instant;

use crate::binder::BindingInner;

type BatchCallback = Rc<dyn Fn(&ChangeBatch)>;
type WatchCallback = Rc<dyn Fn(&Value)>;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a view instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
    fn next() -> Self {
        Self(NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view:{}", self.0)
    }
}

/// Where a property write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// User interaction or view logic.
    User,
    /// Mirrored from the remote model.
    Remote,
}

/// Properties that changed during one update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    changed: Vec<String>,
    remote_origin: HashSet<String>,
}

impl ChangeBatch {
    /// Changed property names in first-change order.
    #[must_use]
    pub fn changed(&self) -> &[String] {
        &self.changed
    }

    #[must_use]
    pub fn contains(&self, prop: &str) -> bool {
        self.changed.iter().any(|p| p == prop)
    }

    /// Whether the change to `prop` came from the remote side.
    #[must_use]
    pub fn is_remote_origin(&self, prop: &str) -> bool {
        self.remote_origin.contains(prop)
    }

    /// Changed properties whose change was not remote-origin.
    pub fn user_changes(&self) -> impl Iterator<Item = &str> {
        self.changed
            .iter()
            .map(String::as_str)
            .filter(|p| !self.remote_origin.contains(*p))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

struct ViewInner {
    id: ViewId,
    props: IndexMap<String, Value>,
    version: u64,
    depth: u32,
    pending: IndexSet<String>,
    remote_origin: HashSet<String>,
    listeners: Vec<Weak<dyn Fn(&ChangeBatch)>>,
    watchers: Vec<(String, Weak<dyn Fn(&Value)>)>,
    binding: Option<Weak<BindingInner>>,
}

/// Shared handle to a view's local properties.
pub struct ViewState {
    inner: Rc<RefCell<ViewInner>>,
}

impl Clone for ViewState {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ViewState")
            .field("id", &inner.id)
            .field("props", &inner.props)
            .field("version", &inner.version)
            .field("listener_count", &inner.listeners.len())
            .finish()
    }
}

impl ViewState {
    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ViewInner {
                id: ViewId::next(),
                props: IndexMap::new(),
                version: 0,
                depth: 0,
                pending: IndexSet::new(),
                remote_origin: HashSet::new(),
                listeners: Vec::new(),
                watchers: Vec::new(),
                binding: None,
            })),
        }
    }

    /// Create a view with default property values. Nothing is reported.
    #[must_use]
    pub fn with_props<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let view = Self::new();
        {
            let mut inner = view.inner.borrow_mut();
            for (name, value) in props {
                inner.props.insert(name.into(), value);
            }
        }
        view
    }

    #[must_use]
    pub fn id(&self) -> ViewId {
        self.inner.borrow().id
    }

    /// Current value of `prop`.
    #[must_use]
    pub fn get(&self, prop: &str) -> Option<Value> {
        self.inner.borrow().props.get(prop).cloned()
    }

    /// Access a property by reference without cloning.
    pub fn with<R>(&self, prop: &str, f: impl FnOnce(Option<&Value>) -> R) -> R {
        f(self.inner.borrow().props.get(prop))
    }

    /// Property names in insertion order.
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        self.inner.borrow().props.keys().cloned().collect()
    }

    /// Number of value-changing writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Write `prop` as a user-origin change.
    pub fn set(&self, prop: &str, value: Value) {
        let _cycle = self.begin_cycle();
        self.write(prop, value, Origin::User);
    }

    /// Write `prop` as a remote-origin change.
    pub fn assign_remote(&self, prop: &str, value: Value) {
        let _cycle = self.begin_cycle();
        self.write(prop, value, Origin::Remote);
    }

    /// Start an update cycle. Changes are reported when the outermost
    /// cycle ends.
    #[must_use = "the cycle ends when the guard is dropped"]
    pub fn begin_cycle(&self) -> UpdateCycle {
        let is_root = {
            let mut inner = self.inner.borrow_mut();
            inner.depth += 1;
            inner.depth == 1
        };
        UpdateCycle {
            view: self.clone(),
            is_root,
        }
    }

    /// Whether an update cycle is open.
    #[must_use]
    pub fn in_cycle(&self) -> bool {
        self.inner.borrow().depth > 0
    }

    /// Receive one [`ChangeBatch`] per completed update cycle.
    pub fn on_changes(&self, callback: impl Fn(&ChangeBatch) + 'static) -> WatchGuard {
        let strong: BatchCallback = Rc::new(callback);
        self.inner
            .borrow_mut()
            .listeners
            .push(Rc::downgrade(&strong));
        WatchGuard {
            _guard: Box::new(strong),
        }
    }

    /// Receive the latest value of `prop` after each cycle that changed it.
    pub fn watch(&self, prop: &str, callback: impl Fn(&Value) + 'static) -> WatchGuard {
        let strong: WatchCallback = Rc::new(callback);
        self.inner
            .borrow_mut()
            .watchers
            .push((prop.to_string(), Rc::downgrade(&strong)));
        WatchGuard {
            _guard: Box::new(strong),
        }
    }

    /// Number of registered change listeners (including dead ones not yet
    /// pruned).
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakView {
        WeakView {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The view's live binding, whichever binder created it.
    pub(crate) fn live_binding(&self) -> Option<Rc<BindingInner>> {
        let mut inner = self.inner.borrow_mut();
        let live = inner
            .binding
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|binding| !binding.is_detached());
        if live.is_none() {
            inner.binding = None;
        }
        live
    }

    pub(crate) fn set_binding(&self, binding: Weak<BindingInner>) {
        self.inner.borrow_mut().binding = Some(binding);
    }

    fn write(&self, prop: &str, value: Value, origin: Origin) {
        let mut inner = self.inner.borrow_mut();
        if inner.props.get(prop) == Some(&value) {
            return;
        }
        inner.props.insert(prop.to_string(), value);
        inner.version += 1;
        inner.pending.insert(prop.to_string());
        match origin {
            Origin::Remote => {
                inner.remote_origin.insert(prop.to_string());
            }
            Origin::User => {
                inner.remote_origin.remove(prop);
            }
        }
    }

    fn end_cycle(&self, is_root: bool) {
        let should_report = {
            let mut inner = self.inner.borrow_mut();
            inner.depth = inner.depth.saturating_sub(1);
            is_root && inner.depth == 0
        };
        if should_report {
            self.report();
        }
    }

    /// Report the pending batch to listeners and watchers.
    fn report(&self) {
        let (id, batch, listeners, watchers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.pending.is_empty() {
                return;
            }
            let changed: Vec<String> = std::mem::take(&mut inner.pending).into_iter().collect();
            let remote_origin = std::mem::take(&mut inner.remote_origin);

            inner.listeners.retain(|w| w.strong_count() > 0);
            inner.watchers.retain(|(_, w)| w.strong_count() > 0);
            let listeners: Vec<BatchCallback> =
                inner.listeners.iter().filter_map(Weak::upgrade).collect();
            let watchers: Vec<(WatchCallback, Value)> = inner
                .watchers
                .iter()
                .filter(|(prop, _)| changed.contains(prop))
                .filter_map(|(prop, w)| {
                    let value = inner.props.get(prop)?.clone();
                    Some((w.upgrade()?, value))
                })
                .collect();
            (
                inner.id,
                ChangeBatch {
                    changed,
                    remote_origin,
                },
                listeners,
                watchers,
            )
        };

        let started = Instant::now();
        let _span = debug_span!(
            "nbsync.view.cycle",
            view = id.get(),
            changed = batch.len() as u64,
            remote = batch.remote_origin.len() as u64,
            duration_us = tracing::field::Empty
        )
        .entered();

        // Run every callback outside the borrow; keep going past a panic.
        let mut first_panic: Option<Box<dyn Any + Send>> = None;
        for (watcher, value) in watchers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| watcher(&value)));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }
        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&batch)));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }

        tracing::Span::current().record("duration_us", started.elapsed().as_micros() as u64);

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    }
}

/// Non-owning reference to a [`ViewState`].
#[derive(Clone)]
pub struct WeakView {
    inner: Weak<RefCell<ViewInner>>,
}

impl WeakView {
    #[must_use]
    pub fn upgrade(&self) -> Option<ViewState> {
        self.inner.upgrade().map(|inner| ViewState { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakView")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// RAII guard for an update cycle.
///
/// Nested cycles are supported; only the outermost one reports.
pub struct UpdateCycle {
    view: ViewState,
    is_root: bool,
}

impl UpdateCycle {
    /// Whether this guard will report when dropped.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Properties changed so far in this cycle.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.view.inner.borrow().pending.iter().cloned().collect()
    }
}

impl Drop for UpdateCycle {
    fn drop(&mut self) {
        self.view.end_cycle(self.is_root);
    }
}

impl fmt::Debug for UpdateCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCycle")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending())
            .finish()
    }
}

/// RAII guard for a change listener or property watcher.
///
/// Dropping the guard makes the callback unreachable; the registry entry is
/// pruned on the next report.
pub struct WatchGuard {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard").finish_non_exhaustive()
    }
}
