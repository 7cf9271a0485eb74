#![forbid(unsafe_code)]

//! nbsync runtime
//!
//! Ties a local view to a host-owned remote model.
//!
//! # Key Components
//!
//! - [`ViewState`] - local property store with coalescing update cycles
//! - [`SyncBinder`] - two-way property mirroring with loop suppression and
//!   one flush per batch
//! - [`CommandChannel`] - fire-and-forget commands whose replies are routed
//!   by content and dropped when stale
//! - [`WidgetRegistry`] - idempotent, process-wide widget kind registry
//! - [`MountedWidget`] - a binding and a channel torn down together
//!
//! # Threading
//! Everything here is single-threaded (`Rc`, `RefCell`). Remote callbacks
//! are expected on the thread that owns the view, which is how notebook
//! front ends deliver them.

pub mod binder;
pub mod channel;
pub mod error;
pub mod mount;
pub mod registry;
pub mod view;

pub use binder::{Binding, BindingStats, SyncBinder};
pub use channel::{
    ChannelStats, Command, CommandChannel, ContextMatch, DispatchOutcome, Reply, ReplyRoute,
};
pub use error::{BindError, CommandError, RegistryError};
pub use mount::{MountedWidget, mount};
pub use registry::{Registration, WidgetRegistry, register_widget};
pub use view::{ChangeBatch, Origin, UpdateCycle, ViewId, ViewState, WatchGuard, WeakView};
