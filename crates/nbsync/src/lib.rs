#![forbid(unsafe_code)]

//! nbsync public facade crate.
//!
//! Re-exports the core types, the synchronization runtime, and (with the
//! `widgets` feature) the stock widgets, plus a [`prelude`] for glob
//! imports.
//!
//! # Example
//!
//! ```ignore
//! use nbsync::prelude::*;
//!
//! let config = SyncConfig::from_toml_file("nbsync.toml")?;
//! nbsync::init_tracing(&config.logging);
//! let binder = SyncBinder::new(config.binder.clone());
//! let view = ViewState::new();
//! let binding = binder.attach(&view, &handle, keymap)?;
//! ```

use tracing_subscriber::EnvFilter;

// --- Core re-exports ------------------------------------------------------

pub use nbsync_core::{
    BinderConfig, ChannelConfig, CommandEnvelope, ConfigError, InspectorConfig, KeyMap,
    KeyMapBuilder, KeyMapError, LoggingConfig, ReattachPolicy, RemoteError, RemoteModelHandle,
    ReplacePolicy, SubscriptionId, SyncConfig, TreeConfig, Value,
};

// --- Runtime re-exports ---------------------------------------------------

pub use nbsync_runtime::{
    BindError, Binding, BindingStats, ChangeBatch, ChannelStats, Command, CommandChannel,
    CommandError, ContextMatch, DispatchOutcome, MountedWidget, Origin, Registration,
    RegistryError, Reply, ReplyRoute, SyncBinder, UpdateCycle, ViewId, ViewState, WatchGuard,
    WeakView, WidgetRegistry, mount, register_widget,
};

// --- Widget re-exports ----------------------------------------------------

#[cfg(feature = "widgets")]
pub use nbsync_widgets::{
    Affordance, InspectionReport, Inspector, NodeRole, RasterLayerEditor, TreeModel, TreeNode,
    TreeView, VisibleRow, register_all,
};

pub use nbsync_core as core;
pub use nbsync_runtime as runtime;
#[cfg(feature = "widgets")]
pub use nbsync_widgets as widgets;

/// Environment variable that overrides [`LoggingConfig::filter`].
pub const LOG_ENV: &str = "NBSYNC_LOG";

/// Install a `fmt` subscriber filtered by `NBSYNC_LOG`, falling back to
/// `config.filter` and then to `info` when a directive does not parse.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(config))
        .try_init()
        .is_ok()
}

fn resolve_filter(config: &LoggingConfig) -> EnvFilter {
    let directive = std::env::var(LOG_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| config.filter.clone());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ChannelConfig, Command, CommandChannel, ContextMatch, DispatchOutcome, KeyMap,
        RemoteModelHandle, ReplyRoute, SyncBinder, SyncConfig, UpdateCycle, Value, ViewState,
        init_tracing, mount,
    };

    #[cfg(feature = "widgets")]
    pub use crate::{Inspector, RasterLayerEditor, TreeView};

    pub use crate::{core, runtime};
}
