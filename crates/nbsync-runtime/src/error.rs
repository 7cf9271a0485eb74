#![forbid(unsafe_code)]

use nbsync_core::{KeyMapError, RemoteError};

use crate::view::ViewId;

/// Failure attaching a view to a remote model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The view already has a live binding and the reattach policy is
    /// `reject`.
    #[error("{0} already has a live binding")]
    AlreadyBound(ViewId),

    /// The command channel could not register its inbound listener.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure building or sending a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// A context property the reply will be validated against is unset.
    #[error("command `{tag}` needs context property `{property}`, which the view does not have")]
    MissingContext { tag: String, property: String },

    /// The channel was closed by teardown.
    #[error("command channel is closed")]
    Closed,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure in the widget registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("widget `{name}` declares an invalid key map: {source}")]
    KeyMap {
        name: String,
        #[source]
        source: KeyMapError,
    },

    #[error("no widget named `{0}` is registered")]
    UnknownWidget(String),
}
