#![forbid(unsafe_code)]

//! Error taxonomy shared by every nbsync crate.
//!
//! Two families matter at runtime:
//!
//! - [`KeyMapError`] is a configuration error. It is raised while a widget's
//!   key map is being built and is never recoverable.
//! - [`RemoteError`] is transient. The binder and the command channel log it
//!   and move on to the next field or message.

use std::path::PathBuf;

/// Failure while building a [`KeyMap`](crate::key_map::KeyMap).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyMapError {
    /// The same remote field was declared twice.
    #[error("remote field `{field}` is declared more than once")]
    DuplicateRemote { field: String },

    /// Two remote fields target the same local property.
    #[error("local property `{local}` is targeted by both `{first}` and `{second}`")]
    DuplicateLocal {
        local: String,
        first: String,
        second: String,
    },

    /// A remote field or local property name was empty.
    #[error("key map entry has an empty name (remote `{remote}`)")]
    EmptyName { remote: String },
}

/// Failure talking to the remote model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The model does not know this field.
    #[error("remote model has no field `{0}`")]
    UnknownField(String),

    /// The model (or its host) is being torn down.
    #[error("remote model is torn down")]
    TornDown,

    /// The host refused the operation.
    #[error("remote model rejected the operation: {0}")]
    Rejected(String),
}

/// Failure loading or validating a [`SyncConfig`](crate::config::SyncConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config failed validation: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
