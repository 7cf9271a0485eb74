#![forbid(unsafe_code)]

//! nbsync core
//!
//! Leaf types shared by the synchronization runtime and the widgets built on
//! it:
//!
//! - [`KeyMap`] - remote field ↔ local property translation table
//! - [`RemoteModelHandle`] - contract of the host-owned remote model
//! - [`CommandEnvelope`] - outgoing command wire shape
//! - [`SyncConfig`] - TOML/JSON configuration
//!
//! Values and payloads are plain [`serde_json::Value`]s.

pub mod config;
pub mod error;
pub mod handle;
pub mod key_map;
pub mod message;

pub use config::{
    BinderConfig, ChannelConfig, InspectorConfig, LoggingConfig, ReattachPolicy, ReplacePolicy,
    SyncConfig, TreeConfig,
};
pub use error::{ConfigError, KeyMapError, RemoteError};
pub use handle::{FieldCallback, MessageCallback, RemoteModelHandle, SubscriptionId, WeakHandle};
pub use key_map::{KeyMap, KeyMapBuilder};
pub use message::{CommandEnvelope, reply_section};

pub use serde_json::Value;
