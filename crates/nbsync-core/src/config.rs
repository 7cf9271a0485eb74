#![forbid(unsafe_code)]

//! Runtime configuration for nbsync.
//!
//! All tunables live in one [`SyncConfig`] that can be loaded from TOML or
//! JSON at startup.
//!
//! ```toml
//! # nbsync.toml
//! [binder]
//! reattach = "reject"
//!
//! [channel]
//! command_type = "calculate"
//!
//! [inspector]
//! decimals = 3
//! ```
//!
//! ```rust,ignore
//! let config = SyncConfig::from_toml_file("nbsync.toml")?;
//! let config = SyncConfig::from_json_str(json)?;
//! ```
//!
//! Every field has a default, so `SyncConfig::default()` is always usable.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub binder: BinderConfig,
    pub channel: ChannelConfig,
    pub tree: TreeConfig,
    pub inspector: InspectorConfig,
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.into_validated()
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.into_validated()
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&read(path.as_ref())?)
    }

    /// Check every parameter. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.channel.command_type.trim().is_empty() {
            errors.push("channel.command_type must not be empty".into());
        }

        if self.inspector.decimals > InspectorConfig::MAX_DECIMALS {
            errors.push(format!(
                "inspector.decimals must be <= {}, got {}",
                InspectorConfig::MAX_DECIMALS,
                self.inspector.decimals
            ));
        }

        if self.logging.filter.trim().is_empty() {
            errors.push("logging.filter must not be empty".into());
        }

        errors
    }

    fn into_validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// What happens when a view that already has a live binding is attached
/// again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReattachPolicy {
    /// Tear down the previous binding, then attach.
    #[default]
    Replace,
    /// Refuse the second attach.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    pub reattach: ReattachPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// `type` written on every outgoing envelope.
    pub command_type: String,
    /// Emit a debug event for every dropped reply.
    pub trace_stale: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_type: "calculate".into(),
            trace_stale: true,
        }
    }
}

/// How a tree rebuilt from new source data treats expansion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// Only `expanded` flags embedded in the source count.
    SourceFlags,
    /// Embedded flags win; nodes without one keep the state they had at the
    /// same label path before the replacement.
    #[default]
    PreservePaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Top-level nodes start expanded unless the source says otherwise.
    pub expand_roots: bool,
    pub replace_policy: ReplacePolicy,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            expand_roots: true,
            replace_policy: ReplacePolicy::PreservePaths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Decimal places for coordinates and float pixel values.
    pub decimals: u32,
    pub expand_point: bool,
    pub expand_pixels: bool,
    pub expand_objects: bool,
}

impl InspectorConfig {
    /// Largest precision an `f64` can meaningfully show.
    pub const MAX_DECIMALS: u32 = 15;

    /// `decimals` clamped to [`MAX_DECIMALS`](Self::MAX_DECIMALS).
    #[must_use]
    pub fn effective_decimals(&self) -> u32 {
        self.decimals.min(Self::MAX_DECIMALS)
    }
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            decimals: 2,
            expand_point: false,
            expand_pixels: true,
            expand_objects: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info,nbsync_runtime=debug"`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}
