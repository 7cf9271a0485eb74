#![forbid(unsafe_code)]

//! Process-wide registry of widget kinds.
//!
//! Each widget kind is registered once under a name together with the
//! factory that declares its [`KeyMap`]. Registration is idempotent: the
//! first definition wins and later calls report
//! [`Registration::AlreadyDefined`] without running their factory.
//!
//! The factory runs at registration, so an invalid key map surfaces as a
//! [`RegistryError`] at the single initialization point instead of at first
//! mount.
//!
//! # Example
//!
//! ```
//! use nbsync_core::KeyMap;
//! use nbsync_runtime::registry::{Registration, WidgetRegistry};
//!
//! fn slider() -> Result<KeyMap, nbsync_core::KeyMapError> {
//!     KeyMap::builder().mirror("value", "value").build()
//! }
//!
//! let mut registry = WidgetRegistry::new();
//! assert_eq!(registry.register("slider", slider).unwrap(), Registration::Defined);
//! assert_eq!(registry.register("slider", slider).unwrap(), Registration::AlreadyDefined);
//! assert!(registry.contains("slider"));
//! ```

use std::rc::Rc;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use indexmap::IndexMap;
use nbsync_core::{KeyMap, KeyMapError};
use tracing::debug;

use crate::error::RegistryError;

/// Produces the key map for one widget kind.
pub type KeyMapFactory = fn() -> Result<KeyMap, KeyMapError>;

/// Outcome of [`WidgetRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The name was new and is now defined.
    Defined,
    /// The name was already defined; the existing definition is kept.
    AlreadyDefined,
}

/// Widget kinds by name, in registration order.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    widgets: IndexMap<String, Arc<KeyMap>>,
}

impl WidgetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Mutex<WidgetRegistry> {
        static GLOBAL: OnceLock<Mutex<WidgetRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(WidgetRegistry::new()))
    }

    /// Define `name` unless it is already defined.
    pub fn register(
        &mut self,
        name: &str,
        factory: KeyMapFactory,
    ) -> Result<Registration, RegistryError> {
        if self.widgets.contains_key(name) {
            return Ok(Registration::AlreadyDefined);
        }
        let keymap = factory().map_err(|source| RegistryError::KeyMap {
            name: name.to_string(),
            source,
        })?;
        debug!(widget = name, fields = keymap.len(), "widget registered");
        self.widgets.insert(name.to_string(), Arc::new(keymap));
        Ok(Registration::Defined)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.widgets.contains_key(name)
    }

    #[must_use]
    pub fn keymap(&self, name: &str) -> Option<Arc<KeyMap>> {
        self.widgets.get(name).cloned()
    }

    /// A key map for `name` ready to hand to a binder.
    pub fn instantiate(&self, name: &str) -> Result<Rc<KeyMap>, RegistryError> {
        self.widgets
            .get(name)
            .map(|keymap| Rc::new(KeyMap::clone(keymap)))
            .ok_or_else(|| RegistryError::UnknownWidget(name.to_string()))
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.widgets.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

/// Register `name` in the process-wide registry.
///
/// A poisoned lock is recovered: the registry holds no invariant that a
/// panicking factory could break.
pub fn register_widget(name: &str, factory: KeyMapFactory) -> Result<Registration, RegistryError> {
    WidgetRegistry::global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, factory)
}

/// Look up `name` in the process-wide registry.
pub fn global_keymap(name: &str) -> Result<Rc<KeyMap>, RegistryError> {
    WidgetRegistry::global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .instantiate(name)
}
