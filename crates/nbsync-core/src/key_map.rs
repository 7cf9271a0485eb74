#![forbid(unsafe_code)]

//! Bidirectional field-name table between a remote model and a local view.
//!
//! Every widget declares one [`KeyMap`]. An entry either mirrors a remote
//! field into a local property, or only *observes* the remote field (the
//! local target is `None`) so that a change can trigger a side effect such as
//! a structural refresh.
//!
//! # Invariants
//!
//! 1. Remote field names are unique.
//! 2. Non-null local property names are unique, so the inverse is well defined.
//! 3. The inverse is computed once at build time and never changes.
//!
//! # Example
//!
//! ```
//! use nbsync_core::key_map::KeyMap;
//!
//! let map = KeyMap::builder()
//!     .mirror("bandNames", "bandNames")
//!     .mirror("vis_params", "visualization")
//!     .observe("layerName")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(map.forward("vis_params"), Some("visualization"));
//! assert_eq!(map.remote_for("visualization"), Some("vis_params"));
//! assert_eq!(map.forward("layerName"), None);
//! assert!(map.is_observed("layerName"));
//! ```

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::error::KeyMapError;

/// An ordered, invertible mapping from remote field names to local
/// property names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    forward: IndexMap<String, Option<String>>,
    inverse: IndexMap<String, String>,
}

impl KeyMap {
    /// Start declaring a key map.
    #[must_use]
    pub fn builder() -> KeyMapBuilder {
        KeyMapBuilder::default()
    }

    /// Build from `(remote, local)` pairs in declaration order.
    pub fn from_pairs<I, R, L>(pairs: I) -> Result<Self, KeyMapError>
    where
        I: IntoIterator<Item = (R, Option<L>)>,
        R: Into<String>,
        L: Into<String>,
    {
        let mut forward: IndexMap<String, Option<String>> = IndexMap::new();
        let mut inverse: IndexMap<String, String> = IndexMap::new();

        for (remote, local) in pairs {
            let remote = remote.into();
            let local = local.map(Into::into);
            if remote.is_empty() || local.as_deref() == Some("") {
                return Err(KeyMapError::EmptyName { remote });
            }

            if forward.contains_key(&remote) {
                return Err(KeyMapError::DuplicateRemote { field: remote });
            }

            if let Some(local) = &local {
                match inverse.entry(local.clone()) {
                    Entry::Occupied(existing) => {
                        return Err(KeyMapError::DuplicateLocal {
                            local: local.clone(),
                            first: existing.get().clone(),
                            second: remote,
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(remote.clone());
                    }
                }
            }

            forward.insert(remote, local);
        }

        Ok(Self { forward, inverse })
    }

    /// Local property mirrored from `remote`. `None` for unknown fields and
    /// for observe-only fields.
    #[must_use]
    pub fn forward(&self, remote: &str) -> Option<&str> {
        self.forward.get(remote).and_then(|local| local.as_deref())
    }

    /// Remote field that backs `local`, if any.
    #[must_use]
    pub fn remote_for(&self, local: &str) -> Option<&str> {
        self.inverse.get(local).map(String::as_str)
    }

    /// The cached local → remote table.
    #[must_use]
    pub fn inverse(&self) -> &IndexMap<String, String> {
        &self.inverse
    }

    /// Whether `remote` is declared as observe-only.
    #[must_use]
    pub fn is_observed(&self, remote: &str) -> bool {
        matches!(self.forward.get(remote), Some(None))
    }

    /// Whether `remote` is declared at all.
    #[must_use]
    pub fn contains_remote(&self, remote: &str) -> bool {
        self.forward.contains_key(remote)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.forward
            .iter()
            .map(|(remote, local)| (remote.as_str(), local.as_deref()))
    }

    /// Mirrored `(remote, local)` pairs in declaration order.
    pub fn mirrored(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .filter_map(|(remote, local)| local.as_deref().map(|l| (remote.as_str(), l)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Fluent declaration of a [`KeyMap`].
#[derive(Debug, Default, Clone)]
pub struct KeyMapBuilder {
    pairs: Vec<(String, Option<String>)>,
}

impl KeyMapBuilder {
    /// Mirror `remote` into the local property `local`.
    #[must_use]
    pub fn mirror(mut self, remote: impl Into<String>, local: impl Into<String>) -> Self {
        self.pairs.push((remote.into(), Some(local.into())));
        self
    }

    /// Observe `remote` without mirroring it locally.
    #[must_use]
    pub fn observe(mut self, remote: impl Into<String>) -> Self {
        self.pairs.push((remote.into(), None));
        self
    }

    /// Validate and freeze the map.
    pub fn build(self) -> Result<KeyMap, KeyMapError> {
        KeyMap::from_pairs(self.pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_inverse_agree() {
        let map = KeyMap::builder()
            .mirror("bandNames", "bandNames")
            .mirror("colormaps", "colormaps")
            .build()
            .unwrap();
        for (remote, local) in map.mirrored() {
            assert_eq!(map.forward(remote), Some(local));
            assert_eq!(map.remote_for(local), Some(remote));
        }
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn duplicate_local_rejected() {
        let err = KeyMap::builder()
            .mirror("a", "x")
            .mirror("b", "x")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            KeyMapError::DuplicateLocal {
                local: "x".into(),
                first: "a".into(),
                second: "b".into(),
            }
        );
    }

    #[test]
    fn duplicate_remote_rejected() {
        let err = KeyMap::builder()
            .mirror("a", "x")
            .observe("a")
            .build()
            .unwrap_err();
        assert_eq!(err, KeyMapError::DuplicateRemote { field: "a".into() });

        let err = KeyMap::builder()
            .observe("a")
            .mirror("a", "y")
            .build()
            .unwrap_err();
        assert_eq!(err, KeyMapError::DuplicateRemote { field: "a".into() });
    }

    #[test]
    fn several_observe_only_fields_allowed() {
        let map = KeyMap::builder()
            .observe("layers")
            .observe("zoom")
            .build()
            .unwrap();
        assert!(map.is_observed("layers"));
        assert!(map.is_observed("zoom"));
        assert!(map.inverse().is_empty());
    }

    #[test]
    fn empty_names_rejected() {
        assert!(matches!(
            KeyMap::builder().mirror("", "x").build(),
            Err(KeyMapError::EmptyName { .. })
        ));
        assert!(matches!(
            KeyMap::builder().mirror("a", "").build(),
            Err(KeyMapError::EmptyName { .. })
        ));
    }

    #[test]
    fn entries_keep_declaration_order() {
        let map = KeyMap::builder()
            .mirror("z", "zz")
            .observe("m")
            .mirror("a", "aa")
            .build()
            .unwrap();
        let remotes: Vec<_> = map.entries().map(|(r, _)| r).collect();
        assert_eq!(remotes, ["z", "m", "a"]);
    }

    #[test]
    fn unknown_field_is_neither_mirrored_nor_observed() {
        let map = KeyMap::builder().mirror("a", "b").build().unwrap();
        assert_eq!(map.forward("nope"), None);
        assert!(!map.is_observed("nope"));
        assert!(!map.contains_remote("nope"));
    }
}
