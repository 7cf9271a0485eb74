#![forbid(unsafe_code)]

//! Contract of the remote model owned by the host runtime.
//!
//! The host (a notebook kernel bridge) owns the model. nbsync only ever holds
//! a [`WeakHandle`], so once the host drops its model every operation becomes
//! a [`RemoteError::TornDown`] instead of keeping the model alive.
//!
//! All methods take `&self`. Execution is single-threaded and cooperative:
//! callbacks run one at a time on the host's event loop, so implementations
//! use interior mutability rather than locks.

use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::RemoteError;

/// Invoked when the authoritative value of a subscribed field changes.
pub type FieldCallback = Rc<dyn Fn()>;

/// Invoked for every structured payload the remote side transmits.
pub type MessageCallback = Rc<dyn Fn(&Value)>;

/// Identifies one registration made through
/// [`RemoteModelHandle::subscribe`] or [`RemoteModelHandle::on_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Abstraction over the remote, authoritative model.
pub trait RemoteModelHandle {
    /// Current remote-held value of `field`.
    fn get(&self, field: &str) -> Result<Value, RemoteError>;

    /// Stage a new value for `field`. Not persisted until [`flush`](Self::flush).
    fn set(&self, field: &str, value: Value) -> Result<(), RemoteError>;

    /// Persist every staged `set` to the authoritative copy.
    fn flush(&self) -> Result<(), RemoteError>;

    /// Call `callback` whenever the authoritative value of `field` changes.
    fn subscribe(&self, field: &str, callback: FieldCallback)
    -> Result<SubscriptionId, RemoteError>;

    /// Remove a registration made by [`subscribe`](Self::subscribe) or
    /// [`on_message`](Self::on_message). Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Transmit an arbitrary payload to the remote side. No reply contract.
    fn send(&self, message: Value) -> Result<(), RemoteError>;

    /// Call `callback` for every payload the remote side transmits.
    fn on_message(&self, callback: MessageCallback) -> Result<SubscriptionId, RemoteError>;
}

/// Non-owning reference to a host-owned model.
#[derive(Clone)]
pub struct WeakHandle {
    inner: Weak<dyn RemoteModelHandle>,
}

impl WeakHandle {
    #[must_use]
    pub fn new(handle: &Rc<dyn RemoteModelHandle>) -> Self {
        Self {
            inner: Rc::downgrade(handle),
        }
    }

    /// Upgrade for the duration of one operation.
    pub fn upgrade(&self) -> Result<Rc<dyn RemoteModelHandle>, RemoteError> {
        self.inner.upgrade().ok_or(RemoteError::TornDown)
    }

    /// Whether the host still owns the model.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Whether both references point at the same model.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
