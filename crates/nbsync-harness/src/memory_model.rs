#![forbid(unsafe_code)]

//! In-memory stand-in for a host-owned remote model.
//!
//! [`MemoryModel`] behaves like a notebook widget model on the front-end
//! side of a kernel bridge:
//!
//! - `set` updates the local copy at once and, by default, fires the field's
//!   change subscribers synchronously (the same echo a real model produces).
//! - `flush` marks every dirty field as persisted.
//! - [`push_remote`](MemoryModel::push_remote) simulates the kernel changing
//!   a field; [`deliver`](MemoryModel::deliver) simulates an inbound custom
//!   message.
//!
//! Every `get`/`set`/`flush`/`send` is recorded as a [`Call`] so tests can
//! assert exact call sequences.

use std::cell::RefCell;
use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use nbsync_core::{FieldCallback, MessageCallback, RemoteError, RemoteModelHandle, SubscriptionId};
use serde_json::Value;

/// One recorded operation against the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(String),
    Set(String, Value),
    Flush,
    Send(Value),
}

#[derive(Default)]
struct State {
    values: IndexMap<String, Value>,
    dirty: IndexSet<String>,
    persisted: IndexMap<String, Value>,
    field_subs: Vec<(SubscriptionId, String, FieldCallback)>,
    message_subs: Vec<(SubscriptionId, MessageCallback)>,
    next_id: u64,
    calls: Vec<Call>,
    failing: HashSet<String>,
    torn_down: bool,
    echo_on_set: bool,
}

impl State {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    fn check(&self, field: &str) -> Result<(), RemoteError> {
        if self.torn_down {
            return Err(RemoteError::TornDown);
        }
        if self.failing.contains(field) {
            return Err(RemoteError::Rejected(format!("field `{field}` is failing")));
        }
        Ok(())
    }

    fn callbacks_for(&self, field: &str) -> Vec<FieldCallback> {
        self.field_subs
            .iter()
            .filter(|(_, f, _)| f == field)
            .map(|(_, _, cb)| cb.clone())
            .collect()
    }
}

/// Scriptable in-memory remote model.
pub struct MemoryModel {
    state: RefCell<State>,
}

impl Default for MemoryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                echo_on_set: true,
                ..State::default()
            }),
        }
    }

    /// Seed a field value without recording a call or notifying anyone.
    #[must_use]
    pub fn with_field(self, field: impl Into<String>, value: Value) -> Self {
        self.state.borrow_mut().values.insert(field.into(), value);
        self
    }

    /// Whether `set` fires the field's change subscribers. Defaults to `true`.
    #[must_use]
    pub fn with_echo(self, echo: bool) -> Self {
        self.state.borrow_mut().echo_on_set = echo;
        self
    }

    /// Simulate the kernel changing `field`. Subscribers fire only when the
    /// value actually changes.
    pub fn push_remote(&self, field: &str, value: Value) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            if state.values.get(field) == Some(&value) {
                return;
            }
            state.values.insert(field.to_string(), value.clone());
            state.persisted.insert(field.to_string(), value);
            state.callbacks_for(field)
        };
        for cb in callbacks {
            cb();
        }
    }

    /// Simulate an inbound custom message from the kernel.
    pub fn deliver(&self, message: Value) {
        let listeners: Vec<MessageCallback> = self
            .state
            .borrow()
            .message_subs
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in listeners {
            cb(&message);
        }
    }

    /// Make every later operation fail with [`RemoteError::TornDown`].
    /// Registered callbacks stay in place so late events can still arrive.
    pub fn tear_down(&self) {
        self.state.borrow_mut().torn_down = true;
    }

    /// Make `get`/`set` on `field` fail with [`RemoteError::Rejected`].
    pub fn fail_field(&self, field: impl Into<String>) {
        self.state.borrow_mut().failing.insert(field.into());
    }

    /// Current model-side value of `field`.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<Value> {
        self.state.borrow().values.get(field).cloned()
    }

    /// Last flushed value of `field`.
    #[must_use]
    pub fn persisted(&self, field: &str) -> Option<Value> {
        self.state.borrow().persisted.get(field).cloned()
    }

    /// Fields set since the last flush.
    #[must_use]
    pub fn dirty_fields(&self) -> Vec<String> {
        self.state.borrow().dirty.iter().cloned().collect()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Recorded `set` calls as `(field, value)` pairs.
    #[must_use]
    pub fn sets(&self) -> Vec<(String, Value)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Set(field, value) => Some((field.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Flush))
            .count()
    }

    /// Payloads passed to `send`, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn subscriber_count(&self, field: &str) -> usize {
        self.state
            .borrow()
            .field_subs
            .iter()
            .filter(|(_, f, _)| f == field)
            .count()
    }

    #[must_use]
    pub fn total_subscriber_count(&self) -> usize {
        self.state.borrow().field_subs.len()
    }

    #[must_use]
    pub fn message_listener_count(&self) -> usize {
        self.state.borrow().message_subs.len()
    }
}

impl RemoteModelHandle for MemoryModel {
    fn get(&self, field: &str) -> Result<Value, RemoteError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Get(field.to_string()));
        state.check(field)?;
        state
            .values
            .get(field)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownField(field.to_string()))
    }

    fn set(&self, field: &str, value: Value) -> Result<(), RemoteError> {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.calls.push(Call::Set(field.to_string(), value.clone()));
            state.check(field)?;
            let changed = state.values.get(field) != Some(&value);
            state.values.insert(field.to_string(), value);
            state.dirty.insert(field.to_string());
            if changed && state.echo_on_set {
                state.callbacks_for(field)
            } else {
                Vec::new()
            }
        };
        for cb in callbacks {
            cb();
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Flush);
        if state.torn_down {
            return Err(RemoteError::TornDown);
        }
        let dirty: Vec<String> = state.dirty.drain(..).collect();
        for field in dirty {
            if let Some(value) = state.values.get(&field).cloned() {
                state.persisted.insert(field, value);
            }
        }
        Ok(())
    }

    fn subscribe(
        &self,
        field: &str,
        callback: FieldCallback,
    ) -> Result<SubscriptionId, RemoteError> {
        let mut state = self.state.borrow_mut();
        if state.torn_down {
            return Err(RemoteError::TornDown);
        }
        let id = state.next_id();
        state.field_subs.push((id, field.to_string(), callback));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.borrow_mut();
        state.field_subs.retain(|(sub, _, _)| *sub != id);
        state.message_subs.retain(|(sub, _)| *sub != id);
    }

    fn send(&self, message: Value) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Send(message));
        if state.torn_down {
            return Err(RemoteError::TornDown);
        }
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) -> Result<SubscriptionId, RemoteError> {
        let mut state = self.state.borrow_mut();
        if state.torn_down {
            return Err(RemoteError::TornDown);
        }
        let id = state.next_id();
        state.message_subs.push((id, callback));
        Ok(id)
    }
}
