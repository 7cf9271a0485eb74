#![forbid(unsafe_code)]

//! Asynchronous command/reply protocol over a remote model's custom-message
//! channel.
//!
//! Commands are fire-and-forget: [`CommandChannel::send`] emits
//! `{type, id, detail}` and returns at once. There is no request id, so a
//! reply is correlated by *content*:
//!
//! 1. **Routing.** Each [`ReplyRoute`] names the top-level key its replies
//!    carry (e.g. `"bandstats"`). Routes are tried in registration order and
//!    the first whose key is present wins. Re-registering a tag replaces its
//!    route but keeps its place in that order.
//! 2. **Freshness.** The route's predicate compares context embedded in the
//!    reply against the view's *current* state. A reply that no longer
//!    matches is dropped, which is the protocol's substitute for
//!    cancellation.
//!
//! Request builders must therefore copy the UI parameters the reply will be
//! checked against into the command; [`Command::with_context`] does this
//! and fails if a property is missing.
//!
//! # Example
//!
//! ```
//! use nbsync_runtime::channel::{ContextMatch, ReplyRoute};
//!
//! let route = ReplyRoute::new("band-stats", "bandstats", |view, reply| {
//!     let _cycle = view.begin_cycle();
//!     if let Some(min) = reply.payload.get("min") {
//!         view.set("minValue", min.clone());
//!     }
//! })
//! .fresh_when_matches(ContextMatch::new().same("stretch"));
//! assert_eq!(route.tag(), "band-stats");
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use nbsync_core::{
    ChannelConfig, CommandEnvelope, RemoteModelHandle, SubscriptionId, WeakHandle, reply_section,
};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{BindError, CommandError};
use crate::view::{ViewState, WeakView};

/// Decides whether a reply still applies to the view's current state.
pub type FreshnessFn = Rc<dyn Fn(&ViewState, &Reply<'_>) -> bool>;

/// Applies a fresh reply to the view.
pub type ApplyFn = Rc<dyn Fn(&ViewState, &Reply<'_>)>;

/// An inbound reply matched to a route.
#[derive(Debug, Clone, Copy)]
pub struct Reply<'a> {
    /// Tag of the route that matched.
    pub tag: &'a str,
    /// The full inbound message.
    pub message: &'a Value,
    /// The value under the route's reply key.
    pub payload: &'a Value,
}

/// An outgoing command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    tag: String,
    detail: Map<String, Value>,
}

impl Command {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            detail: Map::new(),
        }
    }

    /// Copy the current value of each view property into the detail under
    /// the same name.
    pub fn with_context(mut self, view: &ViewState, props: &[&str]) -> Result<Self, CommandError> {
        for prop in props {
            self = self.with_context_as(view, prop, prop)?;
        }
        Ok(self)
    }

    /// Copy the current value of `prop` into the detail under `key`.
    pub fn with_context_as(
        mut self,
        view: &ViewState,
        prop: &str,
        key: &str,
    ) -> Result<Self, CommandError> {
        match view.get(prop) {
            Some(value) if !value.is_null() => {
                self.detail.insert(key.to_string(), value);
                Ok(self)
            }
            _ => Err(CommandError::MissingContext {
                tag: self.tag,
                property: prop.to_string(),
            }),
        }
    }

    /// Add a non-context detail field.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.detail.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The detail object, or `None` when empty.
    #[must_use]
    pub fn detail_value(&self) -> Option<Value> {
        if self.detail.is_empty() {
            None
        } else {
            Some(Value::Object(self.detail.clone()))
        }
    }

    /// Wrap into the wire envelope using `command_type` as the class.
    #[must_use]
    pub fn envelope(&self, command_type: &str) -> CommandEnvelope {
        CommandEnvelope::new(command_type, self.tag.clone(), self.detail_value())
    }
}

/// Freshness rule: every listed reply field must equal the view property it
/// is paired with.
///
/// A required field missing from the reply, or a view missing a paired
/// property, makes the reply stale. An optional field is compared only when
/// the reply carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextMatch {
    pairs: Vec<ContextPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ContextPair {
    reply_field: String,
    view_prop: String,
    required: bool,
}

impl ContextPair {
    fn holds(&self, view: &ViewState, payload: &Value) -> bool {
        match payload.get(&self.reply_field) {
            Some(replied) => view.with(&self.view_prop, |current| current == Some(replied)),
            None => !self.required,
        }
    }
}

impl ContextMatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply field `reply_field` must be present and equal view property
    /// `view_prop`.
    #[must_use]
    pub fn field(mut self, reply_field: impl Into<String>, view_prop: impl Into<String>) -> Self {
        self.pairs.push(ContextPair {
            reply_field: reply_field.into(),
            view_prop: view_prop.into(),
            required: true,
        });
        self
    }

    /// Reply field and view property share a name.
    #[must_use]
    pub fn same(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.field(name.clone(), name)
    }

    /// Like [`same`](Self::same), but a reply without the field passes.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.pairs.push(ContextPair {
            reply_field: name.clone(),
            view_prop: name,
            required: false,
        });
        self
    }

    #[must_use]
    pub fn matches(&self, view: &ViewState, payload: &Value) -> bool {
        self.pairs.iter().all(|pair| pair.holds(view, payload))
    }

    /// First reply field that fails, for diagnostics.
    #[must_use]
    pub fn first_mismatch(&self, view: &ViewState, payload: &Value) -> Option<&str> {
        self.pairs
            .iter()
            .find(|pair| !pair.holds(view, payload))
            .map(|pair| pair.reply_field.as_str())
    }
}

/// How replies carrying one tag are recognised, validated, and applied.
#[derive(Clone)]
pub struct ReplyRoute {
    tag: String,
    reply_key: String,
    freshness: Option<FreshnessFn>,
    apply: ApplyFn,
}

impl ReplyRoute {
    /// Route replies carrying top-level `reply_key` to `apply`.
    pub fn new(
        tag: impl Into<String>,
        reply_key: impl Into<String>,
        apply: impl Fn(&ViewState, &Reply<'_>) + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            reply_key: reply_key.into(),
            freshness: None,
            apply: Rc::new(apply),
        }
    }

    /// Only apply replies for which `predicate(current view, reply)` holds.
    #[must_use]
    pub fn fresh_when(
        mut self,
        predicate: impl Fn(&ViewState, &Reply<'_>) -> bool + 'static,
    ) -> Self {
        self.freshness = Some(Rc::new(predicate));
        self
    }

    /// Only apply replies whose payload context matches the view.
    #[must_use]
    pub fn fresh_when_matches(self, rule: ContextMatch) -> Self {
        self.fresh_when(move |view, reply| rule.matches(view, reply.payload))
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn reply_key(&self) -> &str {
        &self.reply_key
    }

    /// Evaluate the freshness predicate. Routes without one accept all.
    #[must_use]
    pub fn is_fresh(&self, view: &ViewState, reply: &Reply<'_>) -> bool {
        self.freshness
            .as_ref()
            .is_none_or(|predicate| predicate(view, reply))
    }
}

impl fmt::Debug for ReplyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyRoute")
            .field("tag", &self.tag)
            .field("reply_key", &self.reply_key)
            .field("has_freshness", &self.freshness.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The reply was fresh and applied.
    Applied(String),
    /// The reply matched a route but its context no longer matches.
    Stale(String),
    /// No registered route recognises the message.
    Unrouted,
    /// The channel is closed or its view is gone.
    Closed,
}

/// Counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub applied: u64,
    pub stale: u64,
    pub unrouted: u64,
}

struct ChannelInner {
    view: WeakView,
    handle: WeakHandle,
    config: ChannelConfig,
    routes: RefCell<Vec<ReplyRoute>>,
    listener: Cell<Option<SubscriptionId>>,
    closed: Cell<bool>,
    stats: Cell<ChannelStats>,
}

impl ChannelInner {
    fn bump(&self, f: impl FnOnce(&mut ChannelStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn dispatch(&self, message: &Value) -> DispatchOutcome {
        if self.closed.get() {
            return DispatchOutcome::Closed;
        }
        let Some(view) = self.view.upgrade() else {
            return DispatchOutcome::Closed;
        };

        // Clone out so a handler may re-register routes.
        let route = self
            .routes
            .borrow()
            .iter()
            .find(|route| reply_section(message, &route.reply_key).is_some())
            .cloned();
        let Some(route) = route else {
            trace!("inbound message matches no route");
            self.bump(|s| s.unrouted += 1);
            return DispatchOutcome::Unrouted;
        };
        let Some(payload) = reply_section(message, &route.reply_key) else {
            return DispatchOutcome::Unrouted;
        };

        let reply = Reply {
            tag: &route.tag,
            message,
            payload,
        };
        if !route.is_fresh(&view, &reply) {
            if self.config.trace_stale {
                debug!(
                    tag = route.tag.as_str(),
                    reason = "context no longer matches the view",
                    "stale reply dropped"
                );
            }
            self.bump(|s| s.stale += 1);
            return DispatchOutcome::Stale(route.tag);
        }

        {
            let _cycle = view.begin_cycle();
            (route.apply)(&view, &reply);
        }
        self.bump(|s| s.applied += 1);
        trace!(tag = route.tag.as_str(), "reply applied");
        DispatchOutcome::Applied(route.tag)
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(id) = self.listener.take()
            && let Ok(handle) = self.handle.upgrade()
        {
            handle.unsubscribe(id);
        }
        self.routes.borrow_mut().clear();
        debug!("command channel closed");
    }
}

/// Command/reply endpoint for one view.
pub struct CommandChannel {
    inner: Rc<ChannelInner>,
}

impl CommandChannel {
    /// Open a channel for `view` and start listening for inbound messages.
    pub fn open(
        view: &ViewState,
        handle: &Rc<dyn RemoteModelHandle>,
        config: ChannelConfig,
    ) -> Result<Self, BindError> {
        let inner = Rc::new(ChannelInner {
            view: view.downgrade(),
            handle: WeakHandle::new(handle),
            config,
            routes: RefCell::new(Vec::new()),
            listener: Cell::new(None),
            closed: Cell::new(false),
            stats: Cell::new(ChannelStats::default()),
        });

        let weak = Rc::downgrade(&inner);
        let id = handle.on_message(Rc::new(move |message: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(message);
            }
        }))?;
        inner.listener.set(Some(id));

        Ok(Self { inner })
    }

    /// Register `route`. The last registration for a tag wins.
    pub fn register_handler(&self, route: ReplyRoute) {
        if self.inner.closed.get() {
            return;
        }
        let mut routes = self.inner.routes.borrow_mut();
        if let Some(existing) = routes.iter_mut().find(|r| r.tag == route.tag) {
            *existing = route;
        } else {
            routes.push(route);
        }
    }

    /// Remove the route for `tag`. Returns whether one existed.
    pub fn unregister_handler(&self, tag: &str) -> bool {
        let mut routes = self.inner.routes.borrow_mut();
        let before = routes.len();
        routes.retain(|r| r.tag != tag);
        routes.len() != before
    }

    /// Tags in dispatch priority order.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.inner
            .routes
            .borrow()
            .iter()
            .map(|r| r.tag.clone())
            .collect()
    }

    /// Send `command`. Returns once the payload is handed to the transport.
    pub fn send(&self, command: &Command) -> Result<(), CommandError> {
        if self.inner.closed.get() {
            return Err(CommandError::Closed);
        }
        let handle = self.inner.handle.upgrade()?;
        let envelope = command.envelope(&self.inner.config.command_type);
        if let Err(error) = handle.send(envelope.to_value()) {
            warn!(tag = command.tag(), %error, "command not sent");
            return Err(error.into());
        }
        self.inner.bump(|s| s.sent += 1);
        debug!(tag = command.tag(), "command sent");
        Ok(())
    }

    /// Send a command built from a tag and an optional raw detail payload.
    pub fn send_raw(&self, tag: &str, detail: Option<Value>) -> Result<(), CommandError> {
        let command = match detail {
            Some(Value::Object(map)) => Command {
                tag: tag.to_string(),
                detail: map,
            },
            Some(other) => Command::new(tag).detail("value", other),
            None => Command::new(tag),
        };
        self.send(&command)
    }

    /// Handle one inbound message. Normally driven by the remote model's
    /// message callback.
    pub fn dispatch(&self, message: &Value) -> DispatchOutcome {
        self.inner.dispatch(message)
    }

    /// Stop listening and drop every route. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// A closure that closes this channel if it is still around.
    pub(crate) fn closer(&self) -> impl FnOnce() + 'static {
        let weak = Rc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.close();
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.inner.stats.get()
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("tags", &self.tags())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stretch_view(stretch: &str) -> ViewState {
        ViewState::with_props([("stretch", json!(stretch)), ("bands", json!(["B1"]))])
    }

    #[test]
    fn command_captures_context() {
        let view = stretch_view("sigma-1");
        let command = Command::new("band-stats")
            .with_context(&view, &["bands", "stretch"])
            .unwrap();
        assert_eq!(
            command.envelope("calculate").to_value(),
            json!({
                "type": "calculate",
                "id": "band-stats",
                "detail": {"bands": ["B1"], "stretch": "sigma-1"}
            })
        );
    }

    #[test]
    fn missing_context_is_an_error() {
        let view = ViewState::new();
        let err = Command::new("band-stats")
            .with_context(&view, &["stretch"])
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::MissingContext {
                tag: "band-stats".into(),
                property: "stretch".into()
            }
        );
    }

    #[test]
    fn context_as_renames_key() {
        let view = ViewState::with_props([("selectedPalette", json!("viridis"))]);
        let command = Command::new("palette")
            .with_context_as(&view, "selectedPalette", "colormap")
            .unwrap()
            .detail("classes", json!(5));
        assert_eq!(
            command.detail_value(),
            Some(json!({"colormap": "viridis", "classes": 5}))
        );
    }

    #[test]
    fn context_match_requires_every_pair() {
        let view = stretch_view("sigma-1");
        let rule = ContextMatch::new().same("stretch").same("bands");
        assert!(rule.matches(&view, &json!({"stretch": "sigma-1", "bands": ["B1"]})));
        assert!(!rule.matches(&view, &json!({"stretch": "sigma-1", "bands": ["B2"]})));
        assert!(!rule.matches(&view, &json!({"stretch": "sigma-1"})));
        assert_eq!(
            rule.first_mismatch(&view, &json!({"stretch": "sigma-1"})),
            Some("bands")
        );
        assert_eq!(
            rule.first_mismatch(&view, &json!({"stretch": "sigma-1", "bands": ["B1"]})),
            None
        );
    }

    #[test]
    fn optional_context_is_checked_only_when_present() {
        let view = stretch_view("sigma-1");
        let rule = ContextMatch::new().same("stretch").optional("bands");
        assert!(rule.matches(&view, &json!({"stretch": "sigma-1"})));
        assert!(rule.matches(&view, &json!({"stretch": "sigma-1", "bands": ["B1"]})));
        assert!(!rule.matches(&view, &json!({"stretch": "sigma-1", "bands": ["B3"]})));
        assert!(!rule.matches(&view, &json!({"bands": ["B1"]})));
    }

    #[test]
    fn context_match_with_renamed_property() {
        let view = ViewState::with_props([("stretchMode", json!("custom"))]);
        let rule = ContextMatch::new().field("stretch", "stretchMode");
        assert!(rule.matches(&view, &json!({"stretch": "custom"})));
    }

    #[test]
    fn route_without_freshness_accepts_all() {
        let view = ViewState::new();
        let route = ReplyRoute::new("palette", "palette", |_, _| {});
        let message = json!({"palette": {}});
        let reply = Reply {
            tag: "palette",
            message: &message,
            payload: &message["palette"],
        };
        assert!(route.is_fresh(&view, &reply));
    }
}
