#![forbid(unsafe_code)]

//! A view paired with its binding and command channel.
//!
//! [`MountedWidget::unmount`] tears both down synchronously, so once it
//! returns no remote notification and no inbound reply can reach the view.
//! Mounting the same view again replaces the binding, which closes the
//! earlier widget's channel as well.

use std::fmt;
use std::rc::Rc;

use nbsync_core::{ChannelConfig, KeyMap, RemoteModelHandle};
use tracing::debug;

use crate::binder::{Binding, SyncBinder};
use crate::channel::CommandChannel;
use crate::error::BindError;
use crate::view::ViewState;

/// Bind `view` to `handle` and open its command channel.
pub fn mount(
    binder: &SyncBinder,
    view: &ViewState,
    handle: &Rc<dyn RemoteModelHandle>,
    keymap: Rc<KeyMap>,
    channel: &ChannelConfig,
) -> Result<MountedWidget, BindError> {
    let binding = binder.attach(view, handle, keymap)?;
    let channel = CommandChannel::open(view, handle, channel.clone())?;
    // A later attach on the same view replaces the binding; the channel
    // must not outlive it.
    binding.on_detach(channel.closer());
    debug!(view = view.id().get(), "widget mounted");
    Ok(MountedWidget {
        view: view.clone(),
        binding,
        channel,
    })
}

pub struct MountedWidget {
    view: ViewState,
    binding: Binding,
    channel: CommandChannel,
}

impl MountedWidget {
    #[must_use]
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    #[must_use]
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    #[must_use]
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Detach the binding and close the channel. Idempotent.
    pub fn unmount(&self) {
        if !self.is_mounted() {
            return;
        }
        self.channel.close();
        self.binding.detach();
        debug!(view = self.view.id().get(), "widget unmounted");
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        !self.binding.is_detached() || !self.channel.is_closed()
    }
}

impl Drop for MountedWidget {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl fmt::Debug for MountedWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedWidget")
            .field("view", &self.view.id())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}
