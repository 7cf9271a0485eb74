#![forbid(unsafe_code)]

//! Raster layer editor: band selection, stretch, and palette for one map
//! layer.
//!
//! The editor mirrors `bandNames`, `colormaps`, and `visualization` from the
//! remote layer model and observes `layerName`. Band statistics and palette
//! colours are computed remotely; the editor asks for them with commands
//! and applies a reply only while the selection it was computed for is
//! still current.

use std::cell::RefCell;
use std::rc::Rc;

use nbsync_core::{ChannelConfig, KeyMap, KeyMapError, RemoteModelHandle};
use nbsync_runtime::registry::global_keymap;
use nbsync_runtime::{
    BindError, Command, CommandError, ContextMatch, MountedWidget, RegistryError, ReplyRoute,
    SyncBinder, ViewState, mount, register_widget,
};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Registry name of the editor.
pub const WIDGET_NAME: &str = "raster-layer-editor";

/// Stretch mode whose range the user types in; no statistics are fetched.
pub const CUSTOM_STRETCH: &str = "custom";

pub const BAND_STATS_TAG: &str = "band-stats";
pub const PALETTE_TAG: &str = "palette";

/// Remote field ↔ view property table for the editor.
pub fn raster_keymap() -> Result<KeyMap, KeyMapError> {
    KeyMap::builder()
        .mirror("bandNames", "bandNames")
        .mirror("colormaps", "colormaps")
        .mirror("visualization", "visualization")
        .observe("layerName")
        .build()
}

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bind(#[from] BindError),
}

pub struct RasterLayerEditor {
    widget: MountedWidget,
    layer_name: Rc<RefCell<Option<String>>>,
}

impl RasterLayerEditor {
    /// Register the editor kind, bind `view` to the layer model, and install
    /// the reply routes.
    pub fn mount(
        binder: &SyncBinder,
        view: &ViewState,
        handle: &Rc<dyn RemoteModelHandle>,
        channel: &ChannelConfig,
    ) -> Result<Self, EditorError> {
        register_widget(WIDGET_NAME, raster_keymap)?;
        let keymap = global_keymap(WIDGET_NAME)?;
        let widget = mount(binder, view, handle, keymap, channel)?;

        let layer_name = Rc::new(RefCell::new(
            handle
                .get("layerName")
                .ok()
                .and_then(|v| v.as_str().map(str::to_string)),
        ));
        let name = Rc::clone(&layer_name);
        widget.binding().on_observed(move |field, value| {
            if field == "layerName" {
                *name.borrow_mut() = value.as_str().map(str::to_string);
            }
        });

        widget.channel().register_handler(band_stats_route());
        widget.channel().register_handler(palette_route());
        debug!(view = view.id().get(), "raster layer editor mounted");

        Ok(Self { widget, layer_name })
    }

    #[must_use]
    pub fn view(&self) -> &ViewState {
        self.widget.view()
    }

    #[must_use]
    pub fn layer_name(&self) -> Option<String> {
        self.layer_name.borrow().clone()
    }

    /// Bands available on the layer.
    #[must_use]
    pub fn band_names(&self) -> Vec<String> {
        string_list(self.view().get("bandNames"))
    }

    /// Select one band (grayscale) or three (RGB).
    pub fn select_bands(&self, bands: &[&str]) {
        self.view().set("bands", json!(bands));
    }

    /// Switch the stretch mode. Any mode other than [`CUSTOM_STRETCH`]
    /// requests fresh band statistics for the current selection.
    pub fn select_stretch(&self, mode: &str) -> Result<(), CommandError> {
        self.view().set("stretch", json!(mode));
        if mode == CUSTOM_STRETCH {
            return Ok(());
        }
        let command =
            Command::new(BAND_STATS_TAG).with_context(self.view(), &["bands", "stretch"])?;
        self.widget.channel().send(&command)
    }

    /// Enter a custom range.
    pub fn set_range(&self, min: f64, max: f64) {
        let _cycle = self.view().begin_cycle();
        self.view().set("stretch", json!(CUSTOM_STRETCH));
        self.view().set("minValue", json!(min));
        self.view().set("maxValue", json!(max));
    }

    /// Pick a colormap and ask for its colours.
    pub fn request_palette(
        &self,
        colormap: &str,
        classes: Option<u32>,
    ) -> Result<(), CommandError> {
        self.view().set("colormap", json!(colormap));
        let mut command = Command::new(PALETTE_TAG).with_context(self.view(), &["colormap"])?;
        if let Some(classes) = classes {
            command = command.detail("classes", json!(classes));
        }
        self.widget.channel().send(&command)
    }

    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        let min = self.view().get("minValue")?.as_f64()?;
        let max = self.view().get("maxValue")?.as_f64()?;
        Some((min, max))
    }

    #[must_use]
    pub fn palette(&self) -> Vec<String> {
        string_list(self.view().get("paletteColors"))
    }

    /// Write the current selection to `visualization`, which the binder
    /// stages and flushes to the layer model.
    pub fn apply(&self) {
        let view = self.view();
        let mut vis = Map::new();
        for (prop, key) in [("bands", "bands"), ("minValue", "min"), ("maxValue", "max")] {
            if let Some(value) = view.get(prop) {
                vis.insert(key.to_string(), value);
            }
        }
        let palette = self.palette();
        if !palette.is_empty() {
            vis.insert("palette".into(), json!(palette));
        }
        view.set("visualization", Value::Object(vis));
    }

    pub fn unmount(&self) {
        self.widget.unmount();
    }

    #[must_use]
    pub fn widget(&self) -> &MountedWidget {
        &self.widget
    }
}

fn band_stats_route() -> ReplyRoute {
    ReplyRoute::new(BAND_STATS_TAG, "bandstats", |view, reply| {
        if let Some(min) = reply.payload.get("min") {
            view.set("minValue", min.clone());
        }
        if let Some(max) = reply.payload.get("max") {
            view.set("maxValue", max.clone());
        }
    })
    .fresh_when_matches(ContextMatch::new().same("stretch").optional("bands"))
}

fn palette_route() -> ReplyRoute {
    ReplyRoute::new(PALETTE_TAG, "palette", |view, reply| {
        if let Some(colors) = reply.payload.get("colors") {
            view.set("paletteColors", colors.clone());
        }
    })
    .fresh_when_matches(ContextMatch::new().same("colormap"))
}

fn string_list(value: Option<Value>) -> Vec<String> {
    value
        .as_ref()
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
