#![forbid(unsafe_code)]

//! End-to-end tests for the raster layer editor.
//!
//! The host side is a [`MemoryModel`] standing in for the layer model; band
//! statistics and palette replies are delivered through its message
//! listener the way a kernel would send them.

use nbsync_core::ChannelConfig;
use nbsync_harness::{HostModel, MemoryModel, with_captured_tracing};
use nbsync_runtime::{SyncBinder, ViewState};
use nbsync_widgets::RasterLayerEditor;
use serde_json::json;
use tracing::Level;

fn layer_host() -> HostModel {
    HostModel::new(
        MemoryModel::new()
            .with_field("bandNames", json!(["B1", "B2", "B3"]))
            .with_field("colormaps", json!(["viridis", "terrain"]))
            .with_field("visualization", json!({}))
            .with_field("layerName", json!("Landsat 8")),
    )
}

fn mount_editor(host: &HostModel, view: &ViewState) -> RasterLayerEditor {
    let binder = SyncBinder::default();
    RasterLayerEditor::mount(&binder, view, &host.handle, &ChannelConfig::default()).unwrap()
}

#[test]
fn stretch_round_trip_applies_fresh_and_drops_stale() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    assert_eq!(view.get("bandNames"), Some(json!(["B1", "B2", "B3"])));
    assert_eq!(editor.band_names(), vec!["B1", "B2", "B3"]);

    editor.select_bands(&["B1"]);
    editor.select_stretch("sigma-1").unwrap();
    assert_eq!(
        host.model.sent(),
        vec![json!({
            "type": "calculate",
            "id": "band-stats",
            "detail": {"bands": ["B1"], "stretch": "sigma-1"}
        })]
    );

    host.model
        .deliver(json!({"bandstats": {"stretch": "sigma-1", "min": 0, "max": 255}}));
    assert_eq!(view.get("minValue"), Some(json!(0)));
    assert_eq!(view.get("maxValue"), Some(json!(255)));

    editor.select_stretch("custom").unwrap();
    assert_eq!(host.model.sent().len(), 1);

    let ((), capture) = with_captured_tracing(|| {
        host.model
            .deliver(json!({"bandstats": {"stretch": "sigma-2", "min": 10, "max": 200}}));
    });
    assert_eq!(view.get("minValue"), Some(json!(0)));
    assert_eq!(view.get("maxValue"), Some(json!(255)));
    let dropped = capture.events_with_message("stale reply dropped");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].level, Level::DEBUG);
}

#[test]
fn reply_for_other_bands_is_dropped() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    editor.select_bands(&["B1"]);
    editor.select_stretch("sigma-2").unwrap();
    editor.select_bands(&["B3"]);
    editor.select_stretch("sigma-2").unwrap();

    host.model.deliver(json!({
        "bandstats": {"stretch": "sigma-2", "bands": ["B1"], "min": 1, "max": 2}
    }));
    assert_eq!(editor.range(), None);

    host.model.deliver(json!({
        "bandstats": {"stretch": "sigma-2", "bands": ["B3"], "min": 3, "max": 4}
    }));
    assert_eq!(editor.range(), Some((3.0, 4.0)));
}

#[test]
fn stretch_without_bands_is_a_missing_context_error() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    let err = editor.select_stretch("sigma-1").unwrap_err();
    assert!(err.to_string().contains("bands"));
    assert!(host.model.sent().is_empty());
}

#[test]
fn palette_round_trip() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    editor.request_palette("viridis", Some(3)).unwrap();
    assert_eq!(
        host.model.sent()[0],
        json!({
            "type": "calculate",
            "id": "palette",
            "detail": {"colormap": "viridis", "classes": 3}
        })
    );

    editor.request_palette("terrain", None).unwrap();
    host.model.deliver(json!({
        "palette": {"colormap": "viridis", "colors": ["#440154", "#21918c", "#fde725"]}
    }));
    assert!(editor.palette().is_empty());

    host.model.deliver(json!({
        "palette": {"colormap": "terrain", "colors": ["#333399", "#ffffff"]}
    }));
    assert_eq!(editor.palette(), vec!["#333399", "#ffffff"]);
}

#[test]
fn apply_writes_visualization_with_one_flush() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    editor.select_bands(&["B3", "B2", "B1"]);
    editor.set_range(0.0, 0.3);
    editor.apply();

    assert_eq!(
        host.model.sets(),
        vec![(
            "visualization".to_string(),
            json!({"bands": ["B3", "B2", "B1"], "min": 0.0, "max": 0.3})
        )]
    );
    assert_eq!(host.model.flush_count(), 1);
    assert_eq!(
        host.model.persisted("visualization"),
        view.get("visualization")
    );
}

#[test]
fn layer_name_is_observed_not_mirrored() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);

    assert_eq!(editor.layer_name().as_deref(), Some("Landsat 8"));
    host.model.push_remote("layerName", json!("Sentinel-2"));
    assert_eq!(editor.layer_name().as_deref(), Some("Sentinel-2"));
    assert_eq!(view.get("layerName"), None);
}

#[test]
fn remote_colormaps_update_the_editor() {
    let host = layer_host();
    let view = ViewState::new();
    let _editor = mount_editor(&host, &view);

    host.model
        .push_remote("colormaps", json!(["viridis", "terrain", "magma"]));
    assert_eq!(view.get("colormaps"), Some(json!(["viridis", "terrain", "magma"])));
    assert!(host.model.sets().is_empty());
}

#[test]
fn unmounted_editor_is_quiescent() {
    let host = layer_host();
    let view = ViewState::new();
    let editor = mount_editor(&host, &view);
    editor.select_bands(&["B1"]);
    editor.select_stretch("sigma-1").unwrap();

    editor.unmount();

    host.model
        .deliver(json!({"bandstats": {"stretch": "sigma-1", "min": 0, "max": 255}}));
    host.model.push_remote("bandNames", json!(["B9"]));
    assert_eq!(editor.range(), None);
    assert_eq!(view.get("bandNames"), Some(json!(["B1", "B2", "B3"])));
    assert!(editor.select_stretch("sigma-2").is_err());
    assert_eq!(host.model.total_subscriber_count(), 0);
}

#[test]
fn remounting_a_view_retires_the_earlier_editor() {
    let host = layer_host();
    let view = ViewState::new();
    let first = mount_editor(&host, &view);
    let second = mount_editor(&host, &view);

    assert!(!first.widget().is_mounted());
    assert!(first.widget().channel().is_closed());
    assert!(second.widget().is_mounted());
    assert_eq!(host.model.message_listener_count(), 1);

    second.select_bands(&["B1"]);
    second.select_stretch("sigma-1").unwrap();
    assert!(first.select_stretch("sigma-1").is_err());
    host.model
        .deliver(json!({"bandstats": {"stretch": "sigma-1", "min": 0, "max": 255}}));
    assert_eq!(second.widget().channel().stats().applied, 1);
    assert_eq!(first.widget().channel().stats().applied, 0);
}
