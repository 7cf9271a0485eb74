#![forbid(unsafe_code)]

//! Inspection report → tree source.
//!
//! A map click produces an [`InspectionReport`]: the clicked point, the
//! pixel values sampled from each visible raster layer, and the properties
//! of the vector feature found under the cursor. [`build_tree`] turns it
//! into a tree source for [`TreeModel`](crate::tree::TreeModel) with up to
//! three roots:
//!
//! - `Point (lon, lat) at Nm/px` with coordinate, zoom, and scale leaves
//! - `Pixels`, one branch per layer, band values sorted by name
//! - `Objects`, one nested property tree per layer
//!
//! `Pixels` and `Objects` are omitted when they would be empty.

use std::fmt::Write as _;

use nbsync_core::InspectorConfig;
use nbsync_runtime::ViewState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Ground resolution at the equator for zoom 0, in metres per pixel.
const EQUATOR_RESOLUTION: f64 = 156_543.04;

/// Result of inspecting one map location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectionReport {
    pub lat: f64,
    pub lon: f64,
    pub zoom: f64,
    pub pixels: Vec<PixelSample>,
    pub objects: Vec<ObjectSample>,
}

/// Band values sampled from one raster layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PixelSample {
    pub layer: String,
    /// Kind of the sampled object, e.g. `Image`.
    pub object_type: String,
    pub values: Map<String, Value>,
}

/// Properties of the feature found under the cursor in one vector layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectSample {
    pub layer: String,
    pub properties: Value,
}

/// Approximate ground resolution in metres per pixel (Web Mercator).
#[must_use]
pub fn pixel_scale(lat: f64, zoom: f64) -> f64 {
    EQUATOR_RESOLUTION * lat.to_radians().cos() / 2_f64.powf(zoom)
}

/// Build the tree source for `report`.
#[must_use]
pub fn build_tree(report: &InspectionReport, config: &InspectorConfig) -> Value {
    let mut roots = vec![point_root(report, config)];

    let pixels: Vec<Value> = report
        .pixels
        .iter()
        .filter(|sample| !sample.values.is_empty())
        .map(|sample| pixel_layer(sample, config))
        .collect();
    if !pixels.is_empty() {
        roots.push(node("Pixels", true, pixels));
    }

    let objects: Vec<Value> = report
        .objects
        .iter()
        .filter(|sample| !sample.properties.is_null())
        .map(|sample| object_layer(sample, config))
        .collect();
    if !objects.is_empty() {
        roots.push(node("Objects", true, objects));
    }

    Value::Array(roots)
}

fn point_root(report: &InspectionReport, config: &InspectorConfig) -> Value {
    let scale = pixel_scale(report.lat, report.zoom);
    let digits = config.effective_decimals() as usize;
    let label = format!(
        "Point ({:.digits$}, {:.digits$}) at {}m/px",
        report.lon,
        report.lat,
        scale.trunc() as i64
    );
    node(
        label,
        config.expand_point,
        vec![
            leaf(format!("Longitude: {}", format_float(report.lon))),
            leaf(format!("Latitude: {}", format_float(report.lat))),
            leaf(format!("Zoom Level: {}", format_float(report.zoom))),
            leaf(format!("Scale (approx. m/px): {}", format_float(scale))),
        ],
    )
}

fn pixel_layer(sample: &PixelSample, config: &InspectorConfig) -> Value {
    let count = sample.values.len();
    let noun = if count == 1 { "band" } else { "bands" };
    let label = format!("{}: {} ({count} {noun})", sample.layer, sample.object_type);

    let mut keys: Vec<&String> = sample.values.keys().collect();
    keys.sort();
    let children = keys
        .into_iter()
        .map(|key| {
            let value = &sample.values[key.as_str()];
            leaf(format!("{key}: {}", format_value(value, config.effective_decimals())))
        })
        .collect();
    node(label, config.expand_pixels, children)
}

fn object_layer(sample: &ObjectSample, config: &InspectorConfig) -> Value {
    node(
        sample.layer.as_str(),
        config.expand_objects,
        property_nodes(&sample.properties, config.effective_decimals()),
    )
}

/// Nested tree for an arbitrary property value.
fn property_nodes(value: &Value, decimals: u32) -> Vec<Value> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| property_node(key, child, decimals))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, child)| property_node(&i.to_string(), child, decimals))
            .collect(),
        scalar => vec![leaf(format_value(scalar, decimals))],
    }
}

fn property_node(key: &str, value: &Value, decimals: u32) -> Value {
    match value {
        Value::Object(map) => node(
            format!("{key}: Object ({} properties)", map.len()),
            false,
            property_nodes(value, decimals),
        ),
        Value::Array(items) => node(
            format!("{key}: List ({} elements)", items.len()),
            false,
            property_nodes(value, decimals),
        ),
        scalar => leaf(format!("{key}: {}", format_value(scalar, decimals))),
    }
}

fn node(label: impl Into<String>, expanded: bool, children: Vec<Value>) -> Value {
    json!({"label": label.into(), "expanded": expanded, "children": children})
}

fn leaf(label: String) -> Value {
    Value::String(label)
}

/// Render a scalar for display, rounding floats to `decimals`.
fn format_value(value: &Value, decimals: u32) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| format_float(round_to(f, decimals)))
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals.min(InspectorConfig::MAX_DECIMALS) as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// Shortest round-trip rendering, keeping one decimal for whole numbers.
fn format_float(value: f64) -> String {
    let mut out = String::new();
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        let _ = write!(out, "{value:.1}");
    } else {
        let _ = write!(out, "{value}");
    }
    out
}

/// Publishes inspection trees into a view property.
#[derive(Debug)]
pub struct Inspector {
    view: ViewState,
    prop: String,
    config: InspectorConfig,
}

impl Inspector {
    #[must_use]
    pub fn new(view: &ViewState, prop: impl Into<String>, config: InspectorConfig) -> Self {
        Self {
            view: view.clone(),
            prop: prop.into(),
            config,
        }
    }

    /// Replace the published tree with one built from `report`.
    pub fn show(&self, report: &InspectionReport) {
        self.view.set(&self.prop, build_tree(report, &self.config));
    }

    /// Remove the published tree.
    pub fn clear(&self) {
        self.view.set(&self.prop, Value::Array(Vec::new()));
    }

    #[must_use]
    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: InspectorConfig) {
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> InspectionReport {
        InspectionReport {
            lat: 48.8566,
            lon: 2.3522,
            zoom: 11.0,
            ..InspectionReport::default()
        }
    }

    fn sample(layer: &str, values: Value) -> PixelSample {
        PixelSample {
            layer: layer.into(),
            object_type: "Image".into(),
            values: values.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn point_only_when_nothing_sampled() {
        let tree = build_tree(&paris(), &InspectorConfig::default());
        let roots = tree.as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["label"], json!("Point (2.35, 48.86) at 50m/px"));
        assert_eq!(roots[0]["expanded"], json!(false));
        assert_eq!(
            roots[0]["children"],
            json!([
                "Longitude: 2.3522",
                "Latitude: 48.8566",
                "Zoom Level: 11.0",
                format!("Scale (approx. m/px): {}", pixel_scale(48.8566, 11.0)),
            ])
        );
    }

    #[test]
    fn decimals_control_point_label() {
        let config = InspectorConfig {
            decimals: 4,
            ..InspectorConfig::default()
        };
        let tree = build_tree(&paris(), &config);
        assert_eq!(tree[0]["label"], json!("Point (2.3522, 48.8566) at 50m/px"));
    }

    #[test]
    fn oversized_decimals_are_clamped() {
        let config = InspectorConfig {
            decimals: u32::MAX,
            ..InspectorConfig::default()
        };
        let mut report = paris();
        report.pixels = vec![sample("Huge", json!({"v": 1.0e300, "w": 0.25}))];
        let tree = build_tree(&report, &config);

        let label = tree[0]["label"].as_str().unwrap();
        assert!(label.starts_with("Point (2.352200000000000, 48.8566"));
        assert!(label.ends_with(") at 50m/px"));
        let leaves = tree[1]["children"][0]["children"].as_array().unwrap();
        assert_eq!(leaves[0], json!(format!("v: {}", 1.0e300_f64)));
        assert_eq!(leaves[1], json!("w: 0.25"));
    }

    #[test]
    fn pixel_layers_sort_and_round() {
        let mut report = paris();
        report.pixels = vec![
            sample("Landsat", json!({"B4": 0.123456, "B3": 0.2, "B2": 7, "QA": "clear"})),
            sample("SRTM", json!({"elevation": 35})),
            sample("Empty", json!({})),
        ];
        let tree = build_tree(&report, &InspectorConfig::default());
        let pixels = &tree[1];
        assert_eq!(pixels["label"], json!("Pixels"));
        assert_eq!(pixels["children"].as_array().unwrap().len(), 2);

        let landsat = &pixels["children"][0];
        assert_eq!(landsat["label"], json!("Landsat: Image (4 bands)"));
        assert_eq!(landsat["expanded"], json!(true));
        assert_eq!(
            landsat["children"],
            json!(["B2: 7", "B3: 0.2", "B4: 0.12", "QA: clear"])
        );
        assert_eq!(pixels["children"][1]["label"], json!("SRTM: Image (1 band)"));
    }

    #[test]
    fn objects_nest_properties() {
        let mut report = paris();
        report.objects = vec![
            ObjectSample {
                layer: "Countries".into(),
                properties: json!({"name": "France", "area": 551695.5, "tags": ["EU", "G7"]}),
            },
            ObjectSample {
                layer: "Nothing here".into(),
                properties: Value::Null,
            },
        ];
        let tree = build_tree(&report, &InspectorConfig::default());
        assert_eq!(tree.as_array().unwrap().len(), 2);
        let objects = &tree[1];
        assert_eq!(objects["label"], json!("Objects"));
        let countries = &objects["children"][0];
        assert_eq!(countries["label"], json!("Countries"));
        assert_eq!(countries["expanded"], json!(false));
        assert_eq!(countries["children"][0], json!("name: France"));
        assert_eq!(countries["children"][1], json!("area: 551695.5"));
        assert_eq!(countries["children"][2]["label"], json!("tags: List (2 elements)"));
        assert_eq!(countries["children"][2]["children"], json!(["0: EU", "1: G7"]));
    }

    #[test]
    fn report_deserializes_from_camel_case() {
        let report: InspectionReport = serde_json::from_value(json!({
            "lat": 1.0,
            "lon": 2.0,
            "zoom": 3,
            "pixels": [{"layer": "DEM", "objectType": "Image", "values": {"b": 1}}]
        }))
        .unwrap();
        assert_eq!(report.pixels[0].object_type, "Image");
        assert!(report.objects.is_empty());
    }

    #[test]
    fn whole_floats_keep_one_decimal() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_value(&json!(2.0004), 2), "2.0");
    }
}
