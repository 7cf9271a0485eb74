#![forbid(unsafe_code)]

//! Widgets built on the nbsync runtime.
//!
//! - [`tree`] - expandable tree model and a view-bound [`TreeView`]
//! - [`inspector`] - map inspection reports rendered as tree sources
//! - [`raster`] - raster layer editor using binding and commands together
//!
//! Call [`register_all`] once at startup to define every widget kind in the
//! process-wide registry.

pub mod inspector;
pub mod raster;
pub mod tree;

pub use inspector::{InspectionReport, Inspector, ObjectSample, PixelSample, build_tree};
pub use raster::{EditorError, RasterLayerEditor, raster_keymap};
pub use tree::{Affordance, NodeRole, TreeModel, TreeNode, TreeView, VisibleRow};

use nbsync_runtime::{RegistryError, register_widget};

/// Define every widget kind in the process-wide registry. Idempotent.
pub fn register_all() -> Result<(), RegistryError> {
    register_widget(raster::WIDGET_NAME, raster_keymap)?;
    Ok(())
}
