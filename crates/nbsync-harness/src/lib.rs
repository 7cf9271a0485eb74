#![forbid(unsafe_code)]

//! Test harness for nbsync.
//!
//! - [`MemoryModel`] - scriptable in-memory remote model that records calls
//! - [`with_captured_tracing`] - run a closure and inspect the events it logged

pub mod memory_model;
pub mod trace_capture;

pub use memory_model::{Call, MemoryModel};
pub use trace_capture::{CaptureHandle, CapturedEvent, CapturedSpan, with_captured_tracing};

use std::rc::Rc;

use nbsync_core::RemoteModelHandle;

/// A [`MemoryModel`] together with the trait-object handle consumers take.
///
/// Both point at the same model; dropping every clone of `handle` and
/// `model` tears the model down from nbsync's point of view.
pub struct HostModel {
    pub model: Rc<MemoryModel>,
    pub handle: Rc<dyn RemoteModelHandle>,
}

impl HostModel {
    #[must_use]
    pub fn new(model: MemoryModel) -> Self {
        let model = Rc::new(model);
        let handle: Rc<dyn RemoteModelHandle> = model.clone();
        Self { model, handle }
    }
}
