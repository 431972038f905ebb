//! ModelHost Processor
//!
//! Processor plugins wrap a model together with its pre- and post-processing.
//!
//! - [`Processor`] is the three-stage inference contract
//!   (preprocess → model_process → postprocess)
//! - [`LoadedProcessor`] carries identity, configuration and self-tests, and
//!   isolates stage failures
//! - [`PluginTable`] is the startup-time table of processor implementations
//! - [`ProcessorRegistry`] loads, reloads and caches processors per plugin directory
//! - [`ModelService`] maps serving aliases onto cached processors

pub mod manifest;
pub mod plugin;
pub mod processor;
pub mod registry;
pub mod service;
pub mod test_case;
pub mod transform;

pub use manifest::PluginManifest;
pub use plugin::{plugin_fn, FnPlugin, PluginDescriptor, PluginTable, ProcessorPlugin};
pub use processor::{LoadContext, LoadedProcessor, Processor, ProcessorInfo};
pub use registry::{LoadOutcome, ProcessorRegistry};
pub use service::{ModelService, ModelSummary};
pub use test_case::{TestCase, TestCaseSpec};
pub use transform::ResultTransform;

/// Prelude for plugin authors
pub mod prelude {
    pub use crate::plugin::{PluginDescriptor, ProcessorPlugin};
    pub use crate::processor::{LoadContext, Processor};
    pub use modelhost_core::{Error, Params, Result};
}
