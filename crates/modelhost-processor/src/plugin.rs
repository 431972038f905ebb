//! Extension points for processor implementations.
//!
//! Plugin directories do not carry code. Each one names a processor `kind`
//! in its manifest, and the kind is resolved against a [`PluginTable`] that
//! the host fills at startup.

use crate::processor::{LoadContext, Processor};
use modelhost_core::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for one processor implementation.
///
/// Implement this trait in plugin crates (for example, a Candle-backed
/// conversational model) and register it in the host's [`PluginTable`].
pub trait ProcessorPlugin: Send + Sync {
    /// Key that plugin manifests use to select this implementation
    fn kind(&self) -> &str;

    /// Build a processor, loading model resources relative to `ctx.path()`
    fn load(&self, ctx: &LoadContext) -> Result<Box<dyn Processor>>;

    /// Capability descriptor shown in listings
    fn describe(&self) -> PluginDescriptor {
        PluginDescriptor {
            kind: self.kind().to_string(),
            description: String::new(),
            options: Vec::new(),
        }
    }
}

/// Declared capabilities of a plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub kind: String,
    pub description: String,
    /// Configuration keys the plugin understands
    pub options: Vec<String>,
}

/// Plugin backed by a closure
pub struct FnPlugin<F> {
    kind: String,
    factory: F,
}

impl<F> ProcessorPlugin for FnPlugin<F>
where
    F: Fn(&LoadContext) -> Result<Box<dyn Processor>> + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn load(&self, ctx: &LoadContext) -> Result<Box<dyn Processor>> {
        (self.factory)(ctx)
    }
}

/// Create a plugin from a factory closure
pub fn plugin_fn<F>(kind: impl Into<String>, factory: F) -> FnPlugin<F>
where
    F: Fn(&LoadContext) -> Result<Box<dyn Processor>> + Send + Sync,
{
    FnPlugin {
        kind: kind.into(),
        factory,
    }
}

/// Registration table of processor implementations, keyed by kind
#[derive(Clone, Default)]
pub struct PluginTable {
    plugins: HashMap<String, Arc<dyn ProcessorPlugin>>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin; a second plugin with the same kind is rejected
    pub fn register(&mut self, plugin: Arc<dyn ProcessorPlugin>) -> Result<()> {
        let kind = plugin.kind().to_string();
        if self.plugins.contains_key(&kind) {
            return Err(Error::config(format!(
                "processor kind '{}' is registered more than once",
                kind
            )));
        }
        tracing::debug!("Registered processor kind '{}'", kind);
        self.plugins.insert(kind, plugin);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, plugin: impl ProcessorPlugin + 'static) -> Result<Self> {
        self.register(Arc::new(plugin))?;
        Ok(self)
    }

    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn ProcessorPlugin>> {
        self.plugins.get(kind).cloned()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.plugins.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        let mut descriptors: Vec<PluginDescriptor> =
            self.plugins.values().map(|p| p.describe()).collect();
        descriptors.sort_by(|a, b| a.kind.cmp(&b.kind));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
