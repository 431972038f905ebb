//! Model service: serving aliases on top of the processor registry

use crate::plugin::PluginTable;
use crate::processor::{LoadedProcessor, ProcessorInfo};
use crate::registry::{normalize_dir, ProcessorRegistry};
use modelhost_core::{Error, Params, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registered model alias with the processor serving it
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub model_dir: PathBuf,
    pub processor: ProcessorInfo,
}

/// Maps external model names to cached processors.
///
/// Register and unregister are serialized so an alias update can never
/// interleave with another structural change; inference only takes read locks.
pub struct ModelService {
    registry: ProcessorRegistry,
    aliases: RwLock<HashMap<String, PathBuf>>,
    structural: Mutex<()>,
}

impl ModelService {
    pub fn new(plugins: PluginTable) -> Self {
        Self {
            registry: ProcessorRegistry::new(plugins),
            aliases: RwLock::new(HashMap::new()),
            structural: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Register (or update) a model under `name`
    pub fn register(
        &self,
        name: &str,
        model_dir: impl AsRef<Path>,
        force_reload: bool,
    ) -> Result<Arc<LoadedProcessor>> {
        let _structural = self.structural.lock();
        let outcome = self.registry.load(name, model_dir.as_ref(), force_reload)?;
        let dir = outcome.processor.path().to_path_buf();

        let previous = self.aliases.write().insert(name.to_string(), dir.clone());
        match previous {
            Some(old_dir) if old_dir != dir => {
                if !self.is_aliased(&old_dir) && self.registry.contains(&old_dir) {
                    warn!(
                        "Model '{}' moved from {} to {}; the old processor stays cached until unregistered",
                        name,
                        old_dir.display(),
                        dir.display()
                    );
                }
            }
            _ => {}
        }

        if outcome.reused {
            debug!("Model '{}' already served from {}", name, dir.display());
        } else {
            info!("Model '{}' registered from {}", name, dir.display());
        }

        reclaim(outcome.retired);
        Ok(outcome.processor)
    }

    /// Take a model offline and drop its processor
    ///
    /// Other names served from the same directory go offline with it.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let _structural = self.structural.lock();

        let dir = self
            .aliases
            .write()
            .remove(name)
            .ok_or_else(|| Error::model_not_found(name))?;

        if !self.registry.contains(&dir) {
            warn!(
                "Model '{}' pointed at {} which is no longer loaded; alias removed",
                name,
                dir.display()
            );
            return Ok(());
        }

        let siblings = self.aliases_of(&dir);
        if !siblings.is_empty() {
            warn!(
                "Unregistering '{}' also takes {:?} offline (same directory {})",
                name,
                siblings,
                dir.display()
            );
            self.aliases.write().retain(|_, d| *d != dir);
        }

        reclaim(self.registry.evict(&dir));
        info!("Model '{}' unregistered", name);
        Ok(())
    }

    /// Run inference on a registered model
    pub fn infer(&self, name: &str, params: Params) -> Result<Params> {
        let processor = self.check_model(name)?;
        processor.run(params)
    }

    /// Resolve name → directory → cached processor
    pub fn check_model(&self, name: &str) -> Result<Arc<LoadedProcessor>> {
        let dir = self
            .aliases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::model_not_found(name))?;
        self.registry
            .get(&dir)
            .ok_or_else(|| Error::model_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.check_model(name).is_ok()
    }

    /// Registered models, sorted by name
    pub fn models(&self) -> Vec<ModelSummary> {
        let aliases = self.aliases.read().clone();
        let mut models: Vec<ModelSummary> = aliases
            .into_iter()
            .filter_map(|(name, dir)| {
                self.registry.get(&dir).map(|processor| ModelSummary {
                    name,
                    model_dir: dir,
                    processor: processor.info(),
                })
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    fn is_aliased(&self, dir: &Path) -> bool {
        let key = normalize_dir(dir);
        self.aliases.read().values().any(|d| *d == key)
    }

    fn aliases_of(&self, dir: &Path) -> Vec<String> {
        self.aliases
            .read()
            .iter()
            .filter(|(_, d)| d.as_path() == dir)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Release a processor dropped from the cache
fn reclaim(retired: Option<Arc<LoadedProcessor>>) {
    let Some(processor) = retired else {
        return;
    };
    let in_flight = Arc::strong_count(&processor) - 1;
    if in_flight > 0 {
        debug!(
            "Processor '{}' retired; released once {} in-flight call(s) finish",
            processor.name(),
            in_flight
        );
    } else {
        debug!("Processor '{}' released", processor.name());
    }
}
