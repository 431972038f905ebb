//! Processor registry: loads, reloads and caches processors per plugin directory

use crate::manifest::PluginManifest;
use crate::plugin::PluginTable;
use crate::processor::LoadedProcessor;
use modelhost_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

struct CacheEntry {
    manifest: PluginManifest,
    processor: Arc<LoadedProcessor>,
}

/// Result of [`ProcessorRegistry::load`]
#[derive(Debug)]
pub struct LoadOutcome {
    /// Processor now cached for the directory
    pub processor: Arc<LoadedProcessor>,

    /// Processor replaced by a forced reload
    pub retired: Option<Arc<LoadedProcessor>>,

    /// `true` when the cached processor was returned without loading
    pub reused: bool,
}

/// Factory + cache of processors keyed by plugin directory.
///
/// Readers (inference lookups) only take the cache's read lock. Structural
/// changes are serialized by a writer lock, and the expensive load and
/// self-test step runs outside the cache lock so the previous instance keeps
/// serving until the replacement is swapped in.
pub struct ProcessorRegistry {
    plugins: PluginTable,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    writer: Mutex<()>,
}

impl ProcessorRegistry {
    pub fn new(plugins: PluginTable) -> Self {
        Self {
            plugins,
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn plugins(&self) -> &PluginTable {
        &self.plugins
    }

    /// Load the processor of a plugin directory.
    ///
    /// A cached directory is returned as-is unless `force_reload` is set, in
    /// which case the manifest is re-read and the processor rebuilt. The
    /// cache entry only changes once the new processor passed its self-tests.
    pub fn load(&self, name: &str, dir: impl AsRef<Path>, force_reload: bool) -> Result<LoadOutcome> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            let absolute = std::env::current_dir()
                .map(|cwd| cwd.join(dir))
                .unwrap_or_else(|_| dir.to_path_buf());
            return Err(Error::PathNotFound(format!(
                "{}[{}]",
                dir.display(),
                absolute.display()
            )));
        }
        let key = normalize_dir(dir);

        let _writer = self.writer.lock();

        if let Some(entry) = self.entries.read().get(&key) {
            if !force_reload {
                debug!("Processor for {} already cached", key.display());
                return Ok(LoadOutcome {
                    processor: Arc::clone(&entry.processor),
                    retired: None,
                    reused: true,
                });
            }
            info!("Reloading processor for {}", key.display());
        }

        let manifest = PluginManifest::from_dir(&key)?;
        let kind = manifest.kind(&key)?;
        let plugin = self.plugins.resolve(kind).ok_or_else(|| {
            Error::PluginNotFound(format!(
                "{} (unknown processor kind '{}', available: [{}])",
                key.display(),
                kind,
                self.plugins.kinds().join(", ")
            ))
        })?;

        let processor = Arc::new(LoadedProcessor::load(
            name,
            key.clone(),
            manifest.conf.clone(),
            plugin.as_ref(),
        )?);

        let retired = self
            .entries
            .write()
            .insert(
                key,
                CacheEntry {
                    manifest,
                    processor: Arc::clone(&processor),
                },
            )
            .map(|old| old.processor);

        Ok(LoadOutcome {
            processor,
            retired,
            reused: false,
        })
    }

    /// Cached processor for a directory
    pub fn get(&self, dir: impl AsRef<Path>) -> Option<Arc<LoadedProcessor>> {
        let key = normalize_dir(dir.as_ref());
        self.entries
            .read()
            .get(&key)
            .map(|entry| Arc::clone(&entry.processor))
    }

    /// Manifest the cached processor was loaded from
    pub fn manifest(&self, dir: impl AsRef<Path>) -> Option<PluginManifest> {
        let key = normalize_dir(dir.as_ref());
        self.entries.read().get(&key).map(|entry| entry.manifest.clone())
    }

    pub fn contains(&self, dir: impl AsRef<Path>) -> bool {
        let key = normalize_dir(dir.as_ref());
        self.entries.read().contains_key(&key)
    }

    /// Drop the manifest and processor cached for a directory
    pub fn evict(&self, dir: impl AsRef<Path>) -> Option<Arc<LoadedProcessor>> {
        let key = normalize_dir(dir.as_ref());
        let _writer = self.writer.lock();
        let evicted = self.entries.write().remove(&key).map(|entry| entry.processor);
        if evicted.is_some() {
            info!("Evicted processor for {}", key.display());
        }
        evicted
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Cache key for a plugin directory
pub fn normalize_dir(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}
