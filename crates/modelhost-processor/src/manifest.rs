//! Plugin directory manifest
//!
//! ```yaml
//! processor: chitchat
//! description: "CDial-GPT chit-chat"
//! conf:
//!   model_chkpt: model
//!   top_p: 0.9
//!   test_cases:
//!     - input: {utterance: "你好"}
//!       expected: true
//!       res_func: "field:resp|non_empty"
//! ```

use modelhost_core::{Error, Params, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest file names, in lookup order
pub const MANIFEST_FILES: [&str; 3] = ["processor.yaml", "processor.yml", "processor.json"];

/// Typed manifest describing the processor in a plugin directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Processor kind, resolved against the plugin table
    #[serde(default)]
    pub processor: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Processor configuration, including `test_cases`
    #[serde(default)]
    pub conf: Params,
}

impl PluginManifest {
    /// Find the manifest file inside a plugin directory
    pub fn locate(dir: &Path) -> Option<PathBuf> {
        MANIFEST_FILES
            .iter()
            .map(|file| dir.join(file))
            .find(|path| path.is_file())
    }

    /// Read the manifest of a plugin directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = Self::locate(dir).ok_or_else(|| {
            Error::PluginNotFound(format!("{} (no {} found)", dir.display(), MANIFEST_FILES[0]))
        })?;
        Self::from_file(&path)
    }

    /// Parse a manifest file (YAML, or JSON by extension)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = if path.extension().map_or(false, |ext| ext == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(manifest)
    }

    /// Processor kind, failing when the manifest does not declare one
    pub fn kind(&self, dir: &Path) -> Result<&str> {
        self.processor
            .as_deref()
            .filter(|kind| !kind.trim().is_empty())
            .ok_or_else(|| {
                Error::PluginNotFound(format!("{} (manifest declares no processor)", dir.display()))
            })
    }
}
