//! Processor trait and the loaded-processor pipeline

use crate::plugin::ProcessorPlugin;
use crate::test_case::TestCase;
use modelhost_core::{Error, Params, PipelineStage, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Three-stage inference contract implemented by every processor.
///
/// Stages run in a fixed order: `preprocess`, `model_process`, `postprocess`.
/// Pre- and post-processing default to identity.
pub trait Processor: Send + Sync {
    /// Turn request parameters into model inputs
    fn preprocess(&self, params: Params) -> Result<Params> {
        Ok(params)
    }

    /// Run the model
    fn model_process(&self, _params: &Params) -> Result<Params> {
        Err(Error::not_implemented("model_process"))
    }

    /// Turn raw model output into the response
    fn postprocess(&self, _params: &Params, model_res: Params) -> Result<Params> {
        Ok(model_res)
    }
}

/// Everything a plugin factory needs to build a processor
#[derive(Debug, Clone)]
pub struct LoadContext {
    name: String,
    path: PathBuf,
    conf: Params,
}

impl LoadContext {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, conf: Params) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            conf,
        }
    }

    /// Model name the processor is being registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conf(&self) -> &Params {
        &self.conf
    }

    /// Resolve a resource path relative to the plugin directory
    pub fn resource_path(&self, rel_path: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel_path)
    }

    /// Read a single configuration option
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.conf
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| Error::config(format!("option '{}': {}", key, e)))
            })
            .transpose()
    }

    /// Deserialize the whole configuration into a typed options struct
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.conf.clone()))
            .map_err(|e| Error::config(format!("invalid options for '{}': {}", self.name, e)))
    }
}

/// Summary of a loaded processor
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorInfo {
    pub name: String,
    pub path: PathBuf,
    pub kind: String,
    pub test_cases: usize,
    pub load_ms: u64,
}

/// A processor with its identity, configuration and self-test suite
pub struct LoadedProcessor {
    name: String,
    path: PathBuf,
    kind: String,
    conf: Params,
    test_cases: Vec<TestCase>,
    load_ms: u64,
    inner: Box<dyn Processor>,
}

impl std::fmt::Debug for LoadedProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProcessor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("test_cases", &self.test_cases.len())
            .finish()
    }
}

impl LoadedProcessor {
    /// Build a processor through its plugin factory, then run the self-tests.
    ///
    /// A processor that fails any step is never returned.
    pub fn load(
        name: &str,
        path: impl Into<PathBuf>,
        conf: Params,
        plugin: &dyn ProcessorPlugin,
    ) -> Result<Self> {
        let start = Instant::now();
        let path = path.into();
        let ctx = LoadContext::new(name, path.clone(), conf);

        info!("Loading processor '{}' ({}) from {}", name, plugin.kind(), path.display());
        let inner = plugin.load(&ctx).map_err(|e| match e {
            Error::Plugin(_) => e,
            other => Error::plugin(format!(
                "failed to load '{}' processor for {}: {}",
                plugin.kind(),
                name,
                other
            )),
        })?;

        let mut processor = Self {
            name: name.to_string(),
            path,
            kind: plugin.kind().to_string(),
            conf: ctx.conf,
            test_cases: Vec::new(),
            load_ms: 0,
            inner,
        };
        processor.test()?;
        processor.load_ms = start.elapsed().as_millis() as u64;

        info!(
            "Processor '{}' loaded in {}ms, {} test case(s) passed",
            processor.name,
            processor.load_ms,
            processor.test_cases.len()
        );
        Ok(processor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn conf(&self) -> &Params {
        &self.conf
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn info(&self) -> ProcessorInfo {
        ProcessorInfo {
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind.clone(),
            test_cases: self.test_cases.len(),
            load_ms: self.load_ms,
        }
    }

    /// Run the full pipeline, tagging any failure with its stage
    pub fn run(&self, params: Params) -> Result<Params> {
        let start = Instant::now();

        let params = self.timed(PipelineStage::Preprocess, || self.inner.preprocess(params))?;
        let model_res =
            self.timed(PipelineStage::ModelProcess, || self.inner.model_process(&params))?;
        let result = self.timed(PipelineStage::Postprocess, || {
            self.inner.postprocess(&params, model_res)
        })?;

        debug!(
            processor = %self.name,
            latency_us = start.elapsed().as_micros() as u64,
            "inference complete"
        );
        Ok(result)
    }

    fn timed<T>(&self, stage: PipelineStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let outcome = f().map_err(|e| Error::stage(stage, e));
        debug!(
            processor = %self.name,
            stage = %stage,
            ok = outcome.is_ok(),
            latency_us = start.elapsed().as_micros() as u64,
            "stage finished"
        );
        outcome
    }

    /// Materialize the configured test cases and run every one of them
    pub fn test(&mut self) -> Result<()> {
        self.test_cases = TestCase::from_conf(&self.conf).map_err(|e| {
            Error::self_test(format!("Processor {} test case error: {}", self.name, e))
        })?;

        for (index, case) in self.test_cases.iter().enumerate() {
            let result = self.run(case.input().clone()).map_err(|e| {
                Error::self_test(format!(
                    "Processor {} test inference error (case {}): {}",
                    self.name, index, e
                ))
            })?;
            case.validate(&result).map_err(|e| {
                Error::self_test(format!(
                    "Processor {} test result error (case {}): {}",
                    self.name, index, e
                ))
            })?;
        }
        Ok(())
    }
}
