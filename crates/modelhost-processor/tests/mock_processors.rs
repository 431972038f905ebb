//! Mock processors for testing
//!
//! Provides configurable processor implementations and plugin directories
//! for exercising the registry, the model service and stage error isolation.

use modelhost_core::{Error, Params, PipelineStage, Result};
use modelhost_processor::{
    plugin_fn, LoadContext, ModelService, PluginTable, Processor, ProcessorPlugin,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Returns `{"x": input.x}`
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    fn model_process(&self, params: &Params) -> Result<Params> {
        let x = params
            .get("x")
            .cloned()
            .ok_or_else(|| Error::invalid_params("missing 'x'"))?;
        let mut out = Params::new();
        out.insert("x".to_string(), x);
        Ok(out)
    }
}

/// A processor that fails in one configurable stage
pub struct FailingProcessor {
    stage: PipelineStage,
    error_message: String,
}

impl FailingProcessor {
    pub fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            error_message: "Simulated processor failure".to_string(),
        }
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    fn fail_in(&self, stage: PipelineStage) -> Result<()> {
        if self.stage == stage {
            Err(Error::internal(self.error_message.clone()))
        } else {
            Ok(())
        }
    }
}

impl Processor for FailingProcessor {
    fn preprocess(&self, params: Params) -> Result<Params> {
        self.fail_in(PipelineStage::Preprocess)?;
        Ok(params)
    }

    fn model_process(&self, params: &Params) -> Result<Params> {
        self.fail_in(PipelineStage::ModelProcess)?;
        Ok(params.clone())
    }

    fn postprocess(&self, _params: &Params, model_res: Params) -> Result<Params> {
        self.fail_in(PipelineStage::Postprocess)?;
        Ok(model_res)
    }
}

/// Echo plugin that counts how many times its factory ran
pub struct CountingPlugin {
    loads: Arc<AtomicU32>,
}

impl CountingPlugin {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let loads = Arc::new(AtomicU32::new(0));
        (
            Self {
                loads: Arc::clone(&loads),
            },
            loads,
        )
    }
}

impl ProcessorPlugin for CountingPlugin {
    fn kind(&self) -> &str {
        "echo"
    }

    fn load(&self, ctx: &LoadContext) -> Result<Box<dyn Processor>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(resource) = ctx.option::<String>("required_file")? {
            let path = ctx.resource_path(&resource);
            if !path.exists() {
                return Err(Error::plugin(format!(
                    "resource {} not found",
                    path.display()
                )));
            }
        }
        Ok(Box::new(EchoProcessor))
    }
}

/// Write a plugin directory with the given manifest
pub fn write_plugin(dir: &Path, manifest: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("processor.yaml"), manifest).unwrap();
}

const ECHO_MANIFEST: &str = r#"
processor: echo
conf:
  test_cases:
    - input: {x: 2}
      expected: 4
      res_func: "field:x|scale:2"
"#;

const BROKEN_ECHO_MANIFEST: &str = r#"
processor: echo
conf:
  test_cases:
    - input: {x: 2}
      expected: 5
      res_func: "field:x|scale:2"
"#;

fn service_with_counter() -> (ModelService, Arc<AtomicU32>) {
    let (plugin, loads) = CountingPlugin::new();
    let mut table = PluginTable::new();
    table.register(Arc::new(plugin)).unwrap();
    for stage in [
        PipelineStage::Preprocess,
        PipelineStage::ModelProcess,
        PipelineStage::Postprocess,
    ] {
        let kind = format!("fail-{:?}", stage).to_lowercase();
        table
            .register(Arc::new(plugin_fn(kind, move |_| {
                Ok(Box::new(FailingProcessor::new(stage).with_error("boom")))
            })))
            .unwrap();
    }
    (ModelService::new(table), loads)
}

fn params(value: Value) -> Params {
    modelhost_core::params_from_value(value).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_plugin_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, loads) = service_with_counter();
        let processor = service.register("echo", &dir, false).unwrap();
        assert_eq!(processor.test_cases().len(), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let result = service.infer("echo", params(json!({"x": 5}))).unwrap();
        assert_eq!(Value::Object(result), json!({"x": 5}));
    }

    #[test]
    fn test_idempotent_registration() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, loads) = service_with_counter();
        let first = service.register("echo", &dir, false).unwrap();
        let second = service.register("echo", &dir, false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_force_reload_replaces_instance() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, loads) = service_with_counter();
        let first = service.register("echo", &dir, false).unwrap();
        let second = service.register("echo", &dir, true).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(service.registry().len(), 1);
        assert!(Arc::ptr_eq(
            &service.check_model("echo").unwrap(),
            &second
        ));
    }

    #[test]
    fn test_failed_reload_keeps_previous_entry() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        let original = service.register("echo", &dir, false).unwrap();

        write_plugin(&dir, BROKEN_ECHO_MANIFEST);
        let err = service.register("echo", &dir, true).unwrap_err();
        assert!(err.to_string().contains("test result error"), "{}", err);

        let current = service.check_model("echo").unwrap();
        assert!(Arc::ptr_eq(&original, &current));
        let result = service.infer("echo", params(json!({"x": 7}))).unwrap();
        assert_eq!(result["x"], json!(7));
    }

    #[test]
    fn test_failed_first_registration_installs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, BROKEN_ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        assert!(service.register("echo", &dir, false).is_err());
        assert!(service.registry().is_empty());
        assert!(!service.contains("echo"));
    }

    #[test]
    fn test_unregister_then_infer_fails() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        service.register("echo", &dir, false).unwrap();
        service.unregister("echo").unwrap();

        let err = service.infer("echo", params(json!({"x": 1}))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(service.registry().is_empty());

        let err = service.unregister("echo").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_unregister_takes_shared_aliases_offline() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        service.register("a", &dir, false).unwrap();
        service.register("b", &dir, false).unwrap();

        service.unregister("a").unwrap();
        assert!(!service.contains("b"));
        assert!(service.models().is_empty());

        // "b" left with its directory, nothing stale remains
        let err = service.unregister("b").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        service.register("b", &dir, false).unwrap();
        assert_eq!(service.models().len(), 1);
    }

    #[test]
    fn test_unregister_alias_whose_directory_was_evicted() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        service.register("echo", &dir, false).unwrap();
        service.registry().evict(&dir);
        assert!(!service.contains("echo"));

        service.unregister("echo").unwrap();
        assert!(service.unregister("echo").is_err());
    }

    #[test]
    fn test_register_after_unregister_is_fresh_load() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, loads) = service_with_counter();
        service.register("echo", &dir, false).unwrap();
        service.unregister("echo").unwrap();
        service.register("echo", &dir, false).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_directory() {
        let (service, _) = service_with_counter();
        let err = service
            .register("ghost", "/definitely/not/a/plugin/dir", false)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{}", err);
    }

    #[test]
    fn test_unknown_processor_kind() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("mystery");
        write_plugin(&dir, "processor: mystery\nconf: {}\n");

        let (service, _) = service_with_counter();
        let err = service.register("mystery", &dir, false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no processor implementation found"), "{}", msg);
        assert!(msg.contains("echo"), "{}", msg);
    }

    #[test]
    fn test_factory_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, "processor: echo\nconf:\n  required_file: vocab.txt\n");

        let (service, _) = service_with_counter();
        let err = service.register("echo", &dir, false).unwrap_err();
        assert!(err.to_string().contains("vocab.txt"));

        std::fs::write(dir.join("vocab.txt"), "[PAD]\n").unwrap();
        assert!(service.register("echo", &dir, false).is_ok());
    }

    #[test]
    fn test_stage_error_isolation() {
        let root = tempfile::tempdir().unwrap();
        let (service, _) = service_with_counter();

        for (kind, expected) in [
            ("fail-preprocess", "Preprocess error"),
            ("fail-modelprocess", "Model process error"),
            ("fail-postprocess", "Postprocess error"),
        ] {
            let dir = root.path().join(kind);
            write_plugin(&dir, &format!("processor: {}\n", kind));
            service.register(kind, &dir, false).unwrap();

            let err = service.infer(kind, Params::new()).unwrap_err();
            let msg = err.to_string();
            assert!(msg.starts_with(expected), "{}", msg);
            assert!(msg.contains("boom"), "{}", msg);
        }
    }

    #[test]
    fn test_alias_retarget_keeps_old_directory_cached() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("v1");
        let second = root.path().join("v2");
        write_plugin(&first, ECHO_MANIFEST);
        write_plugin(&second, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        service.register("echo", &first, false).unwrap();
        let current = service.register("echo", &second, false).unwrap();

        assert_eq!(service.registry().len(), 2);
        assert!(Arc::ptr_eq(&service.check_model("echo").unwrap(), &current));
        assert_eq!(service.models().len(), 1);
    }

    #[test]
    fn test_relative_and_absolute_paths_share_cache_entry() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);
        let dotted = root.path().join(".").join("echo");

        let (service, loads) = service_with_counter();
        let a = service.register("a", &dir, false).unwrap();
        let b = service.register("b", &dotted, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inference_survives_concurrent_reloads() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("echo");
        write_plugin(&dir, ECHO_MANIFEST);

        let (service, _) = service_with_counter();
        let service = Arc::new(service);
        service.register("echo", &dir, false).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|i| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let x = i * 100 + j;
                        let result = service.infer("echo", params(json!({"x": x}))).unwrap();
                        assert_eq!(result["x"], json!(x));
                    }
                })
            })
            .collect();

        for _ in 0..10 {
            service.register("echo", &dir, true).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(service.registry().len(), 1);
    }
}
