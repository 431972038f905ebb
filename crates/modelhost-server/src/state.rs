//! Shared application state

use metrics_exporter_prometheus::PrometheusHandle;
use modelhost_chitchat::ChitchatPlugin;
use modelhost_processor::{ModelService, PluginTable};
use std::sync::Arc;
use std::time::Instant;

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    /// Model aliases and cached processors
    pub service: Arc<ModelService>,

    /// Prometheus metrics handle for rendering; absent when no recorder is installed
    pub metrics_handle: Option<PrometheusHandle>,

    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: ModelService, metrics_handle: Option<PrometheusHandle>) -> Self {
        Self {
            service: Arc::new(service),
            metrics_handle,
            started_at: Instant::now(),
        }
    }

    /// State serving the built-in processor kinds
    pub fn with_default_plugins(metrics_handle: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        Ok(Self::new(ModelService::new(default_plugins()?), metrics_handle))
    }
}

/// Processor implementations compiled into the server
pub fn default_plugins() -> anyhow::Result<PluginTable> {
    Ok(PluginTable::new().with(ChitchatPlugin::new())?)
}
