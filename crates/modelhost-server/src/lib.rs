//! ModelHost Server
//!
//! HTTP gateway in front of a [`modelhost_processor::ModelService`]:
//!
//! - `POST /register`, `POST /unregister` manage model aliases
//! - `GET|POST /infer` runs a registered model
//! - `GET /models`, `GET /health`, `GET /metrics` for operators

pub mod config;
pub mod routes;
pub mod state;

pub use config::{ConfigOverrides, ServerConfig};
pub use routes::create_router;
pub use state::{default_plugins, AppState};

use tracing::{info, warn};

/// Register the configured startup models; failures are logged and skipped
pub async fn preload_models(state: &AppState, config: &ServerConfig) -> usize {
    let mut loaded = 0;
    for model in &config.preload {
        let service = state.service.clone();
        let entry = model.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            service.register(&entry.model_name, &entry.model_dir, entry.force_reload)
        })
        .await;

        match outcome {
            Ok(Ok(_)) => {
                info!("Preloaded model '{}'", model.model_name);
                loaded += 1;
            }
            Ok(Err(e)) => warn!("Failed to preload model '{}': {}", model.model_name, e),
            Err(e) => warn!("Preload task for '{}' failed: {}", model.model_name, e),
        }
    }
    metrics::gauge!("modelhost_models_registered").set(state.service.models().len() as f64);
    loaded
}
