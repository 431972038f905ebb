//! HTTP routes and handlers
//!
//! Every endpoint answers `200 OK` with a [`ResponseEnvelope`]; the outcome
//! is carried by `success` and `err_no`.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use modelhost_core::{param_flag, Error, Params, ResponseCode, ResponseEnvelope};
use serde_json::{json, Value};
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::state::AppState;

pub fn create_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/unregister", post(unregister))
        .route("/infer", get(infer).post(infer))
        .route("/models", get(models))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "models": state.service.models().len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// `POST /register`: load (or reload) a plugin directory under a model name
async fn register(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    const ENDPOINT: &str = "register";
    metrics::counter!("modelhost_requests_total", "endpoint" => ENDPOINT).increment(1);

    let params = parse_req(&uri, &headers, &body).map_err(ApiError::invalid(ENDPOINT))?;
    let name = required_str(&params, "model_name").map_err(ApiError::invalid(ENDPOINT))?;
    let model_dir = required_str(&params, "model_dir").map_err(ApiError::invalid(ENDPOINT))?;
    let force_reload =
        param_flag(&params, "force_reload").map_err(ApiError::invalid(ENDPOINT))?;

    info!(
        "Register '{}' from {} (force_reload={})",
        name, model_dir, force_reload
    );

    let service = state.service.clone();
    run_blocking(move || service.register(&name, &model_dir, force_reload).map(|_| ()))
        .await
        .map_err(ApiError::with_code(ENDPOINT, ResponseCode::UnknownError))?;

    update_model_gauge(&state);
    Ok(Json(ResponseEnvelope::ok()))
}

/// `POST /unregister`: take a model offline
async fn unregister(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    const ENDPOINT: &str = "unregister";
    metrics::counter!("modelhost_requests_total", "endpoint" => ENDPOINT).increment(1);

    let params = parse_req(&uri, &headers, &body).map_err(ApiError::invalid(ENDPOINT))?;
    let name = required_str(&params, "model_name").map_err(ApiError::invalid(ENDPOINT))?;

    info!("Unregister '{}'", name);

    let service = state.service.clone();
    run_blocking(move || service.unregister(&name))
        .await
        .map_err(ApiError::with_code(ENDPOINT, ResponseCode::UnknownError))?;

    update_model_gauge(&state);
    Ok(Json(ResponseEnvelope::ok()))
}

/// `GET|POST /infer`: run a registered model on the request parameters
async fn infer(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    const ENDPOINT: &str = "infer";
    metrics::counter!("modelhost_requests_total", "endpoint" => ENDPOINT).increment(1);

    let mut params = parse_req(&uri, &headers, &body).map_err(ApiError::invalid(ENDPOINT))?;
    let name = required_str(&params, "model_name").map_err(ApiError::invalid(ENDPOINT))?;
    params.remove("model_name");
    let debug_requested = param_flag(&params, "debug").unwrap_or(false);

    let start = Instant::now();
    let service = state.service.clone();
    let model = name.clone();
    let result = run_blocking(move || service.infer(&model, params))
        .await
        .map_err(ApiError::with_code(ENDPOINT, ResponseCode::InferError))?;

    let latency_us = start.elapsed().as_micros() as u64;
    metrics::histogram!("modelhost_infer_latency_us", "model" => name.clone())
        .record(latency_us as f64);
    debug!(model = %name, latency_us, "infer complete");

    let mut envelope = ResponseEnvelope::with_data(result);
    if debug_requested {
        envelope = envelope
            .add_debug("model_name", json!(name), false)
            .add_debug("latency_us", json!(latency_us), false);
    }
    Ok(Json(envelope))
}

/// `GET /models`: registered models with their processors
async fn models(State(state): State<AppState>) -> Json<ResponseEnvelope> {
    metrics::counter!("modelhost_requests_total", "endpoint" => "models").increment(1);

    let models = state.service.models();
    let kinds = state.service.registry().plugins().descriptors();
    Json(
        ResponseEnvelope::ok()
            .add_data("models", json!(models))
            .add_data("processors", json!(kinds)),
    )
}

async fn fallback() -> &'static str {
    "Not found"
}

/// Merge request parameters: query string, then JSON object body, then form body
pub fn parse_req(uri: &Uri, headers: &HeaderMap, body: &[u8]) -> modelhost_core::Result<Params> {
    let mut params = Params::new();

    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(params);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        for (key, value) in url::form_urlencoded::parse(body) {
            params.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => params.extend(object),
            Ok(_) => return Err(Error::invalid_params("request body must be a JSON object")),
            Err(e) => {
                return Err(Error::invalid_params(format!(
                    "request body is not valid JSON: {}",
                    e
                )))
            }
        }
    }

    Ok(params)
}

/// A required, non-empty string parameter
pub fn required_str(params: &Params, key: &str) -> modelhost_core::Result<String> {
    match params.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::Null) | Some(Value::String(_)) | None => Err(Error::invalid_params(format!(
            "Parameter [{}] is missing.",
            key
        ))),
        Some(other) => Err(Error::invalid_params(format!(
            "param [{}] must be a string, got {}",
            key, other
        ))),
    }
}

/// Run a synchronous service call on the blocking pool
async fn run_blocking<T, F>(f: F) -> modelhost_core::Result<T>
where
    F: FnOnce() -> modelhost_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("worker task failed: {}", e)))?
}

fn update_model_gauge(state: &AppState) {
    metrics::gauge!("modelhost_models_registered").set(state.service.models().len() as f64);
}

/// Failure rendered as an error envelope
#[derive(Debug)]
pub struct ApiError {
    endpoint: &'static str,
    code: ResponseCode,
    message: String,
}

impl ApiError {
    pub fn new(endpoint: &'static str, code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            endpoint,
            code,
            message: message.into(),
        }
    }

    fn invalid(endpoint: &'static str) -> impl Fn(Error) -> Self {
        Self::with_code(endpoint, ResponseCode::InvalidParams)
    }

    fn with_code(endpoint: &'static str, code: ResponseCode) -> impl Fn(Error) -> Self {
        move |err| Self::new(endpoint, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("modelhost_errors_total", "endpoint" => self.endpoint).increment(1);
        warn!(
            endpoint = self.endpoint,
            err_no = self.code.err_no(),
            "{}",
            self.message
        );
        Json(ResponseEnvelope::error(self.code, self.message)).into_response()
    }
}
