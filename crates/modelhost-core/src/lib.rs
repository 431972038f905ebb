//! ModelHost Core
//!
//! Core types shared across ModelHost components.
//!
//! This crate provides:
//! - The error taxonomy and `Result` alias used by every layer
//! - `Params`, the JSON object flowing through processor pipelines
//! - The response envelope returned by the HTTP gateway

pub mod error;
pub mod response;
pub mod types;

pub use error::{Error, PipelineStage, Result};
pub use response::{ResponseCode, ResponseEnvelope};
pub use types::{param_flag, params_from_value, Params};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, PipelineStage, Result};
    pub use crate::types::{param_flag, params_from_value, Params};
}
