//! Error types for ModelHost

use std::fmt;

/// Result type alias using ModelHost's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of the processor inference pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Preprocess,
    ModelProcess,
    Postprocess,
}

impl PipelineStage {
    /// Human readable stage label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Preprocess => "Preprocess",
            Self::ModelProcess => "Model process",
            Self::Postprocess => "Postprocess",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Core error type for ModelHost operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required request parameter is missing or malformed
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Plugin directory does not exist
    #[error("Processor path {0} does not exist")]
    PathNotFound(String),

    /// No processor implementation could be resolved for a plugin directory
    #[error("no processor implementation found in {0}")]
    PluginNotFound(String),

    /// Plugin factory failed while loading model state
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Processor failed its load-time self-test
    #[error("{0}")]
    SelfTest(String),

    /// A pipeline stage failed
    #[error("{stage} error: {source}")]
    Stage {
        stage: PipelineStage,
        source: Box<Error>,
    },

    /// Operation has no implementation
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Result transform could not be parsed or applied
    #[error("transform error: {0}")]
    Transform(String),

    /// Model name is not registered, or its processor was evicted
    #[error("Model [{0}] does not exist")]
    ModelNotFound(String),

    /// Tensor library or tokenizer errors
    #[error("model error: {0}")]
    Model(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML manifest errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new invalid params error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Create a new plugin error
    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    /// Create a new self-test error
    pub fn self_test(msg: impl Into<String>) -> Self {
        Self::SelfTest(msg.into())
    }

    /// Wrap an error with the pipeline stage it came from
    pub fn stage(stage: PipelineStage, source: Error) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Create a new not-implemented error
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a new transform error
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    /// Create a new model-not-found error
    pub fn model_not_found(name: impl Into<String>) -> Self {
        Self::ModelNotFound(name.into())
    }

    /// Create a new model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Pipeline stage that produced this error, if any
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
