//! Response envelope returned by every gateway endpoint

use crate::types::Params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome codes carried in the envelope's `err_no` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    InvalidParams,
    UnknownError,
    InferError,
}

impl ResponseCode {
    /// Numeric code for the wire format
    pub fn err_no(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidParams => 100,
            Self::UnknownError => 500,
            Self::InferError => 501,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// JSON envelope: `{success, err_no, err_msg, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub err_no: i32,
    #[serde(default)]
    pub err_msg: String,
    #[serde(default)]
    pub data: Params,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        Self {
            success: true,
            err_no: ResponseCode::Success.err_no(),
            err_msg: String::new(),
            data: Params::new(),
        }
    }
}

impl ResponseEnvelope {
    /// Empty success envelope
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success envelope whose data fields are the given result keys
    pub fn with_data(data: Params) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Error envelope
    pub fn error(code: ResponseCode, err_msg: impl Into<String>) -> Self {
        Self::default().set_error(code, err_msg)
    }

    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn set_error(mut self, code: ResponseCode, err_msg: impl Into<String>) -> Self {
        self.success = code.is_success();
        self.err_no = code.err_no();
        self.err_msg = err_msg.into();
        self
    }

    /// Attach a diagnostic annotation under `data.debug`.
    ///
    /// With `append` the value is pushed onto a list stored at `key`.
    pub fn add_debug(mut self, key: impl Into<String>, value: Value, append: bool) -> Self {
        let debug = self
            .data
            .entry("debug")
            .or_insert_with(|| Value::Object(Params::new()));
        if !debug.is_object() {
            *debug = Value::Object(Params::new());
        }
        if let Value::Object(debug) = debug {
            let key = key.into();
            if append {
                let slot = debug.entry(key).or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(items) => items.push(value),
                    other => *other = Value::Array(vec![other.take(), value]),
                }
            } else {
                debug.insert(key, value);
            }
        }
        self
    }
}
