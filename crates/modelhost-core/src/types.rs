//! Core types for ModelHost

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Parameters and results flowing through a processor pipeline.
///
/// Every stage consumes and produces a JSON object so that processors with
/// unrelated inputs share one uniform contract.
pub type Params = Map<String, Value>;

/// Convert an arbitrary JSON value into `Params`, failing for non-objects
pub fn params_from_value(value: Value) -> Result<Params> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::invalid_params(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// An optional boolean parameter
///
/// Accepts JSON booleans, integers and the strings
/// `true/false/1/0/yes/no`, since query and form values always arrive as
/// strings. Absent or null reads as `false`.
pub fn param_flag(params: &Params, key: &str) -> Result<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(value)) => Ok(*value),
        Some(Value::Number(n)) if n.as_i64().is_some() => Ok(n.as_i64() != Some(0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(Error::invalid_params(format!(
                "param [{}] must be a boolean, got '{}'",
                key, s
            ))),
        },
        Some(other) => Err(Error::invalid_params(format!(
            "param [{}] must be a boolean, got {}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_from_object() {
        let params = params_from_value(json!({"x": 1})).unwrap();
        assert_eq!(params.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_params_from_scalar_fails() {
        assert!(params_from_value(json!(3)).is_err());
    }

    #[test]
    fn test_param_flag_accepts_strings() {
        let params = params_from_value(json!({
            "a": "true", "b": "0", "c": true, "d": 1, "e": "maybe", "f": [1]
        }))
        .unwrap();
        assert!(param_flag(&params, "a").unwrap());
        assert!(!param_flag(&params, "b").unwrap());
        assert!(param_flag(&params, "c").unwrap());
        assert!(param_flag(&params, "d").unwrap());
        assert!(!param_flag(&params, "missing").unwrap());
        assert!(param_flag(&params, "e").is_err());
        assert!(param_flag(&params, "f").is_err());
    }
}
