//! Named result transforms applied by test cases before comparison
//!
//! Transforms are parsed from short expressions such as `len`,
//! `field:resp` or `field:x|scale:2` (a `|` chains transforms left to right).

use modelhost_core::{Error, Result};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// A closed set of unary transforms over JSON values
#[derive(Debug, Clone, PartialEq)]
pub enum ResultTransform {
    /// Value unchanged
    Identity,

    /// Length of a string (in characters), array or object
    Length,

    /// `true` unless the value is null or an empty string/array/object
    NonEmpty,

    /// Sorted keys of an object
    Keys,

    /// Extract a nested field; numeric segments index arrays
    Field(Vec<String>),

    /// Multiply a number by a constant
    Scale(f64),

    /// Apply transforms in order
    Chain(Vec<ResultTransform>),
}

impl ResultTransform {
    /// Apply the transform to a value
    pub fn apply(&self, value: Value) -> Result<Value> {
        match self {
            Self::Identity => Ok(value),
            Self::Length => match &value {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(Error::transform(format!("len() of non-collection {}", other))),
            },
            Self::NonEmpty => Ok(Value::Bool(match &value {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => true,
            })),
            Self::Keys => match value {
                Value::Object(map) => {
                    let mut keys: Vec<String> = map.keys().cloned().collect();
                    keys.sort();
                    Ok(Value::from(keys))
                }
                other => Err(Error::transform(format!("keys() of non-object {}", other))),
            },
            Self::Field(path) => extract_field(value, path),
            Self::Scale(factor) => {
                let n = value.as_f64().ok_or_else(|| {
                    Error::transform(format!("scale() of non-number {}", value))
                })?;
                Ok(number_value(n * factor))
            }
            Self::Chain(steps) => steps.iter().try_fold(value, |acc, step| step.apply(acc)),
        }
    }
}

fn extract_field(value: Value, path: &[String]) -> Result<Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(mut map) => map
                .remove(segment)
                .ok_or_else(|| Error::transform(format!("field '{}' not found", segment)))?,
            Value::Array(mut items) => {
                let index: usize = segment.parse().map_err(|_| {
                    Error::transform(format!("'{}' is not an array index", segment))
                })?;
                if index >= items.len() {
                    return Err(Error::transform(format!(
                        "index {} out of range for array of length {}",
                        index,
                        items.len()
                    )));
                }
                items.swap_remove(index)
            }
            other => {
                return Err(Error::transform(format!(
                    "cannot read field '{}' of {}",
                    segment, other
                )))
            }
        };
    }
    Ok(current)
}

/// Integral results stay integers so they print the way they were written
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn parse_step(step: &str) -> Result<ResultTransform> {
    let step = step.trim();
    let (op, arg) = match step.split_once(':') {
        Some((op, arg)) => (op.trim(), Some(arg.trim())),
        None => (step, None),
    };

    match (op, arg) {
        ("identity", None) => Ok(ResultTransform::Identity),
        ("len", None) => Ok(ResultTransform::Length),
        ("non_empty", None) => Ok(ResultTransform::NonEmpty),
        ("keys", None) => Ok(ResultTransform::Keys),
        ("field", Some(path)) if !path.is_empty() => Ok(ResultTransform::Field(
            path.split('.').map(str::to_string).collect(),
        )),
        ("scale", Some(factor)) => factor
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ResultTransform::Scale)
            .ok_or_else(|| Error::transform(format!("invalid scale factor '{}'", factor))),
        _ => Err(Error::transform(format!("unknown result transform '{}'", step))),
    }
}

impl FromStr for ResultTransform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::transform("empty result transform"));
        }
        let mut steps = s.split('|').map(parse_step).collect::<Result<Vec<_>>>()?;
        if steps.len() == 1 {
            Ok(steps.remove(0))
        } else {
            Ok(Self::Chain(steps))
        }
    }
}

impl fmt::Display for ResultTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Length => f.write_str("len"),
            Self::NonEmpty => f.write_str("non_empty"),
            Self::Keys => f.write_str("keys"),
            Self::Field(path) => write!(f, "field:{}", path.join(".")),
            Self::Scale(factor) => write!(f, "scale:{}", factor),
            Self::Chain(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{}", step)?;
                }
                Ok(())
            }
        }
    }
}
