//! Load-time self-test cases

use crate::transform::ResultTransform;
use modelhost_core::{params_from_value, Error, Params, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Test case as written in a plugin manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseSpec {
    /// Inference parameters (a JSON object)
    pub input: Value,

    /// Expected result, after the optional transform
    pub expected: Value,

    /// Optional result transform expression, e.g. `field:resp|len`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_func: Option<String>,
}

/// A single input/expected-output assertion
#[derive(Debug, Clone)]
pub struct TestCase {
    input: Params,
    expected: Value,
    result_transform: Option<ResultTransform>,
}

impl TestCase {
    /// Build a test case, resolving the transform eagerly
    pub fn new(input: Value, expected: Value, res_func: Option<&str>) -> Result<Self> {
        let input = params_from_value(input)
            .map_err(|e| Error::self_test(format!("test case input: {}", e)))?;
        let result_transform = res_func.map(str::parse::<ResultTransform>).transpose()?;

        Ok(Self {
            input,
            expected,
            result_transform,
        })
    }

    pub fn from_spec(spec: TestCaseSpec) -> Result<Self> {
        Self::new(spec.input, spec.expected, spec.res_func.as_deref())
    }

    /// Parse the `test_cases` list of a processor configuration
    pub fn from_conf(conf: &Params) -> Result<Vec<Self>> {
        let Some(raw) = conf.get("test_cases") else {
            return Ok(Vec::new());
        };
        let specs: Vec<TestCaseSpec> = serde_json::from_value(raw.clone())
            .map_err(|e| Error::config(format!("invalid test_cases: {}", e)))?;
        specs.into_iter().map(Self::from_spec).collect()
    }

    pub fn input(&self) -> &Params {
        &self.input
    }

    pub fn expected(&self) -> &Value {
        &self.expected
    }

    pub fn result_transform(&self) -> Option<&ResultTransform> {
        self.result_transform.as_ref()
    }

    /// Check an inference result against the expectation
    pub fn validate(&self, result: &Params) -> Result<()> {
        let mut actual = Value::Object(result.clone());
        let mut transform_expr = String::new();
        if let Some(transform) = &self.result_transform {
            actual = transform.apply(actual)?;
            transform_expr = format!("{}(res)", transform);
        }

        if json_eq(&self.expected, &actual) {
            Ok(())
        } else {
            Err(Error::self_test(format!(
                "input({}), expected {} ({}), got ({})",
                Value::Object(self.input.clone()),
                transform_expr,
                self.expected,
                actual
            )))
        }
    }
}

/// JSON equality where numbers compare by value (`4 == 4.0`)
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                // one negative i64, one u64 past i64::MAX
                false
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| json_eq(x, y)))
        }
        _ => a == b,
    }
}
