//! Wire format of an explanation response.
//!
//! ```json
//! {"attributions_by_label": [
//!   {"attributions": {"data": [0.01, 0.02]}, "baseline_score": 0.0,
//!    "example_score": 0.4, "label_index": 1, "output_name": "probability",
//!    "approx_error": 0.03}
//! ]}
//! ```

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// A full explanation response: one entry per explained label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationResponse {
    pub attributions_by_label: Vec<AttributionEntry>,
}

impl ExplanationResponse {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One label's attributions as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionEntry {
    /// Raw input name to a scalar or (nested) list of numbers.
    pub attributions: BTreeMap<String, serde_json::Value>,
    pub baseline_score: f64,
    pub example_score: f64,
    pub label_index: i64,
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub approx_error: Option<f64>,
}

/// Convert a scalar or nested numeric list into an n-dimensional array.
///
/// Every level must be rectangular; a scalar becomes a 0-d array.
pub fn value_to_array(name: &str, value: &serde_json::Value) -> Result<ArrayD<f64>> {
    let mut shape = Vec::new();
    let mut probe = value;
    while let serde_json::Value::Array(items) = probe {
        shape.push(items.len());
        match items.first() {
            Some(first) => probe = first,
            None => break,
        }
    }

    let mut flat = Vec::with_capacity(shape.iter().product());
    flatten(name, value, &shape, &mut flat)?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), flat)?)
}

fn flatten(
    name: &str,
    value: &serde_json::Value,
    shape: &[usize],
    out: &mut Vec<f64>,
) -> Result<()> {
    match (value, shape.split_first()) {
        (serde_json::Value::Array(items), Some((&len, rest))) => {
            if items.len() != len {
                return Err(ExplainError::malformed(
                    name,
                    format!("ragged list: expected {len} items, found {}", items.len()),
                ));
            }
            items.iter().try_for_each(|item| flatten(name, item, rest, out))
        }
        (serde_json::Value::Number(n), None) => {
            let v = n
                .as_f64()
                .ok_or_else(|| ExplainError::malformed(name, "number out of range"))?;
            out.push(v);
            Ok(())
        }
        (other, _) => Err(ExplainError::malformed(
            name,
            format!("unexpected value {other}"),
        )),
    }
}
