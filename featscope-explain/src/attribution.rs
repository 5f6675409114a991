//! Per-label attribution.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::Result;
use crate::response::{AttributionEntry, value_to_array};

/// One label's attribution values, keyed by raw input name.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    label_index: i64,
    output_name: String,
    baseline_score: f64,
    example_score: f64,
    approx_error: Option<f64>,
    values: BTreeMap<String, ArrayD<f64>>,
}

impl Attribution {
    pub fn from_entry(entry: &AttributionEntry) -> Result<Self> {
        let values = entry
            .attributions
            .iter()
            .map(|(name, value)| Ok((name.clone(), value_to_array(name, value)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            label_index: entry.label_index,
            output_name: entry.output_name.clone(),
            baseline_score: entry.baseline_score,
            example_score: entry.example_score,
            approx_error: entry.approx_error,
            values,
        })
    }

    pub fn label_index(&self) -> i64 {
        self.label_index
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn baseline_score(&self) -> f64 {
        self.baseline_score
    }

    pub fn example_score(&self) -> f64 {
        self.example_score
    }

    /// Approximation error of the attribution method, when reported.
    pub fn approx_error(&self) -> Option<f64> {
        self.approx_error
    }

    pub fn values(&self, input: &str) -> Option<&ArrayD<f64>> {
        self.values.get(input)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
