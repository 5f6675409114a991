//! Multi-class explanation results reduced to per-feature importance.

use std::collections::BTreeMap;

use featscope_core::config::Reduction;
use featscope_core::error::LookupError;
use ndarray::ArrayD;
use tracing::debug;

use crate::attribution::Attribution;
use crate::error::{ExplainError, Result};
use crate::grouping::FeatureGrouping;
use crate::response::ExplanationResponse;

/// One model's explanation: every label's attribution plus the grouping
/// used to fold raw inputs into features.
#[derive(Debug, Clone)]
pub struct Explanation {
    attributions: Vec<Attribution>,
    grouping: FeatureGrouping,
    reduction: Reduction,
}

impl Explanation {
    /// Build from a parsed response. Fails when the response carries no labels.
    pub fn from_response(response: &ExplanationResponse, grouping: FeatureGrouping) -> Result<Self> {
        if response.attributions_by_label.is_empty() {
            return Err(LookupError::EmptyResponse.into());
        }
        grouping.validate()?;
        let attributions = response
            .attributions_by_label
            .iter()
            .map(Attribution::from_entry)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            labels = attributions.len(),
            inputs = grouping.inputs().len(),
            "Loaded explanation"
        );
        Ok(Self {
            attributions,
            grouping,
            reduction: Reduction::default(),
        })
    }

    pub fn from_json(json: &str, grouping: FeatureGrouping) -> Result<Self> {
        Self::from_response(&ExplanationResponse::from_json(json)?, grouping)
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn attributions(&self) -> &[Attribution] {
        &self.attributions
    }

    pub fn grouping(&self) -> &FeatureGrouping {
        &self.grouping
    }

    pub fn label_indices(&self) -> Vec<i64> {
        self.attributions.iter().map(Attribution::label_index).collect()
    }

    /// The attribution for `class_index`, or the highest-scoring one.
    ///
    /// Ties on example score keep the first label in response order.
    pub fn select_attribution(&self, class_index: Option<i64>) -> Result<&Attribution> {
        match class_index {
            Some(index) => self
                .attributions
                .iter()
                .find(|a| a.label_index() == index)
                .ok_or_else(|| ExplainError::class_not_found(index)),
            None => {
                let mut best: Option<&Attribution> = None;
                for attribution in &self.attributions {
                    if best.is_none_or(|b| attribution.example_score() > b.example_score()) {
                        best = Some(attribution);
                    }
                }
                best.ok_or_else(|| LookupError::EmptyResponse.into())
            }
        }
    }

    /// Importance per reported feature.
    ///
    /// Every feature of the grouping gets an entry, including ones whose
    /// values are all zero.
    pub fn feature_importance(&self, class_index: Option<i64>) -> Result<BTreeMap<String, f64>> {
        Ok(self.ordered_importance(class_index)?.into_iter().collect())
    }

    fn ordered_importance(&self, class_index: Option<i64>) -> Result<Vec<(String, f64)>> {
        let attribution = self.select_attribution(class_index)?;
        let mut importance = Vec::new();
        for (feature, inputs) in self.grouping.features() {
            let mut total = 0.0;
            for input in inputs {
                let values = lookup(attribution, input)?;
                total += self.reduction.reduce(values.iter());
            }
            importance.push((feature.to_string(), total));
        }
        debug!(
            label_index = attribution.label_index(),
            features = importance.len(),
            "Computed feature importance"
        );
        Ok(importance)
    }

    /// Raw attribution arrays for every declared input, in input shape.
    pub fn as_tensors(&self, class_index: Option<i64>) -> Result<BTreeMap<String, ArrayD<f64>>> {
        let attribution = self.select_attribution(class_index)?;
        self.grouping
            .inputs()
            .into_iter()
            .map(|input| Ok((input.to_string(), lookup(attribution, input)?.clone())))
            .collect()
    }

    /// The `k` most important features, highest first.
    pub fn top_k_features(&self, k: usize, class_index: Option<i64>) -> Result<Vec<(String, f64)>> {
        let mut ranked = self.ordered_importance(class_index)?;
        // Stable sort keeps declaration order among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        Ok(ranked)
    }
}

fn lookup<'a>(attribution: &'a Attribution, input: &str) -> Result<&'a ArrayD<f64>> {
    attribution.values(input).ok_or_else(|| {
        LookupError::AttributionNotFound {
            name: input.to_string(),
        }
        .into()
    })
}
