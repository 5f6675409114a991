//! Tensor provenance registry.
//!
//! Maps every observed feature to the tensors that carry it through the
//! model: the raw input tensor and the encodings built from it. Most
//! features end up with a single [`FeatureRecord`]; exports that build
//! parallel input graphs (wide-and-deep) produce one record per graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConsistencyError;
use crate::tensor::Tensor;

/// One observed instantiation of a feature.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    input_tensor: Tensor,
    encoded_tensors: Vec<Tensor>,
}

impl FeatureRecord {
    pub fn new(input_tensor: Tensor) -> Self {
        Self {
            input_tensor,
            encoded_tensors: Vec::new(),
        }
    }

    pub fn input_tensor(&self) -> &Tensor {
        &self.input_tensor
    }

    /// Encodings in discovery order.
    pub fn encoded_tensors(&self) -> &[Tensor] {
        &self.encoded_tensors
    }
}

/// Observations collected during one export scope.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    feature_records: BTreeMap<String, Vec<FeatureRecord>>,
    output_tensors: BTreeMap<String, Tensor>,
    crossed_feature_names: BTreeSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw input tensor for `feature`.
    ///
    /// A handle already recorded as an input for this feature is ignored.
    /// Returns whether a new record was created.
    pub fn record_input(&mut self, feature: &str, tensor: &Tensor) -> bool {
        let records = self.feature_records.entry(feature.to_string()).or_default();
        if records
            .iter()
            .any(|r| Tensor::same(&r.input_tensor, tensor))
        {
            return false;
        }
        records.push(FeatureRecord::new(tensor.clone()));
        true
    }

    /// Append an encoded tensor to the latest record of `feature`.
    ///
    /// Fails when `feature` has no input record yet.
    pub fn record_encoded(
        &mut self,
        feature: &str,
        tensor: &Tensor,
    ) -> Result<bool, ConsistencyError> {
        let record = self
            .feature_records
            .get_mut(feature)
            .and_then(|records| records.last_mut())
            .ok_or_else(|| ConsistencyError::EncodedWithoutInput {
                feature: feature.to_string(),
            })?;
        if record
            .encoded_tensors
            .iter()
            .any(|t| Tensor::same(t, tensor))
        {
            return Ok(false);
        }
        record.encoded_tensors.push(tensor.clone());
        Ok(true)
    }

    pub fn record_output(&mut self, key: &str, tensor: &Tensor) {
        self.output_tensors.insert(key.to_string(), tensor.clone());
    }

    pub fn mark_crossed(&mut self, feature: &str) -> bool {
        self.crossed_feature_names.insert(feature.to_string())
    }

    pub fn feature_records(&self) -> &BTreeMap<String, Vec<FeatureRecord>> {
        &self.feature_records
    }

    pub fn output_tensors(&self) -> &BTreeMap<String, Tensor> {
        &self.output_tensors
    }

    pub fn crossed_feature_names(&self) -> &BTreeSet<String> {
        &self.crossed_feature_names
    }

    pub fn records_for(&self, feature: &str) -> &[FeatureRecord] {
        self.feature_records
            .get(feature)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.feature_records.contains_key(feature)
    }

    pub fn is_empty(&self) -> bool {
        self.feature_records.is_empty()
            && self.output_tensors.is_empty()
            && self.crossed_feature_names.is_empty()
    }

    /// Total number of input and encoded tensors recorded.
    pub fn observation_count(&self) -> usize {
        self.feature_records
            .values()
            .flatten()
            .map(|r| 1 + r.encoded_tensors.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_record_input_dedupes_by_identity() {
        let mut registry = Registry::new();
        let a = Tensor::dense("age:0", DType::Float32, &[1]);
        let b = Tensor::dense("age:0", DType::Float32, &[1]);

        assert!(registry.record_input("age", &a));
        assert!(!registry.record_input("age", &a.clone()));
        assert!(registry.record_input("age", &b));
        assert_eq!(registry.records_for("age").len(), 2);
    }

    #[test]
    fn test_encoded_goes_to_latest_record() {
        let mut registry = Registry::new();
        let first = Tensor::sparse("dnn/city", DType::String);
        let second = Tensor::sparse("linear/city", DType::String);
        let emb = Tensor::dense("linear/city_embedding", DType::Float32, &[4]);

        registry.record_input("city", &first);
        registry.record_input("city", &second);
        assert!(registry.record_encoded("city", &emb).unwrap());
        assert!(!registry.record_encoded("city", &emb).unwrap());

        let records = registry.records_for("city");
        assert!(records[0].encoded_tensors().is_empty());
        assert_eq!(records[1].encoded_tensors().len(), 1);
        assert!(Tensor::same(&records[1].encoded_tensors()[0], &emb));
    }

    #[test]
    fn test_encoded_without_input_fails() {
        let mut registry = Registry::new();
        let emb = Tensor::dense("city_embedding", DType::Float32, &[4]);
        let err = registry.record_encoded("city", &emb).unwrap_err();
        assert!(matches!(err, ConsistencyError::EncodedWithoutInput { ref feature } if feature == "city"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_observation_count() {
        let mut registry = Registry::new();
        let input = Tensor::sparse("city", DType::String);
        registry.record_input("city", &input);
        registry
            .record_encoded("city", &Tensor::dense("e1", DType::Float32, &[2]))
            .unwrap();
        registry
            .record_encoded("city", &Tensor::dense("e2", DType::Float32, &[2]))
            .unwrap();
        registry.mark_crossed("city");
        assert_eq!(registry.observation_count(), 3);
        assert!(registry.crossed_feature_names().contains("city"));
        assert!(registry.records_for("missing").is_empty());
    }
}
