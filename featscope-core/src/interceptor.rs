//! Interception engine.
//!
//! [`Interceptor::begin_scope`] installs a recording observer on every entry
//! point of a [`FeatureEncoder`] and returns an [`ExportScope`]. The model
//! export runs against the scope; when the scope ends (normally, through an
//! error return, or while unwinding) the previous observers are put back in
//! reverse installation order. Only a scope closed with [`ExportScope::end`]
//! publishes its [`Registry`] to the interceptor; an abandoned scope's
//! partial registry is discarded.
//!
//! Recording policy per entry point:
//!
//! | entry point          | subject                           | records                                  |
//! |----------------------|-----------------------------------|------------------------------------------|
//! | `sparse_tensors`     | raw categorical                   | input under its own name                 |
//! | `sparse_tensors`     | weighted                          | input under the wrapped base name        |
//! | `sparse_tensors`     | bucketized / crossed              | nothing                                  |
//! | `dense_tensor`       | densified over crossed            | keys marked crossed, encoded under each  |
//! | `dense_tensor`       | densified over bucketized         | nothing                                  |
//! | `dense_tensor`       | densified over categorical        | encoded under the categorical name       |
//! | `dense_tensor`       | numeric                           | input under its own name                 |
//! | `weighted_sum`       | crossed                           | keys marked crossed                      |
//! | `weighted_sum`       | other categorical, not bucketized | encoded under the categorical name       |
//! | `transform_features` | columns without a sub-column      | input, if the feature is still unseen    |
//! | `export_outputs`     | prediction dictionary             | output under the configured/inferred key |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::column::{ColumnRole, FeatureColumn};
use crate::config::ExportConfig;
use crate::encoder::{CallObserver, EncodingCall, EntryPoint, FeatureEncoder, Predictions};
use crate::error::{ConfigError, Result};
use crate::registry::{FeatureRecord, Registry};
use crate::tensor::{Tensor, TensorLayout};

/// Name under which a column's observations are recorded.
///
/// Weighting wrappers are transparent: they record under their base.
fn feature_name(column: &FeatureColumn) -> &str {
    match column.role() {
        ColumnRole::Weighted { base, .. } => base.name(),
        _ => column.name(),
    }
}

/// Shared recording state behind every installed hook of one scope.
struct Recorder {
    registry: Mutex<Registry>,
    output_key: Option<String>,
    inferred_output_keys: Vec<String>,
}

impl Recorder {
    fn new(output_key: Option<String>, inferred_output_keys: Vec<String>) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            output_key,
            inferred_output_keys,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_registry(&self) -> Registry {
        std::mem::take(&mut *self.registry())
    }

    fn record_input(registry: &mut Registry, feature: &str, tensor: &Tensor) {
        if registry.record_input(feature, tensor) {
            debug!(feature, tensor = tensor.name(), "Recorded input tensor");
        }
    }

    fn record_encoded(registry: &mut Registry, feature: &str, tensor: &Tensor) -> Result<()> {
        if registry.record_encoded(feature, tensor)? {
            debug!(feature, tensor = tensor.name(), "Recorded encoded tensor");
        }
        Ok(())
    }

    fn fan_out_cross(
        registry: &mut Registry,
        keys: &[Arc<FeatureColumn>],
        result: Option<&Tensor>,
    ) -> Result<()> {
        for key in keys {
            registry.mark_crossed(key.name());
            if let Some(result) = result {
                Self::record_encoded(registry, key.name(), result)?;
            }
        }
        Ok(())
    }

    fn on_dense_tensor(&self, column: &FeatureColumn, result: &Tensor) -> Result<()> {
        let mut registry = self.registry();
        match column.categorical_sub_column() {
            // The bucketized source was already recorded by its own call.
            Some(sub) if sub.is_bucketized() => Ok(()),
            Some(sub) => match sub.crossed_keys() {
                Some(keys) => Self::fan_out_cross(&mut registry, keys, Some(result)),
                None => Self::record_encoded(&mut registry, feature_name(sub), result),
            },
            None if column.is_bucketized() => Ok(()),
            None => {
                Self::record_input(&mut registry, column.name(), result);
                Ok(())
            }
        }
    }

    fn on_sparse_tensors(&self, column: &FeatureColumn, result: &Tensor) -> Result<()> {
        if column.is_crossed() || column.is_bucketized() {
            return Ok(());
        }
        Self::record_input(&mut self.registry(), feature_name(column), result);
        Ok(())
    }

    fn on_weighted_sum(&self, column: &FeatureColumn, result: &Tensor) -> Result<()> {
        if !column.is_categorical() || column.is_bucketized() {
            return Ok(());
        }
        let mut registry = self.registry();
        if let Some(keys) = column.crossed_keys() {
            return Self::fan_out_cross(&mut registry, keys, None);
        }
        let target = column.categorical_sub_column().map_or(column, |c| c.as_ref());
        Self::record_encoded(&mut registry, feature_name(target), result)
    }

    fn on_transform_features(&self, result: &[(Arc<FeatureColumn>, Tensor)]) -> Result<()> {
        let mut registry = self.registry();
        for (column, tensor) in result {
            if column.categorical_sub_column().is_some() || registry.contains(column.name()) {
                continue;
            }
            let tensor = match tensor.layout() {
                TensorLayout::Sparse { .. } => Tensor::id_weight_pair(tensor.clone(), None),
                _ => tensor.clone(),
            };
            Self::record_input(&mut registry, column.name(), &tensor);
        }
        Ok(())
    }

    fn resolve_output_key(&self, predictions: &Predictions) -> Result<String> {
        if let Some(key) = &self.output_key {
            if !predictions.contains_key(key) {
                return Err(ConfigError::OutputKeyNotFound { key: key.clone() }.into());
            }
            return Ok(key.clone());
        }
        self.inferred_output_keys
            .iter()
            .find(|k| predictions.contains_key(k.as_str()))
            .cloned()
            .ok_or_else(|| {
                ConfigError::OutputKeyNotInferred {
                    available: predictions.keys().cloned().collect(),
                }
                .into()
            })
    }

    fn on_export_outputs(&self, predictions: &Predictions) -> Result<()> {
        let key = self.resolve_output_key(predictions)?;
        let tensor = &predictions[&key];
        debug!(key = key.as_str(), tensor = tensor.name(), "Recorded output tensor");
        self.registry().record_output(&key, tensor);
        Ok(())
    }
}

impl CallObserver for Recorder {
    fn observe(&self, call: &EncodingCall<'_>) -> Result<()> {
        match call {
            EncodingCall::DenseTensor { column, result } => self.on_dense_tensor(column, result),
            EncodingCall::SparseTensors { column, result } => {
                self.on_sparse_tensors(column, result)
            }
            EncodingCall::WeightedSum { column, result } => self.on_weighted_sum(column, result),
            EncodingCall::TransformFeatures { result } => self.on_transform_features(result),
            EncodingCall::ExportOutputs { predictions, .. } => self.on_export_outputs(predictions),
        }
    }
}

/// Observes model exports and keeps the registry of the last completed scope.
#[derive(Debug, Default)]
pub struct Interceptor {
    config: ExportConfig,
    registry: Registry,
    scopes_completed: usize,
}

impl Interceptor {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            scopes_completed: 0,
        }
    }

    /// Install recording hooks on `encoder` for the duration of an export.
    ///
    /// `output_key` overrides the configured one. Fails if any hook is
    /// already installed on the encoder.
    pub fn begin_scope<'a>(
        &'a mut self,
        encoder: &'a mut FeatureEncoder,
        output_key: Option<&str>,
    ) -> Result<ExportScope<'a>> {
        if !encoder.hooks().is_empty() {
            return Err(ConfigError::ScopeActive.into());
        }

        // An empty key means "not configured".
        let output_key = output_key
            .map(str::to_string)
            .or_else(|| self.config.output_key.clone())
            .filter(|key| !key.is_empty());
        let recorder = Arc::new(Recorder::new(
            output_key,
            self.config.inferred_output_keys.clone(),
        ));

        let mut originals = Vec::with_capacity(EntryPoint::ALL.len());
        for entry_point in EntryPoint::ALL {
            let hook: Arc<dyn CallObserver> = recorder.clone();
            let original = encoder.hooks_mut().replace(entry_point, Some(hook));
            originals.push((entry_point, original));
        }
        info!(
            scope = self.scopes_completed + 1,
            entry_points = originals.len(),
            "Export scope started"
        );

        Ok(ExportScope {
            interceptor: self,
            encoder,
            recorder,
            originals,
            completed: false,
        })
    }

    /// Run `export` inside a scope and return its result.
    ///
    /// Hooks are restored whether or not `export` succeeds. The registry is
    /// replaced only when it does.
    pub fn observe_export<T>(
        &mut self,
        encoder: &mut FeatureEncoder,
        output_key: Option<&str>,
        export: impl FnOnce(&FeatureEncoder) -> Result<T>,
    ) -> Result<T> {
        let scope = self.begin_scope(encoder, output_key)?;
        let result = export(&*scope);
        if result.is_ok() {
            scope.end();
        }
        result
    }

    /// Registry of the last completed scope; empty before the first one.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Move the registry of the last completed scope out of the interceptor.
    pub fn take_registry(&mut self) -> Registry {
        std::mem::take(&mut self.registry)
    }

    pub fn feature_records(&self) -> &BTreeMap<String, Vec<FeatureRecord>> {
        self.registry.feature_records()
    }

    pub fn output_tensors(&self) -> &BTreeMap<String, Tensor> {
        self.registry.output_tensors()
    }

    pub fn crossed_feature_names(&self) -> &BTreeSet<String> {
        self.registry.crossed_feature_names()
    }

    pub fn scopes_completed(&self) -> usize {
        self.scopes_completed
    }
}

/// An active export scope. Derefs to the observed encoder.
pub struct ExportScope<'a> {
    interceptor: &'a mut Interceptor,
    encoder: &'a mut FeatureEncoder,
    recorder: Arc<Recorder>,
    originals: Vec<(EntryPoint, Option<Arc<dyn CallObserver>>)>,
    completed: bool,
}

impl ExportScope<'_> {
    /// End the scope, restoring hooks and publishing the registry.
    ///
    /// Dropping the scope without calling `end` restores hooks but discards
    /// what was recorded.
    pub fn end(mut self) {
        self.completed = true;
    }

    /// Observations recorded so far in this scope.
    pub fn observation_count(&self) -> usize {
        self.recorder.registry().observation_count()
    }
}

impl Deref for ExportScope<'_> {
    type Target = FeatureEncoder;

    fn deref(&self) -> &FeatureEncoder {
        &*self.encoder
    }
}

impl fmt::Debug for ExportScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportScope")
            .field("encoder", &self.encoder)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl Drop for ExportScope<'_> {
    fn drop(&mut self) {
        let hooks = self.encoder.hooks_mut();
        while let Some((entry_point, original)) = self.originals.pop() {
            hooks.replace(entry_point, original);
        }

        let registry = self.recorder.take_registry();
        if !self.completed {
            warn!(
                observations = registry.observation_count(),
                "Export scope abandoned; discarding its observations"
            );
            return;
        }
        info!(
            features = registry.feature_records().len(),
            observations = registry.observation_count(),
            outputs = registry.output_tensors().len(),
            crossed = registry.crossed_feature_names().len(),
            "Export scope ended"
        );
        self.interceptor.registry = registry;
        self.interceptor.scopes_completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{ExportMode, FeatureBatch};
    use crate::error::{ConsistencyError, FeatscopeError};
    use crate::tensor::DType;

    fn predictions(keys: &[&str]) -> Predictions {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    Tensor::dense(format!("head/{k}:0"), DType::Float32, &[1]),
                )
            })
            .collect()
    }

    fn batch() -> FeatureBatch {
        FeatureBatch::from_features(
            "dnn",
            [
                Tensor::dense("age:0", DType::Float32, &[1]),
                Tensor::sparse("city:0", DType::String),
                Tensor::sparse("country:0", DType::String),
                Tensor::dense("city_weight:0", DType::Float32, &[1]),
            ],
        )
    }

    #[test]
    fn test_scope_restores_hooks() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let before = encoder.hooks().snapshot();

        let scope = interceptor.begin_scope(&mut encoder, None).unwrap();
        assert_eq!(scope.hooks().installed(), EntryPoint::ALL.to_vec());
        scope.end();

        assert_eq!(encoder.hooks().snapshot(), before);
        assert_eq!(interceptor.scopes_completed(), 1);
    }

    #[test]
    fn test_begin_scope_fails_when_hook_installed() {
        let mut encoder = FeatureEncoder::symbolic();
        let foreign: Arc<dyn CallObserver> = Arc::new(Recorder::new(None, Vec::new()));
        encoder
            .hooks_mut()
            .replace(EntryPoint::ExportOutputs, Some(foreign));
        let before = encoder.hooks().snapshot();

        let mut interceptor = Interceptor::default();
        let err = interceptor.begin_scope(&mut encoder, None).unwrap_err();
        assert!(matches!(err, FeatscopeError::Config(ConfigError::ScopeActive)));
        assert_eq!(encoder.hooks().snapshot(), before);
    }

    #[test]
    fn test_restores_after_failed_export() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let before = encoder.hooks().snapshot();

        let result: Result<()> = interceptor.observe_export(&mut encoder, None, |enc| {
            enc.export_outputs(ExportMode::Predict, &predictions(&["probabilities"]))?;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(FeatscopeError::Config(ConfigError::OutputKeyNotInferred { .. }))
        ));
        assert_eq!(encoder.hooks().snapshot(), before);
        assert_eq!(interceptor.scopes_completed(), 0);
    }

    #[test]
    fn test_failed_scope_keeps_previous_registry() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let age = FeatureColumn::numeric("age", &[1]);
        let city = FeatureColumn::categorical_with_identity("city", 5);

        interceptor
            .observe_export(&mut encoder, None, |enc| {
                enc.dense_tensor(&age, &batch())?;
                enc.export_outputs(ExportMode::Predict, &predictions(&["logits"]))
            })
            .unwrap();

        let err = interceptor
            .observe_export(&mut encoder, None, |enc| {
                enc.sparse_tensors(&city, &batch())?;
                enc.export_outputs(ExportMode::Predict, &Predictions::new())
            })
            .unwrap_err();
        assert!(matches!(err, FeatscopeError::Encoding(_)));

        let names: Vec<_> = interceptor.feature_records().keys().cloned().collect();
        assert_eq!(names, vec!["age".to_string()]);
        assert!(interceptor.output_tensors().contains_key("logits"));
        assert_eq!(interceptor.scopes_completed(), 1);
        assert!(encoder.hooks().is_empty());
    }

    #[test]
    fn test_dropped_scope_discards_observations() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let age = FeatureColumn::numeric("age", &[1]);

        {
            let scope = interceptor.begin_scope(&mut encoder, None).unwrap();
            scope.dense_tensor(&age, &batch()).unwrap();
            assert_eq!(scope.observation_count(), 1);
            assert!(format!("{scope:?}").starts_with("ExportScope"));
        }
        assert!(interceptor.registry().is_empty());
        assert_eq!(interceptor.scopes_completed(), 0);
        assert!(encoder.hooks().is_empty());
    }

    #[test]
    fn test_empty_output_key_is_inferred() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::new(ExportConfig {
            output_key: Some(String::new()),
            ..ExportConfig::default()
        });

        interceptor
            .observe_export(&mut encoder, Some(""), |enc| {
                enc.export_outputs(ExportMode::Predict, &predictions(&["logits", "probabilities"]))
            })
            .unwrap();
        let keys: Vec<_> = interceptor.output_tensors().keys().cloned().collect();
        assert_eq!(keys, vec!["logits".to_string()]);
    }

    #[test]
    fn test_output_key_inference() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();

        interceptor
            .observe_export(&mut encoder, None, |enc| {
                enc.export_outputs(
                    ExportMode::Predict,
                    &predictions(&["predictions", "probabilities"]),
                )
            })
            .unwrap();
        let keys: Vec<_> = interceptor.output_tensors().keys().cloned().collect();
        assert_eq!(keys, vec!["predictions".to_string()]);

        interceptor
            .observe_export(&mut encoder, None, |enc| {
                enc.export_outputs(ExportMode::Predict, &predictions(&["predictions", "logits"]))
            })
            .unwrap();
        let keys: Vec<_> = interceptor.output_tensors().keys().cloned().collect();
        assert_eq!(keys, vec!["logits".to_string()]);
    }

    #[test]
    fn test_explicit_output_key() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();

        interceptor
            .observe_export(&mut encoder, Some("probabilities"), |enc| {
                enc.export_outputs(ExportMode::Predict, &predictions(&["logits", "probabilities"]))
            })
            .unwrap();
        assert!(interceptor.output_tensors().contains_key("probabilities"));

        let err = interceptor
            .observe_export(&mut encoder, Some("classes"), |enc| {
                enc.export_outputs(ExportMode::Predict, &predictions(&["logits"]))
            })
            .unwrap_err();
        assert!(err.to_string().contains("Output key classes is not found"));
    }

    #[test]
    fn test_registry_is_scope_local() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let age = FeatureColumn::numeric("age", &[1]);
        let city = FeatureColumn::categorical_with_identity("city", 5);

        interceptor
            .observe_export(&mut encoder, None, |enc| enc.dense_tensor(&age, &batch()))
            .unwrap();
        assert!(interceptor.feature_records().contains_key("age"));

        interceptor
            .observe_export(&mut encoder, None, |enc| enc.sparse_tensors(&city, &batch()))
            .unwrap();
        assert!(!interceptor.feature_records().contains_key("age"));
        assert!(interceptor.feature_records().contains_key("city"));
    }

    #[test]
    fn test_weighted_records_under_base() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let city = FeatureColumn::categorical_with_identity("city", 5);
        let weighted = FeatureColumn::weighted(city, "city_weight").unwrap();

        interceptor
            .observe_export(&mut encoder, None, |enc| enc.weighted_sum(&weighted, &batch()))
            .unwrap();
        let records = interceptor.registry().records_for("city");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].encoded_tensors().len(), 1);
        assert!(!interceptor.feature_records().contains_key(weighted.name()));
    }

    #[test]
    fn test_crossed_weighted_sum_marks_keys_only() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let city = FeatureColumn::categorical_with_identity("city", 5);
        let country = FeatureColumn::categorical_with_hash_bucket("country", 10);
        let cross = FeatureColumn::crossed(vec![city, country], 100).unwrap();

        interceptor
            .observe_export(&mut encoder, None, |enc| enc.weighted_sum(&cross, &batch()))
            .unwrap();
        let crossed: Vec<_> = interceptor.crossed_feature_names().iter().cloned().collect();
        assert_eq!(crossed, vec!["city".to_string(), "country".to_string()]);
        for key in ["city", "country"] {
            let records = interceptor.registry().records_for(key);
            assert_eq!(records.len(), 1);
            assert!(records[0].encoded_tensors().is_empty());
        }
        assert!(!interceptor.feature_records().contains_key(cross.name()));
    }

    #[test]
    fn test_encoded_before_input_is_fatal() {
        let recorder = Recorder::new(None, Vec::new());
        let city = FeatureColumn::categorical_with_identity("city", 5);
        let emb = FeatureColumn::embedding(city, 3).unwrap();
        let result = Tensor::dense("city_embedding:0", DType::Float32, &[3]);

        let err = recorder
            .observe(&EncodingCall::DenseTensor {
                column: &emb,
                result: &result,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            FeatscopeError::Consistency(ConsistencyError::EncodedWithoutInput { .. })
        ));
    }

    #[test]
    fn test_transform_fallback_wraps_sparse() {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let age = FeatureColumn::numeric("age", &[1]);
        let city = FeatureColumn::categorical_with_identity("city", 5);
        let city_indicator = FeatureColumn::indicator(city.clone()).unwrap();
        let columns = vec![age, city, city_indicator];

        interceptor
            .observe_export(&mut encoder, None, |enc| {
                enc.transform_features(&columns, &batch())
            })
            .unwrap();

        let records = interceptor.feature_records();
        assert_eq!(records.len(), 2);
        let city_input = records["city"][0].input_tensor();
        assert!(matches!(
            city_input.layout(),
            TensorLayout::IdWeightPair { weights: None, .. }
        ));
        assert!(!records["age"][0].input_tensor().is_sparse());
    }
}
