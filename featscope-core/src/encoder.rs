//! The feature-encoding and export boundary.
//!
//! [`FeatureEncoder`] exposes the five entry points a model export goes
//! through. Each one runs the backend's original logic first, then hands the
//! call's arguments and result to whatever [`CallObserver`] is installed for
//! that entry point in the encoder's [`HookTable`]. Observers never see a
//! mutable result, so observation cannot change what the caller gets back.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::column::{ColumnRole, DensifyKind, FeatureColumn};
use crate::error::{EncodingError, Result};
use crate::tensor::{DType, Tensor};

/// An interceptable entry point of the encoding/export framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    DenseTensor,
    SparseTensors,
    WeightedSum,
    ExportOutputs,
    TransformFeatures,
}

impl EntryPoint {
    /// Every entry point, in installation order.
    pub const ALL: [EntryPoint; 5] = [
        EntryPoint::DenseTensor,
        EntryPoint::SparseTensors,
        EntryPoint::WeightedSum,
        EntryPoint::ExportOutputs,
        EntryPoint::TransformFeatures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::DenseTensor => "dense_tensor",
            EntryPoint::SparseTensors => "sparse_tensors",
            EntryPoint::WeightedSum => "weighted_sum",
            EntryPoint::ExportOutputs => "export_outputs",
            EntryPoint::TransformFeatures => "transform_features",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mode a model is exported for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    #[default]
    Predict,
    Eval,
    Train,
}

/// Prediction dictionary handed to the export entry point.
pub type Predictions = BTreeMap<String, Tensor>;

/// What the export entry point returns: the serving signature outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOutputs {
    pub mode: ExportMode,
    pub signature: BTreeMap<String, Tensor>,
}

/// One observed invocation of an entry point, with its arguments and result.
#[derive(Debug)]
pub enum EncodingCall<'a> {
    DenseTensor {
        column: &'a FeatureColumn,
        result: &'a Tensor,
    },
    SparseTensors {
        column: &'a FeatureColumn,
        result: &'a Tensor,
    },
    WeightedSum {
        column: &'a FeatureColumn,
        result: &'a Tensor,
    },
    ExportOutputs {
        mode: ExportMode,
        predictions: &'a Predictions,
        result: &'a ExportOutputs,
    },
    TransformFeatures {
        result: &'a [(Arc<FeatureColumn>, Tensor)],
    },
}

impl EncodingCall<'_> {
    pub fn entry_point(&self) -> EntryPoint {
        match self {
            EncodingCall::DenseTensor { .. } => EntryPoint::DenseTensor,
            EncodingCall::SparseTensors { .. } => EntryPoint::SparseTensors,
            EncodingCall::WeightedSum { .. } => EntryPoint::WeightedSum,
            EncodingCall::ExportOutputs { .. } => EntryPoint::ExportOutputs,
            EncodingCall::TransformFeatures { .. } => EntryPoint::TransformFeatures,
        }
    }
}

/// Callback invoked after an entry point's original logic has run.
///
/// Returning an error aborts the call that triggered the observation.
pub trait CallObserver: Send + Sync {
    fn observe(&self, call: &EncodingCall<'_>) -> Result<()>;
}

const ENTRY_POINT_COUNT: usize = EntryPoint::ALL.len();

/// Per-entry-point observer slots of one encoder.
#[derive(Default)]
pub struct HookTable {
    slots: [Option<Arc<dyn CallObserver>>; ENTRY_POINT_COUNT],
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_point: EntryPoint) -> Option<&Arc<dyn CallObserver>> {
        self.slots[entry_point.index()].as_ref()
    }

    /// Put `hook` into the slot for `entry_point`, returning what was there.
    pub fn replace(
        &mut self,
        entry_point: EntryPoint,
        hook: Option<Arc<dyn CallObserver>>,
    ) -> Option<Arc<dyn CallObserver>> {
        std::mem::replace(&mut self.slots[entry_point.index()], hook)
    }

    /// Entry points that currently have an observer installed.
    pub fn installed(&self) -> Vec<EntryPoint> {
        EntryPoint::ALL
            .into_iter()
            .filter(|ep| self.get(*ep).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Identity snapshot of every slot, comparable across time.
    pub fn snapshot(&self) -> HookSnapshot {
        HookSnapshot(
            self.slots
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .map(|hook| Arc::as_ptr(hook) as *const () as usize)
                })
                .collect(),
        )
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable")
            .field("installed", &self.installed())
            .finish()
    }
}

/// Slot identities of a [`HookTable`] at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSnapshot(Vec<Option<usize>>);

/// Raw features of one input graph plus its transformation cache.
///
/// Transformations are cached per column name, so repeated encoding calls
/// within the same graph return the same tensor handle. A second batch for
/// the same features (e.g. the other half of a wide-and-deep model) yields
/// distinct handles.
#[derive(Debug)]
pub struct FeatureBatch {
    scope: String,
    features: BTreeMap<String, Tensor>,
    cache: Mutex<HashMap<String, Tensor>>,
}

impl FeatureBatch {
    pub fn new(scope: impl Into<String>, features: BTreeMap<String, Tensor>) -> Self {
        Self {
            scope: scope.into(),
            features,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build a batch from raw feature placeholders.
    pub fn from_features(
        scope: impl Into<String>,
        features: impl IntoIterator<Item = Tensor>,
    ) -> Self {
        let features = features
            .into_iter()
            .map(|t| {
                let key = t.name().split(':').next().unwrap_or_default().to_string();
                (key, t)
            })
            .collect();
        Self::new(scope, features)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn feature(&self, name: &str) -> Result<&Tensor> {
        self.features.get(name).ok_or_else(|| {
            EncodingError::MissingFeature {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Return the cached tensor for `key`, building it on first use.
    pub fn cached(&self, key: &str, build: impl FnOnce() -> Result<Tensor>) -> Result<Tensor> {
        if let Some(t) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(t.clone());
        }
        // Built outside the lock: builders may recurse into the cache.
        let tensor = build()?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(key.to_string()).or_insert(tensor).clone())
    }
}

/// The original logic behind each entry point.
///
/// Nested encoding calls (an embedding asking for its categorical ids, say)
/// must go through `encoder` so that they are observed like top-level calls.
pub trait EncodingBackend: Send + Sync {
    fn dense_tensor(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor>;

    fn sparse_tensors(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor>;

    fn weighted_sum(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor>;

    fn transform_features(
        &self,
        encoder: &FeatureEncoder,
        columns: &[Arc<FeatureColumn>],
        batch: &FeatureBatch,
    ) -> Result<Vec<(Arc<FeatureColumn>, Tensor)>>;

    fn export_outputs(&self, mode: ExportMode, predictions: &Predictions) -> Result<ExportOutputs>;
}

/// Encoding/export framework with interceptable entry points.
pub struct FeatureEncoder {
    backend: Arc<dyn EncodingBackend>,
    hooks: HookTable,
}

impl FeatureEncoder {
    pub fn new(backend: impl EncodingBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            hooks: HookTable::new(),
        }
    }

    /// An encoder over the built-in [`SymbolicBackend`].
    pub fn symbolic() -> Self {
        Self::new(SymbolicBackend::new())
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    fn notify(&self, call: EncodingCall<'_>) -> Result<()> {
        match self.hooks.get(call.entry_point()) {
            Some(hook) => hook.observe(&call),
            None => Ok(()),
        }
    }

    pub fn dense_tensor(&self, column: &FeatureColumn, batch: &FeatureBatch) -> Result<Tensor> {
        let result = self.backend.dense_tensor(self, column, batch)?;
        self.notify(EncodingCall::DenseTensor {
            column,
            result: &result,
        })?;
        Ok(result)
    }

    pub fn sparse_tensors(&self, column: &FeatureColumn, batch: &FeatureBatch) -> Result<Tensor> {
        let result = self.backend.sparse_tensors(self, column, batch)?;
        self.notify(EncodingCall::SparseTensors {
            column,
            result: &result,
        })?;
        Ok(result)
    }

    pub fn weighted_sum(&self, column: &FeatureColumn, batch: &FeatureBatch) -> Result<Tensor> {
        let result = self.backend.weighted_sum(self, column, batch)?;
        self.notify(EncodingCall::WeightedSum {
            column,
            result: &result,
        })?;
        Ok(result)
    }

    pub fn transform_features(
        &self,
        columns: &[Arc<FeatureColumn>],
        batch: &FeatureBatch,
    ) -> Result<Vec<(Arc<FeatureColumn>, Tensor)>> {
        let result = self.backend.transform_features(self, columns, batch)?;
        self.notify(EncodingCall::TransformFeatures { result: &result })?;
        Ok(result)
    }

    pub fn export_outputs(
        &self,
        mode: ExportMode,
        predictions: &Predictions,
    ) -> Result<ExportOutputs> {
        let result = self.backend.export_outputs(mode, predictions)?;
        self.notify(EncodingCall::ExportOutputs {
            mode,
            predictions,
            result: &result,
        })?;
        Ok(result)
    }
}

impl fmt::Debug for FeatureEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureEncoder")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Graph-building backend that mints symbolic tensor handles.
///
/// Transformed inputs are cached in the [`FeatureBatch`]; derived ops
/// (one-hot, embedding lookups, weighted sums) get a fresh handle per call.
#[derive(Debug, Default)]
pub struct SymbolicBackend {
    op_counter: AtomicUsize,
}

impl SymbolicBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn op_name(&self, batch: &FeatureBatch, column: &str, op: &str) -> String {
        let n = self.op_counter.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            format!("{}/{}/{}:0", batch.scope(), column, op)
        } else {
            format!("{}/{}/{}_{}:0", batch.scope(), column, op, n)
        }
    }

    /// The cached, hook-free transformation of a column's raw input.
    fn transformed(&self, column: &FeatureColumn, batch: &FeatureBatch) -> Result<Tensor> {
        let name = column.name();
        match column.role() {
            ColumnRole::DenseNumeric { shape } => {
                let raw = batch.feature(name)?;
                batch.cached(name, || {
                    Ok(Tensor::dense(
                        format!("{}/{}/Reshape:0", batch.scope(), name),
                        raw.dtype(),
                        shape,
                    ))
                })
            }
            ColumnRole::RawCategorical(_) | ColumnRole::Weighted { .. } => {
                let base = column.categorical_sub_column().map_or(name, |b| b.name());
                let raw = batch.feature(base)?;
                batch.cached(base, || {
                    Ok(Tensor::sparse(
                        format!("{}/{}/to_sparse_input", batch.scope(), base),
                        raw.dtype(),
                    ))
                })
            }
            ColumnRole::Bucketized { source, .. } => {
                let source = self.transformed(source, batch)?;
                batch.cached(name, || {
                    Ok(Tensor::new(
                        format!("{}/{}/Bucketize:0", batch.scope(), name),
                        DType::Int64,
                        source.layout().clone(),
                    ))
                })
            }
            ColumnRole::Crossed { keys, .. } => {
                for key in keys {
                    self.transformed(key, batch)?;
                }
                batch.cached(name, || {
                    Ok(Tensor::sparse(
                        format!("{}/{}/SparseCross", batch.scope(), name),
                        DType::Int64,
                    ))
                })
            }
            ColumnRole::Densified { kind, base } => {
                self.transformed(base, batch)?;
                let dims = match kind {
                    DensifyKind::Embedding { dimension } => vec![*dimension],
                    DensifyKind::Indicator => vec![1],
                };
                batch.cached(name, || {
                    Ok(Tensor::dense(
                        format!("{}/{}/one_hot:0", batch.scope(), name),
                        DType::Float32,
                        &dims,
                    ))
                })
            }
        }
    }

    fn unsupported(column: &FeatureColumn, operation: &str) -> crate::error::FeatscopeError {
        EncodingError::Unsupported {
            column: column.name().to_string(),
            operation: operation.to_string(),
        }
        .into()
    }
}

impl EncodingBackend for SymbolicBackend {
    fn dense_tensor(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor> {
        match column.role() {
            ColumnRole::DenseNumeric { .. } => self.transformed(column, batch),
            ColumnRole::Bucketized { source, boundaries } => {
                encoder.dense_tensor(source, batch)?;
                Ok(Tensor::dense(
                    self.op_name(batch, column.name(), "one_hot"),
                    DType::Float32,
                    &[boundaries.len() + 1],
                ))
            }
            ColumnRole::Densified { kind, base } => {
                encoder.sparse_tensors(base, batch)?;
                let (op, dims) = match kind {
                    DensifyKind::Embedding { dimension } => {
                        ("embedding_lookup_sparse", vec![*dimension])
                    }
                    DensifyKind::Indicator => ("one_hot", vec![1]),
                };
                Ok(Tensor::dense(
                    self.op_name(batch, column.name(), op),
                    DType::Float32,
                    &dims,
                ))
            }
            _ => Err(Self::unsupported(column, "dense encoding")),
        }
    }

    fn sparse_tensors(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor> {
        match column.role() {
            ColumnRole::RawCategorical(_) => {
                let ids = self.transformed(column, batch)?;
                batch.cached(&format!("{}#ids", column.name()), || {
                    Ok(Tensor::id_weight_pair(ids, None))
                })
            }
            ColumnRole::Weighted { weight_key, .. } => {
                let ids = self.transformed(column, batch)?;
                let weights = batch.feature(weight_key)?.clone();
                batch.cached(&format!("{}#ids", column.name()), || {
                    Ok(Tensor::id_weight_pair(ids, Some(weights)))
                })
            }
            ColumnRole::Bucketized { source, .. } => {
                encoder.dense_tensor(source, batch)?;
                let ids = self.transformed(column, batch)?;
                batch.cached(&format!("{}#ids", column.name()), || {
                    Ok(Tensor::id_weight_pair(ids, None))
                })
            }
            ColumnRole::Crossed { keys, .. } => {
                for key in keys {
                    encoder.sparse_tensors(key, batch)?;
                }
                let ids = self.transformed(column, batch)?;
                batch.cached(&format!("{}#ids", column.name()), || {
                    Ok(Tensor::id_weight_pair(ids, None))
                })
            }
            _ => Err(Self::unsupported(column, "sparse encoding")),
        }
    }

    fn weighted_sum(
        &self,
        encoder: &FeatureEncoder,
        column: &FeatureColumn,
        batch: &FeatureBatch,
    ) -> Result<Tensor> {
        if column.is_categorical() {
            encoder.sparse_tensors(column, batch)?;
        } else {
            encoder.dense_tensor(column, batch)?;
        }
        Ok(Tensor::dense(
            self.op_name(batch, column.name(), "weighted_sum"),
            DType::Float32,
            &[1],
        ))
    }

    fn transform_features(
        &self,
        _encoder: &FeatureEncoder,
        columns: &[Arc<FeatureColumn>],
        batch: &FeatureBatch,
    ) -> Result<Vec<(Arc<FeatureColumn>, Tensor)>> {
        columns
            .iter()
            .map(|column| Ok((column.clone(), self.transformed(column, batch)?)))
            .collect()
    }

    fn export_outputs(&self, mode: ExportMode, predictions: &Predictions) -> Result<ExportOutputs> {
        if predictions.is_empty() {
            return Err(EncodingError::Export {
                message: "prediction dictionary is empty".into(),
            }
            .into());
        }
        Ok(ExportOutputs {
            mode,
            signature: predictions.clone(),
        })
    }
}
