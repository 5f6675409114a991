//! Feature-column roles.
//!
//! Every feature-encoding entity declares which role it plays from a small
//! closed set. The interceptor dispatches on the role instead of probing for
//! capabilities at runtime.

use std::sync::Arc;

use crate::error::{ConsistencyError, EncodingError, FeatscopeError};

/// Where the ids of a raw categorical column come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoricalSource {
    VocabularyList { vocabulary: Vec<String> },
    VocabularyFile { path: String, vocabulary_size: usize },
    Identity { num_buckets: usize },
    HashBucket { hash_bucket_size: usize },
}

/// How a categorical column is turned into a dense representation.
#[derive(Debug, Clone, PartialEq)]
pub enum DensifyKind {
    Embedding { dimension: usize },
    Indicator,
}

/// The role a feature column plays in the encoding pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRole {
    RawCategorical(CategoricalSource),
    /// Transparent weighting wrapper around a categorical column.
    Weighted {
        base: Arc<FeatureColumn>,
        weight_key: String,
    },
    /// Dual-natured: usable as dense or categorical.
    Bucketized {
        source: Arc<FeatureColumn>,
        boundaries: Vec<f64>,
    },
    Crossed {
        keys: Vec<Arc<FeatureColumn>>,
        hash_bucket_size: usize,
    },
    DenseNumeric {
        shape: Vec<usize>,
    },
    Densified {
        kind: DensifyKind,
        base: Arc<FeatureColumn>,
    },
}

/// A named feature column.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    name: String,
    role: ColumnRole,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, role: ColumnRole) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            role,
        })
    }

    pub fn numeric(name: impl Into<String>, shape: &[usize]) -> Arc<Self> {
        Self::new(
            name,
            ColumnRole::DenseNumeric {
                shape: shape.to_vec(),
            },
        )
    }

    pub fn categorical_with_vocabulary_list(
        name: impl Into<String>,
        vocabulary: &[&str],
    ) -> Arc<Self> {
        let vocabulary = vocabulary.iter().map(|v| v.to_string()).collect();
        Self::new(
            name,
            ColumnRole::RawCategorical(CategoricalSource::VocabularyList { vocabulary }),
        )
    }

    pub fn categorical_with_vocabulary_file(
        name: impl Into<String>,
        path: impl Into<String>,
        vocabulary_size: usize,
    ) -> Arc<Self> {
        Self::new(
            name,
            ColumnRole::RawCategorical(CategoricalSource::VocabularyFile {
                path: path.into(),
                vocabulary_size,
            }),
        )
    }

    pub fn categorical_with_identity(name: impl Into<String>, num_buckets: usize) -> Arc<Self> {
        Self::new(
            name,
            ColumnRole::RawCategorical(CategoricalSource::Identity { num_buckets }),
        )
    }

    pub fn categorical_with_hash_bucket(
        name: impl Into<String>,
        hash_bucket_size: usize,
    ) -> Arc<Self> {
        Self::new(
            name,
            ColumnRole::RawCategorical(CategoricalSource::HashBucket { hash_bucket_size }),
        )
    }

    /// Bucketize a numeric column. Named `<source>_bucketized`.
    pub fn bucketized(
        source: Arc<FeatureColumn>,
        boundaries: &[f64],
    ) -> Result<Arc<Self>, FeatscopeError> {
        if !matches!(source.role, ColumnRole::DenseNumeric { .. }) {
            return Err(EncodingError::Unsupported {
                column: source.name.clone(),
                operation: "bucketization".into(),
            }
            .into());
        }
        let name = format!("{}_bucketized", source.name);
        Ok(Self::new(
            name,
            ColumnRole::Bucketized {
                source,
                boundaries: boundaries.to_vec(),
            },
        ))
    }

    /// Cross categorical (or bucketized) columns. Named by the sorted key names joined with `_X_`.
    pub fn crossed(
        keys: Vec<Arc<FeatureColumn>>,
        hash_bucket_size: usize,
    ) -> Result<Arc<Self>, FeatscopeError> {
        if let Some(key) = keys.iter().find(|k| !k.is_categorical()) {
            return Err(ConsistencyError::NotCategorical {
                column: key.name.clone(),
            }
            .into());
        }
        let mut names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
        names.sort_unstable();
        let name = names.join("_X_");
        Ok(Self::new(
            name,
            ColumnRole::Crossed {
                keys,
                hash_bucket_size,
            },
        ))
    }

    /// Weight a categorical column by another feature. Named `<base>_weighted_by_<key>`.
    pub fn weighted(
        base: Arc<FeatureColumn>,
        weight_key: impl Into<String>,
    ) -> Result<Arc<Self>, FeatscopeError> {
        let weight_key = weight_key.into();
        Self::require_categorical(&base)?;
        let name = format!("{}_weighted_by_{}", base.name, weight_key);
        Ok(Self::new(name, ColumnRole::Weighted { base, weight_key }))
    }

    pub fn embedding(
        base: Arc<FeatureColumn>,
        dimension: usize,
    ) -> Result<Arc<Self>, FeatscopeError> {
        Self::require_categorical(&base)?;
        let name = format!("{}_embedding", base.name);
        Ok(Self::new(
            name,
            ColumnRole::Densified {
                kind: DensifyKind::Embedding { dimension },
                base,
            },
        ))
    }

    pub fn indicator(base: Arc<FeatureColumn>) -> Result<Arc<Self>, FeatscopeError> {
        Self::require_categorical(&base)?;
        let name = format!("{}_indicator", base.name);
        Ok(Self::new(
            name,
            ColumnRole::Densified {
                kind: DensifyKind::Indicator,
                base,
            },
        ))
    }

    fn require_categorical(column: &FeatureColumn) -> Result<(), FeatscopeError> {
        if column.is_categorical() {
            Ok(())
        } else {
            Err(ConsistencyError::NotCategorical {
                column: column.name.clone(),
            }
            .into())
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &ColumnRole {
        &self.role
    }

    /// The nested categorical column of a densifying or weighting wrapper.
    pub fn categorical_sub_column(&self) -> Option<&Arc<FeatureColumn>> {
        match &self.role {
            ColumnRole::Densified { base, .. } | ColumnRole::Weighted { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn crossed_keys(&self) -> Option<&[Arc<FeatureColumn>]> {
        match &self.role {
            ColumnRole::Crossed { keys, .. } => Some(keys),
            _ => None,
        }
    }

    pub fn is_bucketized(&self) -> bool {
        matches!(self.role, ColumnRole::Bucketized { .. })
    }

    pub fn is_crossed(&self) -> bool {
        matches!(self.role, ColumnRole::Crossed { .. })
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self.role, ColumnRole::Weighted { .. })
    }

    pub fn is_categorical(&self) -> bool {
        matches!(
            self.role,
            ColumnRole::RawCategorical(_)
                | ColumnRole::Weighted { .. }
                | ColumnRole::Bucketized { .. }
                | ColumnRole::Crossed { .. }
        )
    }

    pub fn is_dense(&self) -> bool {
        matches!(
            self.role,
            ColumnRole::DenseNumeric { .. }
                | ColumnRole::Densified { .. }
                | ColumnRole::Bucketized { .. }
        )
    }

    /// Names of the raw features this column reads from the input batch.
    pub fn parse_keys(&self) -> Vec<&str> {
        match &self.role {
            ColumnRole::RawCategorical(_) | ColumnRole::DenseNumeric { .. } => vec![self.name.as_str()],
            ColumnRole::Weighted { base, weight_key } => {
                let mut keys = base.parse_keys();
                keys.push(weight_key.as_str());
                keys
            }
            ColumnRole::Bucketized { source, .. } => source.parse_keys(),
            ColumnRole::Densified { base, .. } => base.parse_keys(),
            ColumnRole::Crossed { keys, .. } => keys.iter().flat_map(|k| k.parse_keys()).collect(),
        }
    }
}
