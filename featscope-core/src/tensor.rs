//! Opaque tensor handles observed during an export.
//!
//! A [`Tensor`] is a cheap, clonable handle. Clones share identity; two
//! handles minted by separate calls never do, even when every field matches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Float32,
    Float64,
    Int64,
    String,
}

/// Physical layout of a tensor handle.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorLayout {
    /// A dense tensor. `None` marks an unknown (batch) dimension.
    Dense { shape: Vec<Option<usize>> },
    /// A sparse tensor made of three component tensors.
    Sparse {
        indices: String,
        values: String,
        dense_shape: String,
    },
    /// Sparse ids with optional per-id weights.
    IdWeightPair {
        ids: Tensor,
        weights: Option<Tensor>,
    },
}

#[derive(Debug)]
struct TensorInner {
    name: String,
    dtype: DType,
    layout: TensorLayout,
}

/// Handle to a tensor in the model graph.
#[derive(Clone)]
pub struct Tensor(Arc<TensorInner>);

impl Tensor {
    pub fn new(name: impl Into<String>, dtype: DType, layout: TensorLayout) -> Self {
        Self(Arc::new(TensorInner {
            name: name.into(),
            dtype,
            layout,
        }))
    }

    /// A dense tensor with a leading batch dimension followed by `dims`.
    pub fn dense(name: impl Into<String>, dtype: DType, dims: &[usize]) -> Self {
        let mut shape = Vec::with_capacity(dims.len() + 1);
        shape.push(None);
        shape.extend(dims.iter().copied().map(Some));
        Self::new(name, dtype, TensorLayout::Dense { shape })
    }

    /// A sparse tensor whose components are named after `name`.
    pub fn sparse(name: impl Into<String>, dtype: DType) -> Self {
        let name = name.into();
        let layout = TensorLayout::Sparse {
            indices: format!("{name}/indices"),
            values: format!("{name}/values"),
            dense_shape: format!("{name}/dense_shape"),
        };
        Self::new(name, dtype, layout)
    }

    /// Wrap sparse ids (and optional weights) into a single handle.
    pub fn id_weight_pair(ids: Tensor, weights: Option<Tensor>) -> Self {
        let name = ids.name().to_string();
        let dtype = ids.dtype();
        Self::new(name, dtype, TensorLayout::IdWeightPair { ids, weights })
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.0.layout
    }

    pub fn is_sparse(&self) -> bool {
        match &self.0.layout {
            TensorLayout::Dense { .. } => false,
            TensorLayout::Sparse { .. } => true,
            TensorLayout::IdWeightPair { ids, .. } => ids.is_sparse(),
        }
    }

    /// The `(indices, values, dense_shape)` component names of a sparse handle.
    pub fn sparse_components(&self) -> Option<(&str, &str, &str)> {
        match &self.0.layout {
            TensorLayout::Sparse {
                indices,
                values,
                dense_shape,
            } => Some((indices, values, dense_shape)),
            TensorLayout::IdWeightPair { ids, .. } => ids.sparse_components(),
            TensorLayout::Dense { .. } => None,
        }
    }

    /// Identity comparison: true only for clones of the same handle.
    pub fn same(a: &Tensor, b: &Tensor) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Value comparison of name, dtype and layout.
    pub fn structurally_eq(&self, other: &Tensor) -> bool {
        self.0.name == other.0.name
            && self.0.dtype == other.0.dtype
            && self.0.layout == other.0.layout
    }
}

// Structural; registry de-duplication goes through `Tensor::same` instead.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.0.name)
            .field("dtype", &self.0.dtype)
            .field("layout", &self.0.layout)
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}
