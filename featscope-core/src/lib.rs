//! # featscope-core
//!
//! Observes which tensors carry each named input feature through a model
//! export, so explanations computed on internal tensors can be attributed
//! back to the features a user knows.
//!
//! The [`Interceptor`] installs recording hooks on a [`FeatureEncoder`] for
//! the duration of an [`ExportScope`]. The resulting [`Registry`] feeds the
//! [`MetadataBuilder`].

pub mod column;
pub mod config;
pub mod encoder;
pub mod error;
pub mod interceptor;
pub mod metadata;
pub mod registry;
pub mod tensor;

// Re-export commonly used types at the crate root.
pub use column::{CategoricalSource, ColumnRole, DensifyKind, FeatureColumn};
pub use config::{FeatscopeConfig, Reduction, load_config};
pub use encoder::{
    CallObserver, EncodingBackend, EncodingCall, EntryPoint, ExportMode, ExportOutputs,
    FeatureBatch, FeatureEncoder, HookSnapshot, HookTable, Predictions, SymbolicBackend,
};
pub use error::{FeatscopeError, Result};
pub use interceptor::{ExportScope, Interceptor};
pub use metadata::{
    ALL_MODALITY, Encoding, ExplainMetadata, InputMetadata, MetadataBuilder, Modality,
    OutputMetadata,
};
pub use registry::{FeatureRecord, Registry};
pub use tensor::{DType, Tensor, TensorLayout};
