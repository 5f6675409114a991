//! Error types for the featscope core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering scope configuration, observation consistency, lookups, and the
//! wrapped encoding backend.

/// Top-level error type for the featscope core library.
#[derive(Debug, thiserror::Error)]
pub enum FeatscopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from scope setup, output-key resolution, and config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("An export scope is already active on this encoder")]
    ScopeActive,

    #[error("Output key {key} is not found")]
    OutputKeyNotFound { key: String },

    #[error("Output keys are not specified and not inferred (available: {available:?})")]
    OutputKeyNotInferred { available: Vec<String> },

    #[error("Number of outputs is {count}, only one is supported")]
    TooManyOutputs { count: usize },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// Violations of the observation ordering invariants.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error("Trying to add encoded tensors with no input tensor for feature '{feature}'")]
    EncodedWithoutInput { feature: String },

    #[error("Column '{column}' is not categorical")]
    NotCategorical { column: String },
}

/// Requests for identifiers that do not exist.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Attribution for class index {class_index} does not exist")]
    ClassIndexNotFound { class_index: i64 },

    #[error("Input with name '{name}' does not exist")]
    InputNotFound { name: String },

    #[error("Output with name '{name}' does not exist")]
    OutputNotFound { name: String },

    #[error("No attribution values for input '{name}'")]
    AttributionNotFound { name: String },

    #[error("Explanation response contains no attributions")]
    EmptyResponse,
}

/// Failure reported by the wrapped encoding backend itself.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Column '{column}' does not support {operation}")]
    Unsupported { column: String, operation: String },

    #[error("Missing feature '{name}' in the input batch")]
    MissingFeature { name: String },

    #[error("Export failed: {message}")]
    Export { message: String },
}

/// Convenience result type for featscope operations.
pub type Result<T> = std::result::Result<T, FeatscopeError>;
