//! Explanation aggregation for featscope.
//!
//! Turns a per-label attribution response into per-feature importance
//! scores and input-shaped attribution arrays.

pub mod attribution;
pub mod error;
pub mod explanation;
pub mod grouping;
pub mod response;

pub use attribution::Attribution;
pub use error::{ExplainError, Result};
pub use explanation::Explanation;
pub use grouping::{FeatureGroup, FeatureGrouping};
pub use response::{AttributionEntry, ExplanationResponse};
