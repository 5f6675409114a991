//! Explain-metadata builder.
//!
//! Turns what an export scope observed into the input/output description an
//! explanation service consumes. Users can then rename, retype, or remove
//! entries before finalizing. Persisting the result is left to the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MetadataConfig;
use crate::error::{ConfigError, LookupError, Result};
use crate::registry::{FeatureRecord, Registry};

/// Key of the modality group that lists every input.
pub const ALL_MODALITY: &str = "all";

/// Kind of data an input carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Numeric,
    Categorical,
    Image,
    Text,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Numeric => "numeric",
            Modality::Categorical => "categorical",
            Modality::Image => "image",
            Modality::Text => "text",
        }
    }
}

/// How an input tensor relates to the tensor attributions are computed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Identity,
    BagOfFeatures,
    BagOfFeaturesSparse,
    Indicator,
    CombinedEmbedding,
    ConcatEmbedding,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMetadata {
    pub name: String,
    pub input_tensor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_tensor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices_tensor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_shape_tensor_name: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_baselines: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_feature_mapping: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<serde_json::Value>,
}

impl InputMetadata {
    pub fn new(name: impl Into<String>, input_tensor_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_tensor_name: input_tensor_name.into(),
            ..Default::default()
        }
    }

    /// Describe one observed feature record.
    ///
    /// Crossed constituents share their encoding with the other keys of the
    /// cross, so they are described by their input tensor only.
    fn from_record(name: String, record: &FeatureRecord, crossed: bool) -> Self {
        let input = record.input_tensor();
        let encoded = if crossed {
            None
        } else {
            record.encoded_tensors().first().map(|t| t.name().to_string())
        };

        match input.sparse_components() {
            Some((indices, values, dense_shape)) => Self {
                name,
                input_tensor_name: values.to_string(),
                indices_tensor_name: Some(indices.to_string()),
                dense_shape_tensor_name: Some(dense_shape.to_string()),
                encoding: if encoded.is_some() {
                    Encoding::CombinedEmbedding
                } else {
                    Encoding::BagOfFeaturesSparse
                },
                encoded_tensor_name: encoded,
                modality: Modality::Categorical,
                ..Default::default()
            },
            None => Self {
                name,
                input_tensor_name: input.name().to_string(),
                encoded_tensor_name: encoded,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub name: String,
    pub output_tensor_name: String,
}

/// Complete explain metadata for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainMetadata {
    pub inputs: Vec<InputMetadata>,
    pub outputs: Vec<OutputMetadata>,
    pub framework: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ExplainMetadata {
    /// Input names grouped by modality, plus the `all` group.
    pub fn modality_input_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for input in &self.inputs {
            map.entry(ALL_MODALITY.to_string())
                .or_default()
                .push(input.name.clone());
            map.entry(input.modality.as_str().to_string())
                .or_default()
                .push(input.name.clone());
        }
        map
    }
}

/// Builds and edits [`ExplainMetadata`].
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    inputs: Vec<InputMetadata>,
    outputs: Vec<OutputMetadata>,
    framework: String,
    tags: Vec<String>,
}

impl MetadataBuilder {
    /// Metadata for everything observed during an export scope.
    ///
    /// A feature with several records gets one input per record; records
    /// after the first are suffixed with their position (`age_1`, ...).
    pub fn from_registry(registry: &Registry, config: &MetadataConfig) -> Self {
        let crossed = registry.crossed_feature_names();
        let inputs = registry
            .feature_records()
            .iter()
            .flat_map(|(feature, records)| {
                let is_crossed = crossed.contains(feature);
                records.iter().enumerate().map(move |(i, record)| {
                    let name = if i == 0 {
                        feature.clone()
                    } else {
                        format!("{feature}_{i}")
                    };
                    InputMetadata::from_record(name, record, is_crossed)
                })
            })
            .collect();
        let outputs = registry
            .output_tensors()
            .iter()
            .map(|(key, tensor)| OutputMetadata {
                name: key.clone(),
                output_tensor_name: tensor.name().to_string(),
            })
            .collect();
        Self::with_entries(inputs, outputs, config)
    }

    /// Metadata from a serving signature given as `(name, tensor name)` pairs.
    pub fn from_signature(
        inputs: &[(&str, &str)],
        outputs: &[(&str, &str)],
        config: &MetadataConfig,
    ) -> Self {
        let inputs = inputs
            .iter()
            .map(|(name, tensor)| InputMetadata::new(*name, *tensor))
            .collect();
        let outputs = outputs
            .iter()
            .map(|(name, tensor)| OutputMetadata {
                name: name.to_string(),
                output_tensor_name: tensor.to_string(),
            })
            .collect();
        Self::with_entries(inputs, outputs, config)
    }

    fn with_entries(
        inputs: Vec<InputMetadata>,
        outputs: Vec<OutputMetadata>,
        config: &MetadataConfig,
    ) -> Self {
        let builder = Self {
            inputs,
            outputs,
            framework: config.framework.clone(),
            tags: config.tags.clone(),
        };
        builder.warn_on_multiple_outputs();
        builder
    }

    fn warn_on_multiple_outputs(&self) {
        if self.outputs.len() > 1 {
            warn!(
                outputs = ?self.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
                "There are multiple outputs; only one is supported. Use remove_output_metadata \
                 to reduce the number of outputs to 1 before finalizing"
            );
        }
    }

    fn input_position(&self, name: &str) -> Result<usize> {
        self.inputs
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| {
                LookupError::InputNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn output_position(&self, name: &str) -> Result<usize> {
        self.outputs
            .iter()
            .position(|o| o.name == name)
            .ok_or_else(|| {
                LookupError::OutputNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn input(&self, name: &str) -> Option<&InputMetadata> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn inputs(&self) -> &[InputMetadata] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputMetadata] {
        &self.outputs
    }

    /// Mark an input as numeric, optionally renaming it.
    ///
    /// An index-to-feature mapping switches the encoding to bag-of-features.
    pub fn set_numeric_metadata(
        &mut self,
        input_name: &str,
        new_name: Option<&str>,
        input_baselines: Option<Vec<serde_json::Value>>,
        index_feature_mapping: Option<Vec<String>>,
    ) -> Result<()> {
        let pos = self.input_position(input_name)?;
        let input_tensor_name = self.inputs[pos].input_tensor_name.clone();
        let encoding = if index_feature_mapping.is_some() {
            Encoding::BagOfFeatures
        } else {
            Encoding::Identity
        };
        self.inputs[pos] = InputMetadata {
            name: new_name.unwrap_or(input_name).to_string(),
            input_tensor_name,
            input_baselines,
            index_feature_mapping,
            encoding,
            modality: Modality::Numeric,
            ..Default::default()
        };
        Ok(())
    }

    /// Mark an input as an image, optionally renaming it.
    pub fn set_image_metadata(
        &mut self,
        input_name: &str,
        new_name: Option<&str>,
        input_baselines: Option<Vec<serde_json::Value>>,
        visualization: Option<serde_json::Value>,
    ) -> Result<()> {
        let pos = self.input_position(input_name)?;
        let input_tensor_name = self.inputs[pos].input_tensor_name.clone();
        self.inputs[pos] = InputMetadata {
            name: new_name.unwrap_or(input_name).to_string(),
            input_tensor_name,
            input_baselines,
            visualization,
            modality: Modality::Image,
            ..Default::default()
        };
        Ok(())
    }

    pub fn set_output_metadata(&mut self, output_name: &str, new_name: &str) -> Result<()> {
        let pos = self.output_position(output_name)?;
        self.outputs[pos].name = new_name.to_string();
        Ok(())
    }

    pub fn remove_input_metadata(&mut self, name: &str) -> Result<InputMetadata> {
        let pos = self.input_position(name)?;
        Ok(self.inputs.remove(pos))
    }

    pub fn remove_output_metadata(&mut self, name: &str) -> Result<OutputMetadata> {
        let pos = self.output_position(name)?;
        Ok(self.outputs.remove(pos))
    }

    /// The current metadata. Warns when more than one output remains.
    pub fn metadata(&self) -> ExplainMetadata {
        self.warn_on_multiple_outputs();
        ExplainMetadata {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            framework: self.framework.clone(),
            tags: self.tags.clone(),
        }
    }

    /// The metadata, provided exactly one output is left.
    pub fn finalize(&self) -> Result<ExplainMetadata> {
        if self.outputs.len() > 1 {
            return Err(ConfigError::TooManyOutputs {
                count: self.outputs.len(),
            }
            .into());
        }
        Ok(self.metadata())
    }
}
