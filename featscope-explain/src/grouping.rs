//! Grouping of raw attribution inputs into reported features.

use std::collections::{BTreeMap, HashSet};

use featscope_core::metadata::{ALL_MODALITY, ExplainMetadata};
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::response::ExplanationResponse;

/// A parent feature made of several raw inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub name: String,
    pub inputs: Vec<String>,
}

/// Which raw inputs exist (per modality) and how they fold into features.
///
/// ```toml
/// [modalities]
/// all = ["data", "test"]
/// numeric = ["data", "test"]
///
/// [[groups]]
/// name = "combined"
/// inputs = ["data", "test"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGrouping {
    /// Modality name to raw input names. `all` lists every input.
    #[serde(default)]
    pub modalities: BTreeMap<String, Vec<String>>,
    /// Parent features. Inputs not claimed here are reported on their own.
    #[serde(default)]
    pub groups: Vec<FeatureGroup>,
}

impl FeatureGrouping {
    pub fn new(modalities: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            modalities,
            groups: Vec::new(),
        }
    }

    /// Grouping for every input of a model's explain metadata.
    pub fn from_metadata(metadata: &ExplainMetadata) -> Self {
        Self::new(metadata.modality_input_map())
    }

    /// Grouping over the inputs named by a response's first label.
    pub fn from_response(response: &ExplanationResponse) -> Self {
        let inputs = response
            .attributions_by_label
            .first()
            .map(|entry| entry.attributions.keys().cloned().collect())
            .unwrap_or_default();
        Self::new(BTreeMap::from([(ALL_MODALITY.to_string(), inputs)]))
    }

    pub fn with_group(mut self, name: impl Into<String>, inputs: &[&str]) -> Self {
        self.groups.push(FeatureGroup {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Every declared input in declaration order.
    ///
    /// Uses the `all` modality when present, otherwise the union of the
    /// other modalities.
    pub fn inputs(&self) -> Vec<&str> {
        if let Some(all) = self.modalities.get(ALL_MODALITY) {
            return all.iter().map(String::as_str).collect();
        }
        let mut seen = HashSet::new();
        self.modalities
            .values()
            .flatten()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Reported features and the inputs each one reduces over.
    ///
    /// Parent groups come first in declaration order, followed by every
    /// unclaimed input.
    pub fn features(&self) -> Vec<(&str, Vec<&str>)> {
        let claimed: HashSet<&str> = self
            .groups
            .iter()
            .flat_map(|g| g.inputs.iter().map(String::as_str))
            .collect();
        let mut features: Vec<(&str, Vec<&str>)> = self
            .groups
            .iter()
            .map(|g| (g.name.as_str(), g.inputs.iter().map(String::as_str).collect()))
            .collect();
        features.extend(
            self.inputs()
                .into_iter()
                .filter(|name| !claimed.contains(name))
                .map(|name| (name, vec![name])),
        );
        features
    }

    /// Reject groupings whose groups are empty, clash by name, or share inputs.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut claimed = HashSet::new();
        for group in &self.groups {
            if group.inputs.is_empty() {
                return Err(ExplainError::invalid_grouping(format!(
                    "group '{}' has no inputs",
                    group.name
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(ExplainError::invalid_grouping(format!(
                    "group '{}' is declared twice",
                    group.name
                )));
            }
            for input in &group.inputs {
                if !claimed.insert(input.as_str()) {
                    return Err(ExplainError::invalid_grouping(format!(
                        "input '{input}' belongs to more than one group"
                    )));
                }
            }
        }
        Ok(())
    }
}
