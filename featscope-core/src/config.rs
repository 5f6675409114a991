//! Configuration system for featscope.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory and/or `.featscope/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level featscope configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatscopeConfig {
    /// Export-scope observation settings.
    #[serde(default)]
    pub export: ExportConfig,
    /// Explanation aggregation settings.
    #[serde(default)]
    pub explain: ExplainConfig,
    /// Explain-metadata generation settings.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Settings for the export-output hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Explicit key in the prediction dictionary. When unset the key is inferred.
    #[serde(default)]
    pub output_key: Option<String>,
    /// Keys tried in order when no explicit output key is configured.
    #[serde(default = "default_inferred_output_keys")]
    pub inferred_output_keys: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_key: None,
            inferred_output_keys: default_inferred_output_keys(),
        }
    }
}

fn default_inferred_output_keys() -> Vec<String> {
    vec!["logits".to_string(), "predictions".to_string()]
}

/// How sub-feature attributions are folded into one importance score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum of absolute values.
    #[default]
    MagnitudeSum,
    /// Signed sum.
    Sum,
}

impl Reduction {
    pub fn reduce<'a>(&self, values: impl IntoIterator<Item = &'a f64>) -> f64 {
        match self {
            Reduction::MagnitudeSum => values.into_iter().map(|v| v.abs()).sum(),
            Reduction::Sum => values.into_iter().sum(),
        }
    }
}

/// Explanation aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainConfig {
    #[serde(default)]
    pub reduction: Reduction,
    /// Default number of features reported by top-k queries.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            reduction: Reduction::default(),
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

/// Explain-metadata generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataConfig {
    /// Tags written alongside the metadata.
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Framework identifier written into the metadata.
    #[serde(default = "default_framework")]
    pub framework: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            tags: default_tags(),
            framework: default_framework(),
        }
    }
}

fn default_tags() -> Vec<String> {
    vec!["explain".to_string()]
}

fn default_framework() -> String {
    "tensorflow".to_string()
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `FEATSCOPE_`)
/// 3. Workspace-local config (`.featscope/config.toml`)
/// 4. User config (`~/.config/featscope/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&FeatscopeConfig>,
) -> Result<FeatscopeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FeatscopeConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "featscope", "featscope") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".featscope").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // FEATSCOPE_EXPORT__OUTPUT_KEY, FEATSCOPE_EXPLAIN__TOP_K, etc.
    figment = figment.merge(Env::prefixed("FEATSCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}
