//! Subcommand handlers. Each returns the text to print.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use featscope_core::FeatscopeConfig;
use featscope_explain::{Explanation, ExplanationResponse, FeatureGrouping};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<String> {
    let config = featscope_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    match command {
        Commands::Importance {
            response,
            groups,
            class,
            top_k,
            json,
        } => {
            let explanation = load_explanation(&response, groups.as_deref(), &config)?;
            let k = top_k.unwrap_or(config.explain.top_k);
            let ranked = explanation.top_k_features(k, class)?;
            info!(
                label_index = explanation.select_attribution(class)?.label_index(),
                features = ranked.len(),
                "Ranked features"
            );
            if json {
                let map: serde_json::Map<String, serde_json::Value> = ranked
                    .into_iter()
                    .map(|(name, score)| (name, serde_json::Value::from(score)))
                    .collect();
                return Ok(serde_json::to_string_pretty(&map)?);
            }
            let width = ranked.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            let mut out = String::new();
            for (name, score) in ranked {
                writeln!(out, "{name:<width$}  {score:.6}")?;
            }
            Ok(out.trim_end().to_string())
        }
        Commands::Tensors {
            response,
            groups,
            class,
        } => {
            let explanation = load_explanation(&response, groups.as_deref(), &config)?;
            let tensors = explanation.as_tensors(class)?;
            let mut out = String::new();
            for (name, array) in tensors {
                writeln!(out, "{name} {:?}:", array.shape())?;
                writeln!(out, "{array}")?;
            }
            Ok(out.trim_end().to_string())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => Ok(toml::to_string_pretty(&config)?),
        },
    }
}

fn load_explanation(
    response: &Path,
    groups: Option<&Path>,
    config: &FeatscopeConfig,
) -> anyhow::Result<Explanation> {
    let raw = std::fs::read_to_string(response)
        .with_context(|| format!("Failed to read response {}", response.display()))?;
    let response = ExplanationResponse::from_json(&raw)?;
    let grouping = match groups {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read groups {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Invalid grouping file {}", path.display()))?
        }
        None => FeatureGrouping::from_response(&response),
    };
    Ok(Explanation::from_response(&response, grouping)?.with_reduction(config.explain.reduction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const RESPONSE: &str = r#"{"attributions_by_label": [
        {"attributions": {"data": [0.01, 0.02, 0.03], "test": [0.1, 0.2, 0.3]},
         "baseline_score": 0.0, "example_score": 0.4, "label_index": 170},
        {"attributions": {"data": [0.3, 0.01, 0.13], "test": [0.05, 0.02, 0.23]},
         "baseline_score": 0.0, "example_score": 0.17658, "label_index": 2}
    ]}"#;

    fn write_response(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("response.json");
        std::fs::write(&path, RESPONSE).unwrap();
        path
    }

    #[test]
    fn test_importance_text() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Importance {
            response: write_response(&dir),
            groups: None,
            class: None,
            top_k: None,
            json: false,
        };
        let out = handle_command(command, dir.path()).unwrap();
        assert_eq!(out, "test  0.600000\ndata  0.060000");
    }

    #[test]
    fn test_importance_json_with_groups() {
        let dir = TempDir::new().unwrap();
        let groups = dir.path().join("groups.toml");
        std::fs::write(
            &groups,
            "[modalities]\nall = [\"data\", \"test\"]\n\n[[groups]]\nname = \"both\"\ninputs = [\"data\", \"test\"]\n",
        )
        .unwrap();
        let command = Commands::Importance {
            response: write_response(&dir),
            groups: Some(groups),
            class: Some(2),
            top_k: Some(5),
            json: true,
        };
        let out = handle_command(command, dir.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let both = parsed["both"].as_f64().unwrap();
        assert!((both - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_class_fails() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Tensors {
            response: write_response(&dir),
            groups: None,
            class: Some(9),
        };
        let err = handle_command(command, dir.path()).unwrap_err();
        assert!(err.to_string().contains("9"));
    }

    #[test]
    fn test_tensors_lists_inputs() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Tensors {
            response: write_response(&dir),
            groups: None,
            class: None,
        };
        let out = handle_command(command, dir.path()).unwrap();
        assert!(out.starts_with("data [3]:"));
        assert!(out.contains("test [3]:"));
    }

    #[test]
    fn test_config_show_reads_workspace() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".featscope");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[explain]\ntop_k = 1\n").unwrap();

        let out = handle_command(
            Commands::Config {
                action: ConfigAction::Show,
            },
            dir.path(),
        )
        .unwrap();
        let parsed: FeatscopeConfig = toml::from_str(&out).unwrap();
        assert_eq!(parsed.explain.top_k, 1);
    }
}
