//! Aggregation of a two-label explanation response.

use std::collections::BTreeMap;

use featscope_core::error::LookupError;
use featscope_explain::{ExplainError, Explanation, FeatureGrouping};
use ndarray::{ArrayD, IxDyn};
use pretty_assertions::assert_eq;

const RESPONSE: &str = r#"{
  "attributions_by_label": [
    {
      "attributions": {"data": [0.01, 0.02, 0.03], "test": [0.1, 0.2, 0.3]},
      "baseline_score": 0.0001,
      "example_score": 0.4,
      "label_index": 170,
      "output_name": "probability",
      "approx_error": 0.033
    },
    {
      "attributions": {"data": [0.3, 0.01, 0.13], "test": [0.05, 0.02, 0.23]},
      "baseline_score": 0.0002,
      "example_score": 0.17658,
      "label_index": 2,
      "output_name": "probability",
      "approx_error": 0.012
    }
  ]
}"#;

fn explanation() -> Explanation {
    let inputs = vec!["data".to_string(), "test".to_string()];
    let grouping = FeatureGrouping::new(BTreeMap::from([
        ("all".to_string(), inputs.clone()),
        ("numeric".to_string(), inputs),
    ]));
    Explanation::from_json(RESPONSE, grouping).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_default_selects_highest_example_score() {
    let explanation = explanation();
    let attribution = explanation.select_attribution(None).unwrap();
    assert_eq!(attribution.label_index(), 170);
    assert_eq!(attribution.output_name(), "probability");
    assert_close(attribution.approx_error().unwrap(), 0.033);
    assert_close(attribution.baseline_score(), 0.0001);
}

#[test]
fn test_explicit_class_index() {
    let explanation = explanation();
    assert_eq!(
        explanation.select_attribution(Some(2)).unwrap().label_index(),
        2
    );
}

#[test]
fn test_unknown_class_index_fails() {
    let err = explanation().feature_importance(Some(9)).unwrap_err();
    assert!(matches!(
        err,
        ExplainError::Lookup(LookupError::ClassIndexNotFound { class_index: 9 })
    ));
}

#[test]
fn test_feature_importance_sums_magnitudes() {
    let explanation = explanation();
    let importance = explanation.feature_importance(None).unwrap();
    assert_eq!(importance.len(), 2);
    assert_close(importance["data"], 0.06);
    assert_close(importance["test"], 0.6);

    let importance = explanation.feature_importance(Some(2)).unwrap();
    assert_close(importance["data"], 0.44);
    assert_close(importance["test"], 0.3);
}

#[test]
fn test_as_tensors_keeps_raw_values() {
    let explanation = explanation();
    let tensors = explanation.as_tensors(None).unwrap();
    assert_eq!(
        tensors["data"],
        ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.01, 0.02, 0.03]).unwrap()
    );

    let tensors = explanation.as_tensors(Some(2)).unwrap();
    assert_eq!(
        tensors["test"],
        ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.05, 0.02, 0.23]).unwrap()
    );
}

#[test]
fn test_top_feature() {
    let top = explanation().top_k_features(1, None).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0, "test");
}
