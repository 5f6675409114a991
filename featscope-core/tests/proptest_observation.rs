//! Property-based tests for the interceptor and registry using proptest.

use proptest::prelude::*;

use featscope_core::{
    DType, ExportMode, FeatureBatch, FeatureColumn, FeatureEncoder, Interceptor, Predictions,
    Registry, Result, Tensor,
};

#[derive(Debug, Clone)]
enum Step {
    Numeric,
    Embedding,
    Indicator,
    Linear,
    Trees,
    Export { logits: bool },
    Fail,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Numeric),
        Just(Step::Embedding),
        Just(Step::Indicator),
        Just(Step::Linear),
        Just(Step::Trees),
        any::<bool>().prop_map(|logits| Step::Export { logits }),
        Just(Step::Fail),
    ]
}

fn run(encoder: &FeatureEncoder, steps: &[Step]) -> Result<()> {
    let batch = FeatureBatch::from_features(
        "model",
        [
            Tensor::dense("age:0", DType::Float32, &[1]),
            Tensor::sparse("city:0", DType::String),
        ],
    );
    let age = FeatureColumn::numeric("age", &[1]);
    let city = FeatureColumn::categorical_with_identity("city", 10);
    let zip = FeatureColumn::numeric("zip", &[1]);

    for step in steps {
        match step {
            Step::Numeric => {
                encoder.dense_tensor(&age, &batch)?;
            }
            Step::Embedding => {
                let embedding = FeatureColumn::embedding(city.clone(), 2)?;
                encoder.dense_tensor(&embedding, &batch)?;
            }
            Step::Indicator => {
                let indicator = FeatureColumn::indicator(city.clone())?;
                encoder.dense_tensor(&indicator, &batch)?;
            }
            Step::Linear => {
                encoder.weighted_sum(&city, &batch)?;
            }
            Step::Trees => {
                encoder.transform_features(&[age.clone(), city.clone()], &batch)?;
            }
            Step::Export { logits } => {
                let key = if *logits { "logits" } else { "scores" };
                let mut predictions = Predictions::new();
                predictions.insert(
                    key.to_string(),
                    Tensor::dense("head:0", DType::Float32, &[1]),
                );
                encoder.export_outputs(ExportMode::Predict, &predictions)?;
            }
            Step::Fail => {
                // No "zip" feature in the batch.
                encoder.dense_tensor(&zip, &batch)?;
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn hooks_are_restored_after_any_export(steps in prop::collection::vec(step(), 0..12)) {
        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let before = encoder.hooks().snapshot();

        let outcome = interceptor.observe_export(&mut encoder, None, |enc| run(enc, &steps));

        prop_assert_eq!(encoder.hooks().snapshot(), before);
        prop_assert!(encoder.hooks().is_empty());
        // Only a successful export publishes its registry.
        let completed = usize::from(outcome.is_ok());
        prop_assert_eq!(interceptor.scopes_completed(), completed);
        if outcome.is_err() {
            prop_assert!(interceptor.registry().is_empty());
        }
    }

    #[test]
    fn distinct_handles_are_never_deduplicated(copies in 1usize..20, repeats in 1usize..5) {
        let mut registry = Registry::new();
        let handles: Vec<_> = (0..copies)
            .map(|_| Tensor::dense("age:0", DType::Float32, &[1]))
            .collect();
        for _ in 0..repeats {
            for handle in &handles {
                registry.record_input("age", handle);
            }
        }
        prop_assert_eq!(registry.records_for("age").len(), copies);
    }

    #[test]
    fn encoded_without_input_always_fails(name in "[a-z]{1,12}") {
        let mut registry = Registry::new();
        let tensor = Tensor::dense("enc:0", DType::Float32, &[1]);
        prop_assert!(registry.record_encoded(&name, &tensor).is_err());
    }

    #[test]
    fn crossed_keys_each_gain_one_encoding(n in 2usize..6) {
        let keys: Vec<_> = (0..n)
            .map(|i| FeatureColumn::categorical_with_identity(format!("k{i}"), 4))
            .collect();
        let cross = FeatureColumn::crossed(keys.clone(), 64).unwrap();
        let indicator = FeatureColumn::indicator(cross).unwrap();
        let batch = FeatureBatch::from_features(
            "dnn",
            (0..n).map(|i| Tensor::sparse(format!("k{i}:0"), DType::Int64)),
        );

        let mut encoder = FeatureEncoder::symbolic();
        let mut interceptor = Interceptor::default();
        let result = interceptor
            .observe_export(&mut encoder, None, |enc| enc.dense_tensor(&indicator, &batch))
            .unwrap();

        prop_assert_eq!(interceptor.crossed_feature_names().len(), n);
        for key in &keys {
            prop_assert!(interceptor.crossed_feature_names().contains(key.name()));
            let records = &interceptor.feature_records()[key.name()];
            prop_assert_eq!(records.len(), 1);
            prop_assert_eq!(records[0].encoded_tensors().len(), 1);
            prop_assert!(Tensor::same(&records[0].encoded_tensors()[0], &result));
        }
    }
}
