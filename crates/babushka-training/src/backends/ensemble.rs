//! Tabular-ensemble backend: a random forest grown in warm-start steps.

use super::{BackendKind, RunContext, TrainingBackend};
use crate::bundle::ModelBundle;
use crate::error::TrainingResult;
use crate::events::EventSink;

pub const MODEL_FILE: &str = "forest.json";
pub const FRAMEWORK: &str = "babushka-forest";
pub const BUNDLE_NAME: &str = "tabular_classifier";

#[derive(Debug, Clone, Copy, Default)]
pub struct EnsembleBackend;

impl TrainingBackend for EnsembleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ensemble
    }

    fn run(&self, ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
        #[cfg(feature = "ensemble")]
        {
            train(ctx, sink)
        }
        #[cfg(not(feature = "ensemble"))]
        {
            let _ = (ctx, sink);
            Err(crate::error::TrainingError::BackendUnavailable(BackendKind::Ensemble.id()))
        }
    }
}

/// Tree counts visited while growing: `1, 1+k, 1+2k, ...` below or at `total`,
/// with `k = max(1, total / 10)`.
pub fn growth_schedule(total: usize) -> impl Iterator<Item = usize> {
    (1..=total).step_by((total / 10).max(1))
}

#[cfg(feature = "ensemble")]
fn train(ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
    use super::forest::{ForestParams, RandomForest};
    use super::{BUNDLE_VERSION, TEST_FRACTION, finish_bundle};
    use crate::bundle::{BundleSpec, SchemaKind, TensorSchema};
    use crate::dataset::{accuracy, load_or_synthesize};
    use crate::device::ComputeDevice;

    let cfg = &ctx.config.ensemble;
    cfg.validate()?;
    sink.info("Starting tabular classifier training")?;
    sink.device(ComputeDevice::Cpu)?;

    let data = load_or_synthesize(ctx.dataset, cfg.n_samples, cfg.n_features, cfg.seed, sink)?;
    let (train, test) = data.train_test_split(TEST_FRACTION, cfg.seed)?;
    sink.info(&format!("Training on {} samples, testing on {}", train.len(), test.len()))?;

    let mut forest = RandomForest::new(ForestParams { max_depth: cfg.max_depth, seed: cfg.seed }, data.n_classes());
    let total = cfg.n_estimators as u64;
    let mut last_reported = 0;

    for size in growth_schedule(cfg.n_estimators) {
        forest.grow_to(&train, size)?;
        let train_acc = accuracy(&forest.predict(train.features()), train.labels());
        let test_acc = accuracy(&forest.predict(test.features()), test.labels());
        let step = size as u64;

        sink.metric("train_accuracy", train_acc, step)?;
        sink.metric("test_accuracy", test_acc, step)?;
        sink.progress(step, total)?;
        sink.info(&format!(
            "Trees: {size}/{total}, train_acc={train_acc:.4}, test_acc={test_acc:.4}"
        ))?;
        last_reported = size;
    }

    forest.grow_to(&train, cfg.n_estimators)?;
    if last_reported != cfg.n_estimators {
        sink.progress(total, total)?;
    }
    let final_acc = accuracy(&forest.predict(test.features()), test.labels());

    let model_dir = ctx.layout.ensure_model_dir()?;
    let model_file = model_dir.join(MODEL_FILE);
    forest.save(&model_file)?;
    tracing::debug!(run_id = ctx.run_id, path = %model_file.display(), "forest saved");

    let bundle = finish_bundle(
        &BundleSpec {
            dir: model_dir,
            model_file,
            name: BUNDLE_NAME.to_string(),
            version: BUNDLE_VERSION.to_string(),
            framework: FRAMEWORK.to_string(),
            inputs: TensorSchema::new(SchemaKind::Array, vec![None, Some(data.n_features())], "float32"),
            outputs: TensorSchema::new(SchemaKind::Array, vec![None], "int32"),
            requirements: vec![
                concat!("babushka-training==", env!("CARGO_PKG_VERSION")).to_string(),
                "ndarray>=0.16".to_string(),
                "rayon>=1.8".to_string(),
            ],
        },
        sink,
    )?;

    sink.info(&format!("Training complete. Final test accuracy: {final_acc:.4}"))?;
    sink.metric("final_accuracy", final_acc, total)?;
    Ok(bundle)
}
