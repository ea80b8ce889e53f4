//! Simulated training. Needs no numeric library and is always available.

use super::{BUNDLE_VERSION, BackendKind, RunContext, TrainingBackend, finish_bundle};
use crate::bundle::{BundleSpec, ModelBundle, SchemaKind, TensorSchema};
use crate::device::ComputeDevice;
use crate::error::TrainingResult;
use crate::events::EventSink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

pub const MODEL_FILE: &str = "model.bin";
pub const MODEL_CONTENTS: &[u8] = b"MOCK_MODEL_DATA";

#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

/// Loss and accuracy reported for a zero-based epoch, before jitter.
pub fn simulated_metrics(epoch: u64) -> (f64, f64) {
    let loss = 1.0 / (epoch + 1) as f64;
    let accuracy = (0.5 + epoch as f64 * 0.05).min(0.99);
    (loss, accuracy)
}

impl TrainingBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn run(&self, ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
        let cfg = &ctx.config.mock;
        cfg.validate()?;
        sink.info("Running mock training (no training library selected)")?;
        sink.device(ComputeDevice::Cpu)?;

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let delay = Duration::from_millis(cfg.step_delay_ms);

        for epoch in 0..cfg.epochs {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let (mut loss, accuracy) = simulated_metrics(epoch);
            if cfg.jitter {
                loss += rng.gen_range(-0.05..0.05);
            }

            sink.metric("loss", loss, epoch + 1)?;
            sink.metric("accuracy", accuracy, epoch + 1)?;
            sink.progress(epoch + 1, cfg.epochs)?;
            sink.info(&format!(
                "Epoch {}/{}: loss={loss:.4}, accuracy={accuracy:.4}",
                epoch + 1,
                cfg.epochs
            ))?;
        }

        let model_dir = ctx.layout.ensure_model_dir()?;
        let model_file = model_dir.join(MODEL_FILE);
        std::fs::write(&model_file, MODEL_CONTENTS)?;

        let bundle = finish_bundle(
            &BundleSpec {
                dir: model_dir,
                model_file,
                name: "mock_model".to_string(),
                version: BUNDLE_VERSION.to_string(),
                framework: "mock".to_string(),
                inputs: TensorSchema::new(SchemaKind::Array, vec![None, Some(10)], "float32"),
                outputs: TensorSchema::new(SchemaKind::Array, vec![None], "int32"),
                requirements: Vec::new(),
            },
            sink,
        )?;
        sink.info("Mock training complete")?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::device::HostDeviceProbe;
    use crate::events::{EventBody, MemorySink};
    use crate::layout::RunLayout;
    use serde_json::json;
    use tempfile::TempDir;

    fn run_mock(config: serde_json::Value) -> (TempDir, MemorySink, ModelBundle) {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::from_value(config).unwrap();
        let layout = RunLayout::new(temp.path().join("out"));
        let ctx = RunContext {
            run_id: "unit",
            config: &config,
            dataset: None,
            layout: &layout,
            probe: &HostDeviceProbe,
        };
        let sink = MemorySink::new();
        let bundle = MockBackend.run(&ctx, &sink).unwrap();
        (temp, sink, bundle)
    }

    #[test]
    fn test_simulated_metrics() {
        assert_eq!(simulated_metrics(0), (1.0, 0.5));
        let (loss, acc) = simulated_metrics(3);
        assert!((loss - 0.25).abs() < 1e-12);
        assert!((acc - 0.65).abs() < 1e-12);
        assert!((simulated_metrics(40).1 - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_mock_run_emits_expected_metrics() {
        let (_temp, sink, bundle) = run_mock(json!({"epochs": 3, "step_delay_ms": 0}));

        let losses: Vec<(f64, u64)> = sink
            .bodies()
            .into_iter()
            .filter_map(|b| match b {
                EventBody::Metric { key, value, step } if key == "loss" => Some((value, step)),
                _ => None,
            })
            .collect();
        assert_eq!(losses.len(), 3);
        assert_eq!(losses[0], (1.0, 1));
        assert_eq!(losses[1], (0.5, 2));
        assert!((losses[2].0 - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(losses[2].1, 3);

        let progress: Vec<(u64, u64)> = sink
            .bodies()
            .into_iter()
            .filter_map(|b| match b {
                EventBody::Progress { current, total } => Some((current, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);

        assert_eq!(std::fs::read(&bundle.model_path).unwrap(), MODEL_CONTENTS);
        assert_eq!(bundle.read_metadata().unwrap().framework, "mock");
        assert!(bundle.read_requirements().unwrap().is_empty());
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let (_temp, sink, _) = run_mock(json!({"epochs": 5, "step_delay_ms": 0, "jitter": true}));
        for body in sink.bodies() {
            if let EventBody::Metric { key, value, step } = body {
                if key == "loss" {
                    let (base, _) = simulated_metrics(step - 1);
                    assert!((value - base).abs() <= 0.05, "loss {value} at step {step}");
                }
            }
        }
    }
}
