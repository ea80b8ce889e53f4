//! Neural-network backend: a feed-forward binary classifier trained with burn.

use super::{BackendKind, RunContext, TrainingBackend};
use crate::bundle::ModelBundle;
use crate::error::TrainingResult;
use crate::events::EventSink;

/// Parameters-only checkpoint, the bundle's canonical model.
pub const PARAMS_FILE: &str = "model.mpk";
/// Architecture plus parameters.
pub const FULL_CHECKPOINT_FILE: &str = "model_full.json";
pub const FRAMEWORK: &str = "burn";
pub const BUNDLE_NAME: &str = "neural_classifier";

#[derive(Debug, Clone, Copy, Default)]
pub struct NeuralBackend;

impl TrainingBackend for NeuralBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Neural
    }

    fn run(&self, ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
        #[cfg(feature = "neural")]
        {
            network::train(ctx, sink)
        }
        #[cfg(not(feature = "neural"))]
        {
            let _ = (ctx, sink);
            Err(crate::error::TrainingError::BackendUnavailable(BackendKind::Neural.id()))
        }
    }
}

#[cfg(feature = "neural")]
pub use network::{Classifier, ClassifierConfig};

#[cfg(feature = "neural")]
mod network {
    use super::{BUNDLE_NAME, FRAMEWORK, FULL_CHECKPOINT_FILE, PARAMS_FILE};
    use crate::backends::{BUNDLE_VERSION, RunContext, TEST_FRACTION, finish_bundle};
    use crate::bundle::{BundleSpec, ModelBundle, SchemaKind, TensorSchema};
    use crate::dataset::{Dataset, accuracy, load_or_synthesize};
    use crate::error::{TrainingError, TrainingResult};
    use crate::events::EventSink;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
    use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::prelude::*;
    use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record};
    use burn::tensor::TensorData;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use serde::Serialize;
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::Path;

    type InferBackend = NdArray<f32>;
    type TrainBackend = Autodiff<InferBackend>;

    /// Output width; labels are 0 or 1.
    const N_CLASSES: usize = 2;

    #[derive(Config, Debug)]
    pub struct ClassifierConfig {
        pub n_features: usize,
        pub hidden_dims: Vec<usize>,
        #[config(default = 0.2)]
        pub dropout: f64,
        #[config(default = 2)]
        pub n_classes: usize,
    }

    impl ClassifierConfig {
        pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
            let mut hidden = Vec::with_capacity(self.hidden_dims.len());
            let mut width = self.n_features;
            for &next in &self.hidden_dims {
                hidden.push(LinearConfig::new(width, next).init(device));
                width = next;
            }
            Classifier {
                hidden,
                output: LinearConfig::new(width, self.n_classes).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
                activation: Relu::new(),
            }
        }
    }

    /// ```text
    /// Input:  [batch, n_features]
    /// Hidden: Linear -> ReLU -> Dropout, once per hidden_dims entry
    /// Output: Linear -> [batch, n_classes] logits
    /// ```
    #[derive(Module, Debug)]
    pub struct Classifier<B: Backend> {
        hidden: Vec<Linear<B>>,
        output: Linear<B>,
        dropout: Dropout,
        activation: Relu,
    }

    impl<B: Backend> Classifier<B> {
        pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
            let x = self.hidden.iter().fold(input, |x, layer| {
                self.dropout.forward(self.activation.forward(layer.forward(x)))
            });
            self.output.forward(x)
        }
    }

    fn features_tensor<B: Backend>(data: &Dataset, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let n_features = data.n_features();
        let mut values = Vec::with_capacity(rows.len() * n_features);
        for &r in rows {
            values.extend(data.row(r).iter().copied());
        }
        Tensor::from_data(TensorData::new(values, [rows.len(), n_features]), device)
    }

    fn labels_tensor<B: Backend>(data: &Dataset, rows: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
        let labels: Vec<i64> = rows.iter().map(|&r| i64::from(data.labels()[r])).collect();
        Tensor::from_data(TensorData::new(labels, [rows.len()]), device)
    }

    /// Accuracy of `model` over every row of `data`.
    fn evaluate<B: Backend>(model: &Classifier<B>, data: &Dataset, device: &B::Device) -> TrainingResult<f64> {
        let rows: Vec<usize> = (0..data.len()).collect();
        let predicted = model.forward(features_tensor(data, &rows, device)).argmax(1).flatten::<1>(0, 1);
        let predicted: Vec<i64> = predicted
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| TrainingError::Trainer(format!("failed to read predictions: {e:?}")))?;
        let predicted: Vec<u32> = predicted.into_iter().map(|p| p as u32).collect();
        Ok(accuracy(&predicted, data.labels()))
    }

    fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> TrainingResult<f64> {
        let values: Vec<f32> = tensor
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| TrainingError::Trainer(format!("failed to read loss: {e:?}")))?;
        values
            .first()
            .map(|&v| f64::from(v))
            .ok_or_else(|| TrainingError::Trainer("empty loss tensor".to_string()))
    }

    #[derive(Serialize)]
    struct FullCheckpoint<'a, P> {
        config: &'a ClassifierConfig,
        params: P,
    }

    fn write_full_checkpoint(
        path: &Path,
        config: &ClassifierConfig,
        model: Classifier<InferBackend>,
    ) -> TrainingResult<()> {
        let params = model.into_record().into_item::<FullPrecisionSettings>();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &FullCheckpoint { config, params })?;
        writer.flush()?;
        Ok(())
    }

    pub(super) fn train(ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
        let cfg = &ctx.config.neural;
        cfg.validate()?;
        sink.info("Starting neural network classifier training")?;
        sink.device(ctx.probe.detect())?;

        let data = load_or_synthesize(ctx.dataset, cfg.n_samples, cfg.n_features, cfg.seed, sink)?;
        if let Some(label) = data.labels().iter().find(|&&l| l as usize >= N_CLASSES) {
            return Err(TrainingError::Trainer(format!(
                "neural classifier expects binary labels 0/1, found {label}"
            )));
        }
        let (train, test) = data.train_test_split(TEST_FRACTION, cfg.seed)?;

        let device = <TrainBackend as Backend>::Device::default();
        TrainBackend::seed(cfg.seed);

        let model_config = ClassifierConfig::new(data.n_features(), cfg.hidden_dims.clone())
            .with_dropout(cfg.dropout)
            .with_n_classes(N_CLASSES);
        let mut model: Classifier<TrainBackend> = model_config.init(&device);
        let mut optimizer = AdamConfig::new().init::<TrainBackend, Classifier<TrainBackend>>();
        let loss_fn: CrossEntropyLoss<TrainBackend> = CrossEntropyLossConfig::new().init(&device);

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut test_acc = 0.0;

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut rng);
            let mut total_loss = 0.0;
            let mut n_batches = 0usize;

            for batch in order.chunks(cfg.batch_size) {
                let logits = model.forward(features_tensor(&train, batch, &device));
                let loss = loss_fn.forward(logits, labels_tensor(&train, batch, &device));
                total_loss += scalar(loss.clone())?;
                n_batches += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(cfg.learning_rate, model, grads);
            }

            let avg_loss = total_loss / n_batches.max(1) as f64;
            let eval_model = model.valid();
            let train_acc = evaluate(&eval_model, &train, &device)?;
            test_acc = evaluate(&eval_model, &test, &device)?;

            sink.metric("loss", avg_loss, epoch)?;
            sink.metric("train_accuracy", train_acc, epoch)?;
            sink.metric("test_accuracy", test_acc, epoch)?;
            sink.progress(epoch, cfg.epochs)?;
            if epoch % 10 == 0 {
                sink.info(&format!(
                    "Epoch {epoch}/{}: loss={avg_loss:.4}, train_acc={train_acc:.4}, test_acc={test_acc:.4}",
                    cfg.epochs
                ))?;
            }
        }

        let model_dir = ctx.layout.ensure_model_dir()?;
        let final_model = model.valid();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        final_model
            .clone()
            .save_file(model_dir.join("model"), &recorder)
            .map_err(|e| TrainingError::Artifact(format!("failed to save model parameters: {e:?}")))?;
        let params_file = model_dir.join(PARAMS_FILE);

        let full_checkpoint = model_dir.join(FULL_CHECKPOINT_FILE);
        write_full_checkpoint(&full_checkpoint, &model_config, final_model)?;
        tracing::debug!(run_id = ctx.run_id, dir = %model_dir.display(), "neural checkpoints saved");

        let bundle = finish_bundle(
            &BundleSpec {
                dir: model_dir,
                model_file: params_file,
                name: BUNDLE_NAME.to_string(),
                version: BUNDLE_VERSION.to_string(),
                framework: FRAMEWORK.to_string(),
                inputs: TensorSchema::new(SchemaKind::Tensor, vec![None, Some(data.n_features())], "float32"),
                outputs: TensorSchema::new(SchemaKind::Tensor, vec![None, Some(N_CLASSES)], "float32"),
                requirements: vec![
                    concat!("babushka-training==", env!("CARGO_PKG_VERSION")).to_string(),
                    "burn>=0.16".to_string(),
                    "burn-ndarray>=0.16".to_string(),
                ],
            },
            sink,
        )?
        .with_auxiliary(full_checkpoint);

        sink.info(&format!("Training complete. Final test accuracy: {test_acc:.4}"))?;
        sink.metric("final_accuracy", test_acc, cfg.epochs)?;
        Ok(bundle)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_forward_shape() {
            let device = Default::default();
            let model: Classifier<InferBackend> = ClassifierConfig::new(5, vec![8, 4]).init(&device);
            let input = Tensor::<InferBackend, 2>::zeros([3, 5], &device);
            assert_eq!(model.forward(input).dims(), [3, 2]);
        }

        #[test]
        fn test_no_hidden_layers_is_linear_model() {
            let device = Default::default();
            let model: Classifier<InferBackend> = ClassifierConfig::new(4, Vec::new()).init(&device);
            assert!(model.hidden.is_empty());
            let input = Tensor::<InferBackend, 2>::ones([2, 4], &device);
            assert_eq!(model.forward(input).dims(), [2, 2]);
        }

        #[test]
        fn test_batch_tensors_follow_row_order() {
            let device = Default::default();
            let data = Dataset::synthetic(10, 3, 1);
            let rows = [4, 0, 7];

            let x = features_tensor::<InferBackend>(&data, &rows, &device);
            assert_eq!(x.dims(), [3, 3]);
            let values: Vec<f32> = x.into_data().to_vec().unwrap();
            assert_eq!(&values[..3], data.row(4).as_slice().unwrap());

            let y = labels_tensor::<InferBackend>(&data, &rows, &device);
            let labels: Vec<i64> = y.into_data().convert::<i64>().to_vec().unwrap();
            let expected: Vec<i64> = rows.iter().map(|&r| i64::from(data.labels()[r])).collect();
            assert_eq!(labels, expected);
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn test_full_checkpoint_reports_write_failure() {
            let device = Default::default();
            let config = ClassifierConfig::new(3, vec![4]);
            let model: Classifier<InferBackend> = config.init(&device);
            assert!(write_full_checkpoint(Path::new("/dev/full"), &config, model).is_err());
        }
    }
}
