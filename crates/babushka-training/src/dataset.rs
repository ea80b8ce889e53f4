//! Feature/label datasets for the numeric backends.

use crate::error::{TrainingError, TrainingResult};
use crate::events::EventSink;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Labels must be class ids below this bound.
pub const MAX_CLASSES: usize = 1024;

/// Row-major feature matrix with one integer class label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Vec<u32>,
}

/// Where a run's data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Synthetic,
    /// Delimited text with a header row; the last column is the label.
    Csv(PathBuf),
    /// Pre-split JSON archive: `{"X": [[...], ...], "y": [...]}`.
    Archive(PathBuf),
}

impl DatasetSource {
    /// A dataset path that is absent or does not exist means synthetic data.
    pub fn resolve(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p.exists() => {
                let is_csv = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
                if is_csv { Self::Csv(p.to_path_buf()) } else { Self::Archive(p.to_path_buf()) }
            }
            _ => Self::Synthetic,
        }
    }
}

#[derive(Deserialize)]
struct Archive {
    #[serde(rename = "X")]
    x: Vec<Vec<f32>>,
    y: Vec<u32>,
}

impl Dataset {
    pub fn new(features: Array2<f32>, labels: Vec<u32>) -> TrainingResult<Self> {
        if features.nrows() != labels.len() {
            return Err(TrainingError::Dataset(format!(
                "feature rows ({}) and labels ({}) differ in length",
                features.nrows(),
                labels.len()
            )));
        }
        if labels.is_empty() {
            return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
        }
        if features.ncols() == 0 {
            return Err(TrainingError::Dataset("dataset has no feature columns".to_string()));
        }
        if let Some(&label) = labels.iter().find(|&&l| l as usize >= MAX_CLASSES) {
            return Err(TrainingError::Dataset(format!(
                "label {label} is not a class id below {MAX_CLASSES}"
            )));
        }
        Ok(Self { features, labels })
    }

    /// Standard-normal features labelled by the sign of their sum, which
    /// makes the classes linearly separable.
    #[must_use]
    pub fn synthetic(n_samples: usize, n_features: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let features =
            Array2::from_shape_fn((n_samples, n_features), |_| rng.sample::<f32, _>(StandardNormal));
        let labels = features.rows().into_iter().map(|row| u32::from(row.sum() > 0.0)).collect();
        Self { features, labels }
    }

    pub fn load(source: &DatasetSource, n_samples: usize, n_features: usize, seed: u64) -> TrainingResult<Self> {
        match source {
            DatasetSource::Synthetic => Ok(Self::synthetic(n_samples, n_features, seed)),
            DatasetSource::Csv(path) => Self::from_csv(path),
            DatasetSource::Archive(path) => Self::from_archive(path),
        }
    }

    pub fn from_csv(path: &Path) -> TrainingResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| TrainingError::Dataset(format!("failed to open {}: {e}", path.display())))?;

        let mut values = Vec::new();
        let mut labels = Vec::new();
        let mut width = None;

        for (idx, record) in reader.records().enumerate() {
            let line = idx + 2;
            let record = record
                .map_err(|e| TrainingError::Dataset(format!("failed to read csv line {line}: {e}")))?;
            if record.len() < 2 {
                return Err(TrainingError::Dataset(format!(
                    "csv line {line} needs at least one feature and a label"
                )));
            }
            width = Some(record.len() - 1);

            let fields: Vec<&str> = record.iter().collect();
            let (label_field, feature_fields) = fields
                .split_last()
                .ok_or_else(|| TrainingError::Dataset(format!("csv line {line} is empty")))?;

            for field in feature_fields {
                let v: f32 = field.parse().map_err(|_| {
                    TrainingError::Dataset(format!("csv line {line}: `{field}` is not a number"))
                })?;
                values.push(v);
            }
            labels.push(parse_label(label_field, line)?);
        }

        let n_features = width.ok_or_else(|| TrainingError::Dataset("csv file has no rows".to_string()))?;
        let features = Array2::from_shape_vec((labels.len(), n_features), values)
            .map_err(|e| TrainingError::Dataset(e.to_string()))?;
        Self::new(features, labels)
    }

    pub fn from_archive(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        let archive: Archive = serde_json::from_slice(&bytes).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse dataset archive {}: {e}", path.display()))
        })?;

        let rows = archive.x.len();
        let n_features = archive.x.first().map_or(0, Vec::len);
        if let Some(bad) = archive.x.iter().position(|row| row.len() != n_features) {
            return Err(TrainingError::Dataset(format!(
                "archive row {bad} has {} features, expected {n_features}",
                archive.x[bad].len()
            )));
        }
        let values: Vec<f32> = archive.x.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((rows, n_features), values)
            .map_err(|e| TrainingError::Dataset(e.to_string()))?;
        Self::new(features, archive.y)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Number of classes, assuming labels are `0..n`.
    pub fn n_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |&m| m as usize + 1)
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.features.row(index)
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    #[must_use]
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), rows),
            labels: rows.iter().map(|&r| self.labels[r]).collect(),
        }
    }

    /// Shuffle with `seed` and hold out `ceil(len * test_fraction)` rows.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> TrainingResult<(Self, Self)> {
        let n = self.len();
        let n_test = ((n as f64) * test_fraction).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(TrainingError::Dataset(format!(
                "cannot split {n} samples into train/test with test fraction {test_fraction}"
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (test_rows, train_rows) = order.split_at(n_test);
        Ok((self.subset(train_rows), self.subset(test_rows)))
    }
}

fn parse_label(field: &str, line: usize) -> TrainingResult<u32> {
    let v: f64 = field
        .parse()
        .map_err(|_| TrainingError::Dataset(format!("csv line {line}: label `{field}` is not a number")))?;
    if v < 0.0 || v.fract() != 0.0 || v > f64::from(u32::MAX) {
        return Err(TrainingError::Dataset(format!(
            "csv line {line}: label `{field}` is not a non-negative integer class"
        )));
    }
    Ok(v as u32)
}

/// Resolve the run's dataset, reporting which source was used.
pub fn load_or_synthesize(
    path: Option<&Path>,
    n_samples: usize,
    n_features: usize,
    seed: u64,
    sink: &dyn EventSink,
) -> TrainingResult<Dataset> {
    let source = DatasetSource::resolve(path);
    match &source {
        DatasetSource::Synthetic => sink.info("Generating synthetic dataset")?,
        DatasetSource::Csv(p) | DatasetSource::Archive(p) => {
            sink.info(&format!("Loading dataset from {}", p.display()))?;
        }
    }
    let dataset = Dataset::load(&source, n_samples, n_features, seed)?;
    tracing::debug!(rows = dataset.len(), features = dataset.n_features(), "dataset ready");
    Ok(dataset)
}

/// Fraction of positions where the two label slices agree.
pub fn accuracy(predicted: &[u32], actual: &[u32]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    correct as f64 / actual.len() as f64
}
