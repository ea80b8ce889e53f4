//! Run configuration.
//!
//! The configuration file is a flat mapping shared by every backend. Each
//! backend reads its own typed view of that mapping. All views are decoded
//! when the file is loaded; value ranges are only checked for the backends a
//! run may actually use (`RunConfig::validate_for`).

use crate::backends::BackendKind;
use crate::error::{TrainingError, TrainingResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` files are YAML; everything else is read as JSON.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => Self::Yaml,
            _ => Self::Json,
        }
    }

    /// Whether this build can parse the format natively.
    pub const fn is_supported(self) -> bool {
        match self {
            Self::Json => true,
            Self::Yaml => cfg!(feature = "yaml"),
        }
    }
}

/// Settings for the tabular-ensemble backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self { n_samples: 1000, n_features: 10, n_estimators: 100, max_depth: 10, seed: 42 }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        validate_dataset_shape(self.n_samples, self.n_features)?;
        if self.n_estimators == 0 {
            return Err(TrainingError::InvalidConfig("n_estimators must be >= 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(TrainingError::InvalidConfig("max_depth must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Settings for the neural-network backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    pub n_samples: usize,
    pub n_features: usize,
    pub hidden_dims: Vec<usize>,
    pub dropout: f64,
    pub epochs: u64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            n_features: 10,
            hidden_dims: vec![64, 32],
            dropout: 0.2,
            epochs: 100,
            learning_rate: 0.001,
            batch_size: 32,
            seed: 42,
        }
    }
}

impl NeuralConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        validate_dataset_shape(self.n_samples, self.n_features)?;
        if self.hidden_dims.contains(&0) {
            return Err(TrainingError::InvalidConfig("hidden_dims entries must be >= 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidConfig("dropout must be in [0, 1)".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Settings for the simulated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub epochs: u64,
    /// Simulated work per epoch.
    pub step_delay_ms: u64,
    /// Add a small random term to the synthetic loss.
    pub jitter: bool,
    pub seed: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self { epochs: 10, step_delay_ms: 500, jitter: false, seed: 42 }
    }
}

impl MockConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn validate_dataset_shape(n_samples: usize, n_features: usize) -> TrainingResult<()> {
    // Train/test split needs a row on each side.
    if n_samples < 2 {
        return Err(TrainingError::InvalidConfig("n_samples must be >= 2".to_string()));
    }
    if n_features == 0 {
        return Err(TrainingError::InvalidConfig("n_features must be >= 1".to_string()));
    }
    Ok(())
}

/// A loaded run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    raw: Map<String, Value>,
    template: Option<String>,
    pub ensemble: EnsembleConfig,
    pub neural: NeuralConfig,
    pub mock: MockConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            raw: Map::new(),
            template: None,
            ensemble: EnsembleConfig::default(),
            neural: NeuralConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

impl RunConfig {
    /// Read, parse and decode a configuration file.
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TrainingError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let value = parse_document(path, &text, ConfigFormat::detect(path))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> TrainingResult<Self> {
        let Value::Object(raw) = value else {
            return Err(TrainingError::InvalidConfig(format!(
                "configuration must be a mapping, got {}",
                type_name(&value)
            )));
        };

        let template = match raw.get("template") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(TrainingError::InvalidConfig(format!(
                    "template must be a string, got {}",
                    type_name(other)
                )));
            }
        };

        let ensemble: EnsembleConfig = section(&raw)?;
        let neural: NeuralConfig = section(&raw)?;
        let mock: MockConfig = section(&raw)?;

        Ok(Self { raw, template, ensemble, neural, mock })
    }

    /// Check the value ranges of every section `backends` would read.
    pub fn validate_for(&self, backends: &[BackendKind]) -> TrainingResult<()> {
        for kind in backends {
            match kind {
                BackendKind::Ensemble => self.ensemble.validate()?,
                BackendKind::Neural => self.neural.validate()?,
                BackendKind::Mock => self.mock.validate()?,
            }
        }
        Ok(())
    }

    /// Template named by the `template` key, if any.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// The `template` key, falling back to the caller's default.
    pub fn template_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.template().unwrap_or(default)
    }

    /// The mapping exactly as it was read.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn section<T: DeserializeOwned>(raw: &Map<String, Value>) -> TrainingResult<T> {
    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| TrainingError::InvalidConfig(e.to_string()))
}

fn parse_document(path: &Path, text: &str, format: ConfigFormat) -> TrainingResult<Value> {
    let parsed = match format {
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        #[cfg(feature = "yaml")]
        ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        #[cfg(not(feature = "yaml"))]
        ConfigFormat::Yaml => serde_json::from_str(text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| TrainingError::ConfigParse { path: path.to_path_buf(), message })
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
