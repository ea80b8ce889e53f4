use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(&'static str),

    #[error("event stream error: {0}")]
    EventStream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    /// True for failures raised before any training starts because the
    /// configuration could not be read, parsed or validated.
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::ConfigRead { .. } | Self::ConfigParse { .. })
    }
}
