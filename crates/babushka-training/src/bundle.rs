//! Self-describing model bundles.
//!
//! A bundle directory holds the model file plus three manifests:
//! `metadata.json`, `signature.json` and `requirements.lock`.

use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const METADATA_FILE: &str = "metadata.json";
pub const SIGNATURE_FILE: &str = "signature.json";
pub const REQUIREMENTS_FILE: &str = "requirements.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Array,
    Tensor,
}

/// Declared shape and element type of a model input or output.
/// `None` in `shape` marks a dynamic dimension (usually the batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSchema {
    #[serde(rename = "type")]
    pub kind: SchemaKind,
    pub shape: Vec<Option<usize>>,
    pub dtype: String,
}

impl TensorSchema {
    pub fn new(kind: SchemaKind, shape: Vec<Option<usize>>, dtype: &str) -> Self {
        Self { kind, shape, dtype: dtype.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub name: String,
    pub version: String,
    pub framework: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: TensorSchema,
    pub outputs: TensorSchema,
}

/// Everything needed to write a bundle.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub dir: PathBuf,
    pub model_file: PathBuf,
    pub name: String,
    pub version: String,
    pub framework: String,
    pub inputs: TensorSchema,
    pub outputs: TensorSchema,
    pub requirements: Vec<String>,
}

/// A written bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBundle {
    pub dir: PathBuf,
    /// Canonical model file inside `dir`.
    pub model_path: PathBuf,
    /// Other files the backend placed next to the model.
    pub auxiliary: Vec<PathBuf>,
}

impl ModelBundle {
    #[must_use]
    pub fn with_auxiliary(mut self, path: PathBuf) -> Self {
        self.auxiliary.push(path);
        self
    }

    pub fn read_metadata(&self) -> TrainingResult<BundleMetadata> {
        Ok(serde_json::from_slice(&std::fs::read(self.dir.join(METADATA_FILE))?)?)
    }

    pub fn read_signature(&self) -> TrainingResult<Signature> {
        Ok(serde_json::from_slice(&std::fs::read(self.dir.join(SIGNATURE_FILE))?)?)
    }

    pub fn read_requirements(&self) -> TrainingResult<Vec<String>> {
        let text = std::fs::read_to_string(self.dir.join(REQUIREMENTS_FILE))?;
        Ok(text.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}

/// Write `contents` next to `path` and atomically move it into place.
fn write_atomic(path: &Path, contents: &[u8]) -> TrainingResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| TrainingError::Artifact(format!("no parent directory for {}", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| TrainingError::Io(e.error))?;
    Ok(())
}

/// Create the bundle directory, bring the model file into it and write the
/// three manifests. On failure, every file this call created is removed and
/// files from earlier runs are left alone.
pub fn write_bundle(spec: &BundleSpec) -> TrainingResult<ModelBundle> {
    std::fs::create_dir_all(&spec.dir)?;

    let file_name = spec.model_file.file_name().ok_or_else(|| {
        TrainingError::Artifact(format!("model path has no file name: {}", spec.model_file.display()))
    })?;
    let model_path = spec.dir.join(file_name);
    if !spec.model_file.is_file() {
        return Err(TrainingError::Artifact(format!(
            "model file does not exist: {}",
            spec.model_file.display()
        )));
    }
    // Files this call brings into existence; removed again if a later step fails.
    let mut created: Vec<PathBuf> = Vec::new();
    if !same_file(&spec.model_file, &model_path) {
        let existed = model_path.exists();
        std::fs::copy(&spec.model_file, &model_path)?;
        if !existed {
            created.push(model_path.clone());
        }
    }

    let metadata = BundleMetadata {
        name: spec.name.clone(),
        version: spec.version.clone(),
        framework: spec.framework.clone(),
        created_at: Utc::now(),
    };
    let signature = Signature { inputs: spec.inputs.clone(), outputs: spec.outputs.clone() };

    let manifests = [
        (spec.dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?),
        (spec.dir.join(SIGNATURE_FILE), serde_json::to_vec_pretty(&signature)?),
        (spec.dir.join(REQUIREMENTS_FILE), spec.requirements.join("\n").into_bytes()),
    ];

    for (path, contents) in &manifests {
        let existed = path.exists();
        if let Err(e) = write_atomic(path, contents) {
            for done in &created {
                if let Err(rm) = std::fs::remove_file(done) {
                    tracing::warn!(path = %done.display(), error = %rm, "failed to remove partial bundle file");
                }
            }
            return Err(e);
        }
        if !existed {
            created.push(path.clone());
        }
    }

    tracing::debug!(dir = %spec.dir.display(), framework = %spec.framework, "model bundle written");
    Ok(ModelBundle { dir: spec.dir.clone(), model_path, auxiliary: Vec::new() })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
