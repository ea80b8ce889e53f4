use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of one run's output directory.
///
/// ```text
/// <output_dir>/
///   events.jsonl        mirror of the event stream
///   model/              the model bundle
/// ```
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    #[must_use]
    pub fn events_log_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn ensure_root(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn ensure_model_dir(&self) -> TrainingResult<PathBuf> {
        let dir = self.model_dir();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the model directory and everything in it, if present.
    pub fn discard_model_dir(&self) -> TrainingResult<bool> {
        let dir = self.model_dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path().join("run-1"));

        assert!(layout.model_dir().ends_with("run-1/model"));
        assert!(layout.events_log_path().ends_with("run-1/events.jsonl"));
    }

    #[test]
    fn test_discard_model_dir() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path().to_path_buf());

        assert!(!layout.discard_model_dir().unwrap());
        let dir = layout.ensure_model_dir().unwrap();
        std::fs::write(dir.join("model.bin"), b"x").unwrap();
        assert!(layout.discard_model_dir().unwrap());
        assert!(!dir.exists());
    }
}
