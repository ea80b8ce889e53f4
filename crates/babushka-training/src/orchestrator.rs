//! One training run, from configuration file to terminal status.
//!
//! The orchestrator owns the run lifecycle:
//!
//! ```text
//! INIT --config loaded, output dir created--> RUNNING --bundle written--> SUCCEEDED
//!   \                                            \
//!    `--------------- any error -----------------`--> FAILED
//! ```
//!
//! Exactly one `status` event is emitted per run, and it is the last event.

use crate::artifacts::{ArtifactKind, make_artifact};
use crate::backends::{Capabilities, RunContext};
use crate::bundle::ModelBundle;
use crate::config::{ConfigFormat, RunConfig};
use crate::device::{DeviceProbe, HostDeviceProbe};
use crate::dispatch::{Dispatcher, Template};
use crate::error::{TrainingError, TrainingResult};
use crate::events::{EventSink, JsonlSink, RunState, TeeSink};
use crate::layout::RunLayout;
use std::path::PathBuf;

/// Template used when the configuration has no `template` key.
pub const DEFAULT_TEMPLATE: &str = "tabular";

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
    pub dataset: Option<PathBuf>,
    pub default_template: String,
}

impl RunRequest {
    pub fn new(run_id: impl Into<String>, config_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            config_path: config_path.into(),
            output_dir: output_dir.into(),
            dataset: None,
            default_template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: impl Into<PathBuf>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    #[must_use]
    pub fn with_default_template(mut self, template: impl Into<String>) -> Self {
        self.default_template = template.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    pub bundle: Option<ModelBundle>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.succeeded())
    }
}

pub struct RunOrchestrator<'a> {
    sink: &'a dyn EventSink,
    capabilities: Capabilities,
    probe: Box<dyn DeviceProbe>,
    mirror_events: bool,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self { sink, capabilities: Capabilities::detect(), probe: Box::new(HostDeviceProbe), mirror_events: true }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: impl DeviceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Do not copy events into `<output_dir>/events.jsonl`.
    #[must_use]
    pub fn without_event_log(mut self) -> Self {
        self.mirror_events = false;
        self
    }

    /// Run to completion. Never panics on run errors; they end up in the
    /// outcome and in the terminal status event.
    pub fn execute(&self, request: &RunRequest) -> RunOutcome {
        let _span = tracing::info_span!("run", run_id = %request.run_id).entered();
        let layout = RunLayout::new(request.output_dir.clone());
        let mut state = RunState::Init;
        tracing::debug!(%state, "run created");

        let config = match self.prepare(request, &layout) {
            Ok(config) => config,
            Err(err) => return fail(self.sink, &layout, false, err),
        };
        state = RunState::Running;
        tracing::debug!(%state, "output directory ready");

        let mirror = if self.mirror_events {
            match JsonlSink::create(&layout.events_log_path()) {
                Ok(mirror) => Some(mirror),
                Err(err) => return fail(self.sink, &layout, false, err),
            }
        } else {
            None
        };
        let tee;
        let sink: &dyn EventSink = match &mirror {
            Some(mirror) => {
                tee = TeeSink::new(self.sink, mirror);
                &tee
            }
            None => self.sink,
        };

        let model_dir_existed = layout.model_dir().exists();
        match self.train(request, &config, &layout, sink) {
            Ok(bundle) => {
                // Nothing reached the host, so it can still be told FAILED.
                if let Err(err) = sink.status(RunState::Succeeded, None) {
                    tracing::error!(error = %err, "failed to report success");
                    return fail(sink, &layout, !model_dir_existed, err);
                }
                state = RunState::Succeeded;
                tracing::info!(%state, model = %bundle.model_path.display(), "run finished");
                RunOutcome { state, bundle: Some(bundle), error: None }
            }
            Err(err) => fail(sink, &layout, !model_dir_existed, err),
        }
    }

    /// INIT phase: announce the run, load the configuration and create the
    /// output directory. Nothing is written to disk if the configuration is bad.
    fn prepare(&self, request: &RunRequest, layout: &RunLayout) -> TrainingResult<RunConfig> {
        self.sink.info(&format!("Starting run: {}", request.run_id))?;
        self.sink.info(&format!("Config: {}", request.config_path.display()))?;
        self.sink.info(&format!("Output: {}", request.output_dir.display()))?;

        if !ConfigFormat::detect(&request.config_path).is_supported() {
            self.sink.warn("YAML support not compiled in, trying as JSON")?;
        }
        let config = RunConfig::load(&request.config_path)?;
        config.validate_for(Template::parse(config.template_or(&request.default_template)).chain())?;
        self.sink.info(&format!("Loaded config: {}", serde_json::to_string(config.raw())?))?;

        layout.ensure_root()?;
        Ok(config)
    }

    /// RUNNING phase: dispatch to a backend, then report the bundle's files.
    fn train(
        &self,
        request: &RunRequest,
        config: &RunConfig,
        layout: &RunLayout,
        sink: &dyn EventSink,
    ) -> TrainingResult<ModelBundle> {
        let ctx = RunContext {
            run_id: &request.run_id,
            config,
            dataset: request.dataset.as_deref(),
            layout,
            probe: self.probe.as_ref(),
        };
        let template = config.template_or(&request.default_template);
        let bundle = Dispatcher::new(self.capabilities).dispatch(template, &ctx, sink)?;

        let model = make_artifact(ArtifactKind::Model, bundle.model_path.clone())?;
        sink.artifact(model.kind, &model.path, &model.sha256)?;
        for path in &bundle.auxiliary {
            let checkpoint = make_artifact(ArtifactKind::Checkpoint, path.clone())?;
            sink.artifact(checkpoint.kind, &checkpoint.path, &checkpoint.sha256)?;
        }
        Ok(bundle)
    }
}

/// FAILED: report the error with its full chain, drop a half-written bundle
/// and emit the terminal status. Emission errors are ignored here since the
/// run is already failing.
fn fail(sink: &dyn EventSink, layout: &RunLayout, discard_model_dir: bool, err: TrainingError) -> RunOutcome {
    let message = err.to_string();
    let trace = format!("{:?}", anyhow::Error::new(err));
    tracing::error!(error = %message, "run failed");

    let _ = sink.error(&format!("Training failed: {message}"));
    let _ = sink.error(&trace);

    if discard_model_dir {
        match layout.discard_model_dir() {
            Ok(true) => {
                let _ = sink.warn(&format!("Removed incomplete model bundle at {}", layout.model_dir().display()));
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to remove incomplete model bundle"),
        }
    }

    let _ = sink.status(RunState::Failed, Some(&message));
    RunOutcome { state: RunState::Failed, bundle: None, error: Some(message) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBody, MemorySink, RunEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes() {
        let ok = RunOutcome { state: RunState::Succeeded, bundle: None, error: None };
        let failed = RunOutcome { state: RunState::Failed, bundle: None, error: Some("boom".into()) };
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_request_defaults() {
        let request = RunRequest::new("r1", "c.json", "out");
        assert_eq!(request.default_template, DEFAULT_TEMPLATE);
        assert_eq!(request.dataset, None);
        let request = request.with_dataset("d.csv").with_default_template("pytorch");
        assert_eq!(request.dataset, Some(PathBuf::from("d.csv")));
        assert_eq!(request.default_template, "pytorch");
    }

    #[test]
    fn test_failure_discards_partial_bundle() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path().to_path_buf());
        let model_dir = layout.ensure_model_dir().unwrap();
        std::fs::write(model_dir.join("model.bin"), b"partial").unwrap();
        let sink = MemorySink::new();

        let outcome = fail(&sink, &layout, true, TrainingError::Trainer("diverged".to_string()));

        assert_eq!(outcome.state, RunState::Failed);
        assert!(!model_dir.exists());
        let bodies = sink.bodies();
        assert!(matches!(
            bodies.last(),
            Some(EventBody::Status { state: RunState::Failed, error: Some(e) }) if e.contains("diverged")
        ));
    }

    /// Rejects the first SUCCEEDED status and records everything else.
    struct RejectSuccess {
        inner: MemorySink,
        rejected: AtomicBool,
    }

    impl EventSink for RejectSuccess {
        fn record(&self, event: &RunEvent) -> TrainingResult<()> {
            if matches!(event.body, EventBody::Status { state: RunState::Succeeded, .. })
                && !self.rejected.swap(true, Ordering::SeqCst)
            {
                return Err(TrainingError::EventStream("stdout closed".to_string()));
            }
            self.inner.record(event)
        }
    }

    #[test]
    fn test_unreported_success_ends_as_failed() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.json");
        std::fs::write(&config_path, r#"{"template": "mock", "epochs": 2, "step_delay_ms": 0}"#).unwrap();
        let output = temp.path().join("out");
        let sink = RejectSuccess { inner: MemorySink::new(), rejected: AtomicBool::new(false) };

        let outcome = RunOrchestrator::new(&sink)
            .with_capabilities(Capabilities::none())
            .without_event_log()
            .execute(&RunRequest::new("r", config_path, &output));

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.error.unwrap().contains("stdout closed"));
        let bodies = sink.inner.bodies();
        let statuses: Vec<&EventBody> = bodies.iter().filter(|b| matches!(b, EventBody::Status { .. })).collect();
        assert_eq!(statuses.len(), 1);
        assert!(matches!(bodies.last(), Some(EventBody::Status { state: RunState::Failed, .. })));
        assert!(!output.join("model").exists());
    }

    #[test]
    fn test_unused_backend_settings_are_not_validated() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"template": "mock", "epochs": 3, "step_delay_ms": 0, "n_samples": 1, "n_estimators": 0, "dropout": 2.0}"#,
        )
        .unwrap();
        let sink = MemorySink::new();

        let outcome = RunOrchestrator::new(&sink)
            .with_capabilities(Capabilities::none())
            .execute(&RunRequest::new("r", config_path, temp.path().join("out")));

        assert!(outcome.succeeded(), "{:?}", outcome.error);
    }

    #[test]
    fn test_chain_settings_are_validated_before_output() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.json");
        std::fs::write(&config_path, r#"{"template": "tabular", "n_estimators": 0}"#).unwrap();
        let output = temp.path().join("out");
        let sink = MemorySink::new();

        let outcome = RunOrchestrator::new(&sink)
            .with_capabilities(Capabilities::none())
            .execute(&RunRequest::new("r", config_path, &output));

        assert_eq!(outcome.state, RunState::Failed);
        assert!(outcome.error.unwrap().contains("n_estimators"));
        assert!(!output.exists());
    }

    #[test]
    fn test_failure_keeps_preexisting_bundle() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path().to_path_buf());
        let model_dir = layout.ensure_model_dir().unwrap();
        let sink = MemorySink::new();

        fail(&sink, &layout, false, TrainingError::Trainer("diverged".to_string()));
        assert!(model_dir.exists());
    }
}
