//! Template resolution and the backend fallback chain.

use crate::backends::{BackendKind, Capabilities, RunContext, TrainingBackend};
use crate::bundle::ModelBundle;
use crate::error::TrainingResult;
use crate::events::EventSink;

/// A training template, resolved from the configuration's `template` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Tabular,
    Neural,
    /// Any other name. Runs the mock backend.
    Unrecognized(String),
}

impl Template {
    pub fn parse(name: &str) -> Self {
        match name {
            "tabular" | "tabular_classifier" => Self::Tabular,
            "pytorch" | "pytorch_classifier" => Self::Neural,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Backends to try, in order. Always ends with the mock backend.
    pub fn chain(&self) -> &'static [BackendKind] {
        match self {
            Self::Tabular => &[BackendKind::Ensemble, BackendKind::Neural, BackendKind::Mock],
            Self::Neural => &[BackendKind::Neural, BackendKind::Mock],
            Self::Unrecognized(_) => &[BackendKind::Mock],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    capabilities: Capabilities,
}

impl Dispatcher {
    pub const fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// First backend in the template's chain that can be acquired. Every
    /// skipped backend is reported as a warning naming its successor.
    pub fn select(&self, template: &Template, sink: &dyn EventSink) -> TrainingResult<&'static dyn TrainingBackend> {
        let chain = template.chain();
        for (i, kind) in chain.iter().enumerate() {
            let backend = kind.backend();
            if backend.try_acquire(&self.capabilities) {
                return Ok(backend);
            }
            // The chain always ends with mock, which is always acquirable.
            let next = chain.get(i + 1).copied().unwrap_or(BackendKind::Mock);
            sink.warn(&format!("{kind} backend not available, trying {next}"))?;
        }
        Ok(BackendKind::Mock.backend())
    }

    /// Resolve `template_name`, pick a backend and run it. Errors from the
    /// backend's run are returned as-is.
    pub fn dispatch(
        &self,
        template_name: &str,
        ctx: &RunContext<'_>,
        sink: &dyn EventSink,
    ) -> TrainingResult<ModelBundle> {
        let template = Template::parse(template_name);
        if let Template::Unrecognized(name) = &template {
            sink.warn(&format!("Unknown template: {name}, using mock"))?;
        }
        let backend = self.select(&template, sink)?;
        tracing::info!(template = template_name, backend = %backend.kind(), "dispatching training run");
        backend.run(ctx, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::device::HostDeviceProbe;
    use crate::events::{EventBody, LogLevel, MemorySink};
    use crate::layout::RunLayout;
    use serde_json::json;
    use tempfile::TempDir;

    fn warnings(sink: &MemorySink) -> Vec<String> {
        sink.bodies()
            .into_iter()
            .filter_map(|b| match b {
                EventBody::Log { level: LogLevel::Warning, message } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_template_aliases() {
        assert_eq!(Template::parse("tabular"), Template::Tabular);
        assert_eq!(Template::parse("tabular_classifier"), Template::Tabular);
        assert_eq!(Template::parse("pytorch"), Template::Neural);
        assert_eq!(Template::parse("pytorch_classifier"), Template::Neural);
        assert_eq!(Template::parse("mock"), Template::Unrecognized("mock".to_string()));
        assert_eq!(Template::parse("Tabular"), Template::Unrecognized("Tabular".to_string()));
    }

    #[test]
    fn test_chains_end_with_mock() {
        for t in [Template::Tabular, Template::Neural, Template::Unrecognized("x".into())] {
            assert_eq!(t.chain().last(), Some(&BackendKind::Mock));
        }
    }

    #[test]
    fn test_select_with_everything_available() {
        let sink = MemorySink::new();
        let caps = Capabilities { ensemble: true, neural: true };
        let backend = Dispatcher::new(caps).select(&Template::Tabular, &sink).unwrap();
        assert_eq!(backend.kind(), BackendKind::Ensemble);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_select_falls_back_with_warnings() {
        let sink = MemorySink::new();
        let caps = Capabilities { ensemble: false, neural: true };
        let backend = Dispatcher::new(caps).select(&Template::Tabular, &sink).unwrap();
        assert_eq!(backend.kind(), BackendKind::Neural);
        assert_eq!(warnings(&sink), vec!["ensemble backend not available, trying neural"]);

        let sink = MemorySink::new();
        let backend = Dispatcher::new(Capabilities::none()).select(&Template::Tabular, &sink).unwrap();
        assert_eq!(backend.kind(), BackendKind::Mock);
        assert_eq!(
            warnings(&sink),
            vec![
                "ensemble backend not available, trying neural",
                "neural backend not available, trying mock",
            ]
        );
    }

    #[test]
    fn test_unrecognized_template_warns_and_runs_mock() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::from_value(json!({"epochs": 1, "step_delay_ms": 0})).unwrap();
        let layout = RunLayout::new(temp.path().to_path_buf());
        let ctx = RunContext { run_id: "t", config: &config, dataset: None, layout: &layout, probe: &HostDeviceProbe };
        let sink = MemorySink::new();

        let bundle = Dispatcher::new(Capabilities { ensemble: true, neural: true })
            .dispatch("xgboost_classifier", &ctx, &sink)
            .unwrap();

        assert_eq!(warnings(&sink)[0], "Unknown template: xgboost_classifier, using mock");
        assert_eq!(bundle.read_metadata().unwrap().framework, "mock");
    }
}
