//! Training backends and the capabilities that gate them.
//!
//! Each backend depends on an optional training library (a cargo feature).
//! A backend whose library is missing from the build, or disabled at runtime
//! through `BABUSHKA_DISABLE_BACKENDS`, reports itself unavailable and the
//! dispatcher moves on to the next backend in the chain.

pub mod ensemble;
#[cfg(feature = "ensemble")]
pub mod forest;
pub mod mock;
pub mod neural;

pub use ensemble::EnsembleBackend;
pub use mock::MockBackend;
pub use neural::NeuralBackend;

use crate::bundle::{BundleSpec, ModelBundle, write_bundle};
use crate::config::RunConfig;
use crate::device::DeviceProbe;
use crate::error::TrainingResult;
use crate::events::EventSink;
use crate::layout::RunLayout;
use std::path::Path;

/// Comma-separated backend ids to treat as unavailable.
pub const DISABLE_BACKENDS_ENV: &str = "BABUSHKA_DISABLE_BACKENDS";

/// Held-out share of every dataset.
pub(crate) const TEST_FRACTION: f64 = 0.2;

/// Version written to every bundle's metadata.
pub(crate) const BUNDLE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ensemble,
    Neural,
    Mock,
}

impl BackendKind {
    pub const fn id(self) -> &'static str {
        match self {
            Self::Ensemble => "ensemble",
            Self::Neural => "neural",
            Self::Mock => "mock",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "ensemble" => Some(Self::Ensemble),
            "neural" => Some(Self::Neural),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    pub fn backend(self) -> &'static dyn TrainingBackend {
        match self {
            Self::Ensemble => &EnsembleBackend,
            Self::Neural => &NeuralBackend,
            Self::Mock => &MockBackend,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Which optional training libraries this process may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub ensemble: bool,
    pub neural: bool,
}

impl Capabilities {
    /// Everything compiled into this build.
    pub const fn compiled() -> Self {
        Self { ensemble: cfg!(feature = "ensemble"), neural: cfg!(feature = "neural") }
    }

    /// Only the mock backend.
    pub const fn none() -> Self {
        Self { ensemble: false, neural: false }
    }

    /// Compiled capabilities minus anything listed in `BABUSHKA_DISABLE_BACKENDS`.
    pub fn detect() -> Self {
        match std::env::var(DISABLE_BACKENDS_ENV) {
            Ok(list) => Self::compiled().without_list(&list),
            Err(_) => Self::compiled(),
        }
    }

    #[must_use]
    pub fn without_list(self, list: &str) -> Self {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .fold(self, |caps, id| match BackendKind::from_id(id) {
                Some(kind) => caps.without(kind),
                None => {
                    tracing::warn!(backend = id.trim(), "ignoring unknown backend id in {DISABLE_BACKENDS_ENV}");
                    caps
                }
            })
    }

    #[must_use]
    pub const fn without(mut self, kind: BackendKind) -> Self {
        match kind {
            BackendKind::Ensemble => self.ensemble = false,
            BackendKind::Neural => self.neural = false,
            // The mock backend needs no library and cannot be disabled.
            BackendKind::Mock => {}
        }
        self
    }

    pub const fn has(self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Ensemble => self.ensemble,
            BackendKind::Neural => self.neural,
            BackendKind::Mock => true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::compiled()
    }
}

/// Inputs shared by every backend for one run.
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub config: &'a RunConfig,
    pub dataset: Option<&'a Path>,
    pub layout: &'a RunLayout,
    pub probe: &'a dyn DeviceProbe,
}

pub trait TrainingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the library this backend needs can be used. Failing to
    /// acquire is the only condition that moves the dispatcher along.
    fn try_acquire(&self, capabilities: &Capabilities) -> bool {
        capabilities.has(self.kind())
    }

    /// Train, persist the model and write its bundle. Errors here are run
    /// failures, never a reason to try another backend.
    fn run(&self, ctx: &RunContext<'_>, sink: &dyn EventSink) -> TrainingResult<ModelBundle>;
}

/// Write a bundle and report where it went.
pub(crate) fn finish_bundle(spec: &BundleSpec, sink: &dyn EventSink) -> TrainingResult<ModelBundle> {
    let bundle = write_bundle(spec)?;
    sink.info(&format!("Model bundle created at {}", bundle.dir.display()))?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ids_round_trip() {
        for kind in [BackendKind::Ensemble, BackendKind::Neural, BackendKind::Mock] {
            assert_eq!(BackendKind::from_id(kind.id()), Some(kind));
            assert_eq!(kind.backend().kind(), kind);
        }
        assert_eq!(BackendKind::from_id(" Neural "), Some(BackendKind::Neural));
        assert_eq!(BackendKind::from_id("sklearn"), None);
    }

    #[test]
    fn test_without_list_disables_named_backends() {
        let all = Capabilities { ensemble: true, neural: true };
        assert_eq!(all.without_list("ensemble"), Capabilities { ensemble: false, neural: true });
        assert_eq!(all.without_list("neural, ensemble"), Capabilities::none());
        assert_eq!(all.without_list("mock,bogus,"), all);
    }

    #[test]
    fn test_mock_is_always_available() {
        let none = Capabilities::none();
        assert!(MockBackend.try_acquire(&none));
        assert!(!EnsembleBackend.try_acquire(&none));
        assert!(!NeuralBackend.try_acquire(&none));
    }
}
