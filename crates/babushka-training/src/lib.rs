//! Babushka Training
//!
//! Training-run orchestration for the Babushka host application:
//! - Streaming run events as line-delimited JSON (`EventSink`)
//! - Choosing a training backend from what this build can use (`Dispatcher`)
//! - Tabular-ensemble, neural-network and mock training procedures
//! - Writing self-describing model bundles (`write_bundle`)
//! - Driving a run from config file to terminal status (`RunOrchestrator`)

pub mod artifacts;
pub mod backends;
pub mod bundle;
pub mod config;
pub mod dataset;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod layout;
pub mod orchestrator;

pub use artifacts::{ArtifactKind, TrainingArtifact, make_artifact, sha256_file};
pub use backends::{BackendKind, Capabilities, DISABLE_BACKENDS_ENV, RunContext, TrainingBackend};
pub use bundle::{BundleMetadata, BundleSpec, ModelBundle, SchemaKind, Signature, TensorSchema, write_bundle};
pub use config::{ConfigFormat, EnsembleConfig, MockConfig, NeuralConfig, RunConfig};
pub use dataset::{Dataset, DatasetSource};
pub use device::{ComputeDevice, DeviceProbe, FixedDeviceProbe, HostDeviceProbe};
pub use dispatch::{Dispatcher, Template};
pub use error::{TrainingError, TrainingResult};
pub use events::{EventBody, EventSink, JsonlSink, LogLevel, MemorySink, RunEvent, RunState, TeeSink};
pub use layout::RunLayout;
pub use orchestrator::{DEFAULT_TEMPLATE, RunOrchestrator, RunOutcome, RunRequest};
