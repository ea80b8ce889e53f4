//! Line-delimited JSON event protocol spoken to the host process.
//!
//! Every event is one self-contained JSON object terminated by a newline and
//! flushed before `emit` returns, so the host can parse each line as soon as
//! it arrives.

use crate::artifacts::ArtifactKind;
use crate::device::ComputeDevice;
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventBody {
    Log { level: LogLevel, message: String },
    Metric { key: String, value: f64, step: u64 },
    Progress { current: u64, total: u64 },
    Artifact { kind: ArtifactKind, path: PathBuf, sha256: String },
    Device { name: String },
    Status { state: RunState, error: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(with = "ts_format")]
    pub ts: DateTime<Utc>,
}

impl RunEvent {
    #[must_use]
    pub fn now(body: EventBody) -> Self {
        Self { body, ts: Utc::now() }
    }

    /// Decode one line of the stream. Lines that are not events (stray
    /// prints from a library, say) become INFO log events.
    #[must_use]
    pub fn parse_line(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| {
            Self::now(EventBody::Log { level: LogLevel::Info, message: line.to_string() })
        })
    }

    /// The `type` discriminator as written on the wire.
    pub const fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Log { .. } => "log",
            EventBody::Metric { .. } => "metric",
            EventBody::Progress { .. } => "progress",
            EventBody::Artifact { .. } => "artifact",
            EventBody::Device { .. } => "device",
            EventBody::Status { .. } => "status",
        }
    }
}

mod ts_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Destination for run events.
///
/// Implementors only provide `record`; the convenience emitters stamp the
/// event and forward it.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RunEvent) -> TrainingResult<()>;

    fn emit(&self, body: EventBody) -> TrainingResult<()> {
        self.record(&RunEvent::now(body))
    }

    fn log(&self, level: LogLevel, message: &str) -> TrainingResult<()> {
        self.emit(EventBody::Log { level, message: message.to_string() })
    }

    fn info(&self, message: &str) -> TrainingResult<()> {
        self.log(LogLevel::Info, message)
    }

    fn warn(&self, message: &str) -> TrainingResult<()> {
        self.log(LogLevel::Warning, message)
    }

    fn error(&self, message: &str) -> TrainingResult<()> {
        self.log(LogLevel::Error, message)
    }

    fn metric(&self, key: &str, value: f64, step: u64) -> TrainingResult<()> {
        self.emit(EventBody::Metric { key: key.to_string(), value, step })
    }

    fn progress(&self, current: u64, total: u64) -> TrainingResult<()> {
        self.emit(EventBody::Progress { current, total })
    }

    fn artifact(&self, kind: ArtifactKind, path: &Path, sha256: &str) -> TrainingResult<()> {
        self.emit(EventBody::Artifact {
            kind,
            path: path.to_path_buf(),
            sha256: sha256.to_string(),
        })
    }

    fn device(&self, device: ComputeDevice) -> TrainingResult<()> {
        self.emit(EventBody::Device { name: device.to_string() })
    }

    /// Terminal event. A well-behaved run calls this exactly once, last.
    fn status(&self, state: RunState, error: Option<&str>) -> TrainingResult<()> {
        debug_assert!(state.is_terminal(), "status events carry a terminal state");
        self.emit(EventBody::Status { state, error: error.map(str::to_string) })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> TrainingResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TrainingError::EventStream("event sink lock poisoned".to_string()))
}

/// Writes one JSON object per line and flushes after every event.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: Mutex<W>,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> TrainingResult<W> {
        self.writer
            .into_inner()
            .map_err(|_| TrainingError::EventStream("event sink lock poisoned".to_string()))
    }
}

impl JsonlSink<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl JsonlSink<BufWriter<File>> {
    /// Create (or truncate) a JSONL file sink.
    pub fn create(path: &Path) -> TrainingResult<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> EventSink for JsonlSink<W> {
    fn record(&self, event: &RunEvent) -> TrainingResult<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = lock(&self.writer)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory. Reads and writes both recover a poisoned lock.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<RunEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.guard().clone()
    }

    pub fn bodies(&self) -> Vec<EventBody> {
        self.events().into_iter().map(|e| e.body).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &RunEvent) -> TrainingResult<()> {
        self.guard().push(event.clone());
        Ok(())
    }
}

/// Forwards every event to two sinks, primary first.
///
/// Only the primary's errors are returned. Secondary failures are logged
/// through `tracing` and dropped.
pub struct TeeSink<'a> {
    primary: &'a dyn EventSink,
    secondary: &'a dyn EventSink,
}

impl<'a> TeeSink<'a> {
    pub fn new(primary: &'a dyn EventSink, secondary: &'a dyn EventSink) -> Self {
        Self { primary, secondary }
    }
}

impl EventSink for TeeSink<'_> {
    fn record(&self, event: &RunEvent) -> TrainingResult<()> {
        self.primary.record(event)?;
        if let Err(err) = self.secondary.record(event) {
            tracing::warn!(error = %err, event = event.kind(), "failed to mirror event");
        }
        Ok(())
    }
}
