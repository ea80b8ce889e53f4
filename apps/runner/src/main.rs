//! Babushka runner - executes one training run for the host application.
//!
//! Run events are written to stdout as line-delimited JSON. Diagnostics go to
//! stderr through `tracing`. The exit code is 0 when the run succeeded and 1
//! otherwise.

use babushka_training::{Capabilities, DEFAULT_TEMPLATE, JsonlSink, RunOrchestrator, RunRequest};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Babushka training runner
#[derive(Parser, Debug)]
#[command(name = "babushka-runner", author, version, about = "Run a Babushka training job")]
struct Args {
    /// Identifier assigned by the host
    #[arg(long)]
    run_id: String,

    /// Run configuration (JSON, or YAML for .yaml/.yml)
    #[arg(long)]
    config: PathBuf,

    /// Directory that receives the model bundle
    #[arg(long)]
    output_dir: PathBuf,

    /// Optional dataset (.csv, or a JSON archive with X and y)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Template to use when the config has no `template` key
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    template: String,

    /// Log level for stderr diagnostics (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // stdout carries the event stream.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("failed to initialize logging: {e:#}");
    }

    let capabilities = Capabilities::detect();
    tracing::debug!(ensemble = capabilities.ensemble, neural = capabilities.neural, "capabilities detected");

    let mut request = RunRequest::new(args.run_id, args.config, args.output_dir).with_default_template(args.template);
    if let Some(dataset) = args.dataset {
        request = request.with_dataset(dataset);
    }

    let sink = JsonlSink::stdout();
    let outcome = RunOrchestrator::new(&sink).with_capabilities(capabilities).execute(&request);
    ExitCode::from(outcome.exit_code())
}
