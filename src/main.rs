//! # WebSocket Benchmark - Main Entry Point
//!
//! The main function performs these key operations:
//! 1. **Parse arguments**: Processes command-line configuration
//! 2. **Initialize logging**: Console output plus an optional log file
//! 3. **Create benchmark config**: Converts CLI args to a validated config
//! 4. **Run**: Executes the selected role and mode until it completes or
//!    Ctrl+C is pressed
//! 5. **Generate results**: Writes the JSON results file when requested
//!
//! Setup failures (invalid configuration, bind failure, connect failure)
//! end the process with a non-zero exit status.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use ws_benchmark::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    cli::Args,
    logging,
    metrics::{LogSink, ReportSink, SinkSet},
    results::{ResultsManager, RunConfiguration},
    shutdown::Shutdown,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive until exit so buffered file logs are flushed.
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting WebSocket Benchmark v{}", ws_benchmark::VERSION);

    let config = BenchmarkConfig::from_args(&args)?;

    let results_manager = Arc::new(ResultsManager::new(
        args.output_file.as_deref(),
        RunConfiguration {
            role: config.role,
            mode: config.mode,
            url: config.url.clone(),
        },
    ));
    let sinks: Vec<Arc<dyn ReportSink>> = vec![Arc::new(LogSink), results_manager.clone()];
    let sink: Arc<dyn ReportSink> = Arc::new(SinkSet::new(sinks));

    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();

    let runner = BenchmarkRunner::new(config);
    let outcome = runner.run(sink, shutdown.clone()).await;
    shutdown.trigger();

    // Reports collected before a failure are still worth keeping.
    results_manager.finalize()?;
    outcome?;

    info!("WebSocket Benchmark finished");
    Ok(())
}
