//! broker-loadgen - Producer/consumer load generator for message brokers

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use loadgen_core::orchestrator::spinner;
use loadgen_core::{LoadTestBuilder, RunConfig, RunSummary};
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.run_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Load test aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: cli::Cli, config: RunConfig) -> Result<()> {
    let connector = loadgen_transports::connector_for(&config);

    let mut builder = LoadTestBuilder::new().config(config).connector(connector);
    if std::io::stdout().is_terminal() {
        builder = builder.progress(spinner());
    }
    let runner = builder.build().context("startup failed")?;

    let summary = runner
        .run_with_signal_handling()
        .await
        .context("load test failed")?;

    println!("{}", summary);

    if let Some(path) = &cli.output {
        write_summary(&summary, path)?;
        tracing::info!(path = %path.display(), "Summary written");
    }

    Ok(())
}

fn write_summary(summary: &RunSummary, path: &std::path::Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write summary to {}", path.display()))
}
