//! lattice-net
//!
//! Renders and validates Lattice cluster network manifests.

use anyhow::Context;
use clap::Parser;

use lattice_cli::Cli;
use lattice_common::telemetry::{init_telemetry, TelemetryConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "lattice-net".to_string(),
        json: cli.json_logs,
    })
    .context("failed to initialize logging")?;

    cli.run()?;
    Ok(())
}
