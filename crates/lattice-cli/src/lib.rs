//! Lattice network CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// lattice-net - render and validate cluster network manifests
#[derive(Parser, Debug)]
#[command(name = "lattice-net")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit JSON log lines on stderr
    #[arg(long, global = true, env = "LATTICE_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render the manifests for a network spec
    Render(commands::render::RenderArgs),
    /// Default and validate a network spec without rendering
    Validate(commands::validate::ValidateArgs),
    /// Print the LatticeNetwork CustomResourceDefinition
    Crd,
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Render(args) => commands::render::run(args),
            Commands::Validate(args) => commands::validate::run(args),
            Commands::Crd => commands::print_crd(),
        }
    }
}
