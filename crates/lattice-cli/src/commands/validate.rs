//! Validate command

use clap::Args;
use tracing::error;

use lattice_network::failure_status;

use super::InputArgs;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Print the spec with every default filled
    #[arg(long)]
    pub show_defaults: bool,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let reconciler = args.inputs.reconciler()?;
    let spec = args.inputs.spec()?;
    let previous = args.inputs.previous()?;

    match reconciler.check(&spec, previous.as_ref()) {
        Ok(defaulted) => {
            if args.show_defaults {
                print!("{}", serde_yaml::to_string(&defaulted)?);
            } else {
                println!("{} valid", args.inputs.spec.display());
            }
            Ok(())
        }
        Err(err) => Err(report_failure(err, &reconciler.registry().release().version)),
    }
}

/// Print every error carried by a failed pass and convert it for the CLI
///
/// Rejections become a `Validation` error summarizing the count; anything
/// else is passed through unchanged.
pub fn report_failure(err: lattice_common::Error, release: &str) -> Error {
    if !matches!(err, lattice_common::Error::Rejected { .. }) {
        error!(error = %err, "network pass failed");
        return Error::Network(err);
    }

    let status = failure_status(&err, release);
    eprintln!("Validation errors:");
    for message in &status.errors {
        eprintln!("  - {}", message);
    }
    Error::validation(format!("spec rejected with {} error(s)", status.errors.len()))
}
