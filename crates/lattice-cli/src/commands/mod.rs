//! CLI commands

use std::path::{Path, PathBuf};

use clap::Args;
use kube::CustomResourceExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use lattice_common::crd::{LatticeNetwork, NetworkSpec};
use lattice_common::ReleaseConfig;
use lattice_network::NetworkReconciler;

use crate::{Error, Result};

pub mod format;
pub mod render;
pub mod validate;

/// Inputs shared by every command that runs a pass
#[derive(Args, Debug)]
pub struct InputArgs {
    /// LatticeNetwork resource or bare network spec (YAML or JSON)
    #[arg(long)]
    pub spec: PathBuf,

    /// Previously applied spec; enables change-safety checks
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Release configuration overriding the built-in version and images
    #[arg(long, env = "LATTICE_RELEASE_CONFIG")]
    pub release: Option<PathBuf>,
}

impl InputArgs {
    /// Reconciler for the selected release
    pub fn reconciler(&self) -> Result<NetworkReconciler> {
        let release = match &self.release {
            Some(path) => ReleaseConfig::from_yaml_file(path)?,
            None => ReleaseConfig::default(),
        };
        debug!(release = %release.version, "release configuration loaded");
        Ok(NetworkReconciler::new(release))
    }

    /// The desired spec
    pub fn spec(&self) -> Result<NetworkSpec> {
        load_spec(&self.spec)
    }

    /// The previously applied spec, if one was given
    pub fn previous(&self) -> Result<Option<NetworkSpec>> {
        self.previous.as_deref().map(load_spec).transpose()
    }
}

/// Read and parse a YAML (or JSON) document
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    serde_yaml::from_str(&content).map_err(|e| Error::invalid_yaml(path, e))
}

/// Load a network spec from either a full LatticeNetwork resource or a bare spec
pub fn load_spec(path: &Path) -> Result<NetworkSpec> {
    let value: serde_yaml::Value = load_yaml(path)?;
    if value.get("kind").is_some() {
        let resource: LatticeNetwork =
            serde_yaml::from_value(value).map_err(|e| Error::invalid_yaml(path, e))?;
        return Ok(resource.spec);
    }
    serde_yaml::from_value(value).map_err(|e| Error::invalid_yaml(path, e))
}

/// Print the LatticeNetwork CRD as YAML
pub fn print_crd() -> Result<()> {
    print!("{}", serde_yaml::to_string(&LatticeNetwork::crd())?);
    Ok(())
}
