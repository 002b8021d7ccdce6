//! Release configuration
//!
//! Image references and the release version are explicit inputs to manifest
//! rendering rather than process environment. The built-in defaults pin the
//! release this build ships; a YAML file can override any subset of them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Release version rendered when no configuration is supplied
pub const DEFAULT_RELEASE_VERSION: &str = "4.14.0";

const IMAGE_REGISTRY: &str = "ghcr.io/lattice-dev";

/// Release-wide values passed into rendering
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseConfig {
    /// Release version being rolled out (e.g., "4.14.0")
    pub version: String,

    /// Container images for every rendered workload
    pub images: ImageRefs,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_RELEASE_VERSION.to_string(),
            images: ImageRefs::default(),
        }
    }
}

/// Container image references
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRefs {
    /// kuryr-controller image
    pub kuryr_controller: String,
    /// kuryr-cni daemon image
    pub kuryr_daemon: String,
    /// kube-proxy image
    pub kube_proxy: String,
    /// multus daemon image
    pub multus: String,
    /// Legacy multus admission controller image
    pub multus_admission_controller: String,
    /// Network node identity webhook image
    pub network_node_identity: String,
}

impl Default for ImageRefs {
    fn default() -> Self {
        let image = |name: &str| format!("{}/{}:v{}", IMAGE_REGISTRY, name, DEFAULT_RELEASE_VERSION);
        Self {
            kuryr_controller: image("kuryr-controller"),
            kuryr_daemon: image("kuryr-cni"),
            kube_proxy: image("kube-proxy"),
            multus: image("multus-cni"),
            multus_admission_controller: image("multus-admission-controller"),
            network_node_identity: image("network-node-identity"),
        }
    }
}

impl ReleaseConfig {
    /// Parse a release configuration from YAML; missing fields keep their defaults
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| Error::config("yaml", e.to_string()))
    }

    /// Load a release configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                path.display().to_string(),
                format!("failed to read: {}", e),
            )
        })?;
        serde_yaml::from_str(&data)
            .map_err(|e| Error::config(path.display().to_string(), e.to_string()))
    }
}
