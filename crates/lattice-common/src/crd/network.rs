//! LatticeNetwork Custom Resource Definition
//!
//! The LatticeNetwork CRD carries the desired cluster-wide network state:
//! service and cluster networks, the default (pod) network provider, and the
//! companion components deployed alongside it (standalone kube-proxy, multus,
//! network node identity).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::providers::{AdditionalNetwork, KuryrConfig, NodeIdentityConfig, ProxyConfig};
use crate::Error;

/// Specification for a LatticeNetwork
///
/// Fields left unset are filled with computed defaults by the network
/// pipeline. Explicitly set fields are never overwritten.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.lattice.dev",
    version = "v1alpha1",
    kind = "LatticeNetwork",
    plural = "latticenetworks",
    shortname = "lnet",
    status = "LatticeNetworkStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.defaultNetwork.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// CIDRs for service ClusterIPs (some providers require exactly one)
    #[serde(default)]
    pub service_network: Vec<String>,

    /// CIDRs from which pod IPs are allocated
    #[serde(default)]
    pub cluster_network: Vec<ClusterNetworkEntry>,

    /// The default pod network provider and its configuration
    #[serde(default)]
    pub default_network: DefaultNetworkDefinition,

    /// Standalone kube-proxy configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy_config: Option<ProxyConfig>,

    /// Whether to deploy the standalone kube-proxy (unset: decided by network type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_kube_proxy: Option<bool>,

    /// Disable multus and secondary network attachments (unset: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_multi_network: Option<bool>,

    /// Secondary networks attached to pods through multus
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_networks: Vec<AdditionalNetwork>,

    /// Network node identity admission webhook configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_identity: Option<NodeIdentityConfig>,
}

/// A pod network CIDR and the per-node subnet size carved out of it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    /// Network CIDR (e.g., "10.128.0.0/14")
    pub cidr: String,

    /// Prefix length of the subnet allocated to each node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_prefix: Option<u32>,
}

impl ClusterNetworkEntry {
    /// Create an entry with the given CIDR and no host prefix
    pub fn new(cidr: impl Into<String>) -> Self {
        Self {
            cidr: cidr.into(),
            host_prefix: None,
        }
    }
}

/// Default network selection
///
/// `type` selects exactly one provider. Configuration blocks for other
/// providers may remain present; they are ignored until selected again.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultNetworkDefinition {
    /// Provider type tag (e.g., "Kuryr", "ThirdParty")
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Kuryr (OpenStack-integrated SDN) configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kuryr_config: Option<KuryrConfig>,
}

/// Known default network provider types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkType {
    /// Kuryr: pods and services backed by OpenStack Neutron and Octavia
    Kuryr,
    /// Pod network installed outside Lattice; only companion components are managed
    ThirdParty,
}

impl NetworkType {
    /// The type tag as it appears in the spec
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kuryr => "Kuryr",
            Self::ThirdParty => "ThirdParty",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Kuryr" => Ok(Self::Kuryr),
            "ThirdParty" => Ok(Self::ThirdParty),
            other => Err(Error::unsupported_type(other)),
        }
    }
}

impl NetworkSpec {
    /// Parse the default network type tag
    pub fn network_type(&self) -> Result<NetworkType, Error> {
        self.default_network.type_.parse()
    }

    /// Kuryr config, if present
    pub fn kuryr(&self) -> Option<&KuryrConfig> {
        self.default_network.kuryr_config.as_ref()
    }
}

/// Lifecycle phase of the most recent reconcile pass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NetworkPhase {
    /// No pass has completed yet
    #[default]
    Pending,
    /// Manifests were rendered for the current spec
    Rendered,
    /// The spec failed validation or change-safety checks
    Rejected,
}

impl fmt::Display for NetworkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Rendered => write!(f, "Rendered"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Status for a LatticeNetwork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatticeNetworkStatus {
    /// Phase of the last reconcile pass
    #[serde(default)]
    pub phase: NetworkPhase,

    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Every validation or change-safety error from a rejected pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// Config hash per rendered provider
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_hashes: BTreeMap<String, String>,

    /// Release version the manifests were rendered for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_release: Option<String>,
}
