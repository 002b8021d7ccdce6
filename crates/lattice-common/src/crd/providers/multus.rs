//! Additional (secondary) network definitions attached through multus

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A secondary network made available to pods via a NetworkAttachmentDefinition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalNetwork {
    /// Network name (also the NetworkAttachmentDefinition name)
    pub name: String,

    /// Namespace the NetworkAttachmentDefinition is created in (default: "default")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// How the CNI configuration is provided
    #[serde(rename = "type")]
    pub type_: AdditionalNetworkType,

    /// Raw CNI configuration JSON (required for `Raw`)
    #[serde(
        rename = "rawCNIConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_cni_config: Option<String>,

    /// Generated macvlan configuration (used by `SimpleMacvlan`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_macvlan_config: Option<SimpleMacvlanConfig>,
}

/// Additional network flavors
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AdditionalNetworkType {
    /// User-supplied CNI JSON, passed through verbatim
    Raw,
    /// macvlan CNI config generated from structured fields
    SimpleMacvlan,
}

impl std::fmt::Display for AdditionalNetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "Raw"),
            Self::SimpleMacvlan => write!(f, "SimpleMacvlan"),
        }
    }
}

/// Structured macvlan configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMacvlanConfig {
    /// Host interface to attach to (unset: the default route interface)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// macvlan mode (default: bridge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MacvlanMode>,

    /// MTU for the macvlan interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    /// IP address management (default: DHCP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam_config: Option<IpamConfig>,
}

/// macvlan operating modes
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MacvlanMode {
    /// Endpoints on the same master can talk directly
    Bridge,
    /// No traffic between endpoints on the same master
    Private,
    /// Traffic between endpoints hairpins through the external switch
    Vepa,
    /// Single endpoint owns the master interface
    Passthru,
}

impl MacvlanMode {
    /// Mode name as used in CNI configuration
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Private => "private",
            Self::Vepa => "vepa",
            Self::Passthru => "passthru",
        }
    }
}

/// IPAM configuration for a generated network
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfig {
    /// IPAM flavor
    #[serde(rename = "type")]
    pub type_: IpamType,

    /// Static addresses and routes (used by `Static`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ipam_config: Option<StaticIpamConfig>,
}

/// IPAM flavors
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum IpamType {
    /// Fixed addresses from `staticIPAMConfig`
    Static,
    /// Addresses leased from a DHCP server on the master network
    #[serde(rename = "DHCP")]
    Dhcp,
}

/// Static IPAM addresses and routes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticIpamConfig {
    /// Interface addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<StaticIpamAddress>,

    /// Routes installed in the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<StaticIpamRoute>,
}

/// A static interface address
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticIpamAddress {
    /// Address in CIDR form (e.g., "192.168.1.10/24")
    pub address: String,

    /// Default gateway for this address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// A static route
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticIpamRoute {
    /// Destination CIDR
    pub destination: String,

    /// Next hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}
