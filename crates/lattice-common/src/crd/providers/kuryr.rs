//! Kuryr provider configuration
//!
//! Kuryr backs pod and service networking with OpenStack Neutron ports and
//! Octavia load balancers. Service VIPs are allocated from an OpenStack
//! subnet that must be larger than (and contain) the cluster service network.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kuryr configuration
///
/// All fields are optional; unset fields are filled with computed defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KuryrConfig {
    /// CIDR of the OpenStack subnet for service VIPs
    /// (default: the service network expanded by one prefix bit)
    #[serde(
        rename = "openStackServiceNetwork",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub openstack_service_network: Option<String>,

    /// Pre-create Neutron ports so pods start without waiting on Neutron
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_port_pools_prepopulation: Option<bool>,

    /// Maximum ports kept in a pool (0 = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_max_ports: Option<u32>,

    /// Minimum free ports kept in a pool before it is repopulated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_min_ports: Option<u32>,

    /// Ports created in one bulk request when repopulating a pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_batch_ports: Option<u32>,

    /// Health probe port of the kuryr-cni daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_probes_port: Option<u32>,

    /// Health probe port of the kuryr-controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_probes_port: Option<u32>,

    /// MTU for pod interfaces (unset: taken from the Neutron network)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}
