//! Standalone kube-proxy configuration

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configuration for the standalone kube-proxy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Address kube-proxy binds to (default: 0.0.0.0, or :: on IPv6 clusters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Maximum interval between full iptables syncs, as a duration (e.g., "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iptables_sync_period: Option<String>,

    /// Extra command-line arguments, keyed by flag name without leading dashes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxy_arguments: BTreeMap<String, Vec<String>>,
}
