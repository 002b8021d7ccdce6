//! Bootstrap facts
//!
//! Cluster state discovered once by an external collaborator before a pass
//! starts and handed to every provider's `render` as an immutable snapshot.
//! Providers read these values; they never go looking for them.

use serde::{Deserialize, Serialize};

/// Everything discovered about the cluster for one reconcile pass
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapFacts {
    /// Release version currently running (unset on a fresh install)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_release_version: Option<String>,

    /// Internal API server endpoint for components that cannot use the service network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServerEndpoint>,

    /// OpenStack facts for Kuryr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kuryr: Option<KuryrFacts>,

    /// Node identity webhook facts
    #[serde(default)]
    pub node_identity: NodeIdentityFacts,
}

/// API server host and port
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerEndpoint {
    /// Hostname or IP
    pub host: String,
    /// Port
    pub port: u16,
}

impl ApiServerEndpoint {
    /// `https://host:port`, bracketing IPv6 literals
    pub fn url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("https://[{}]:{}", self.host, self.port)
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }
}

/// OpenStack topology, credentials, and rollout state used by Kuryr
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KuryrFacts {
    /// Keystone endpoint
    pub auth_url: String,
    /// OpenStack region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    /// Project the cluster's resources live in
    pub project_id: String,
    /// Credentials for the controller
    pub credentials: OpenStackCredentials,
    /// CA bundle for the OpenStack API, when it uses a private CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// Subnet pool pod subnets are allocated from
    pub pod_subnetpool_id: String,
    /// Neutron subnet backing the service network
    pub service_subnet_id: String,
    /// Router pod and service subnets attach to
    pub router_id: String,
    /// Subnets hosting the worker nodes, used for nested pod ports
    #[serde(default)]
    pub worker_nodes_subnet_ids: Vec<String>,
    /// Security groups applied to pod ports
    #[serde(default)]
    pub pod_security_group_ids: Vec<String>,
    /// External network for load balancer floating IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network_id: Option<String>,
    /// Octavia provider driver (e.g., "amphora", "ovn")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub octavia_provider: Option<String>,
    /// Octavia API version (e.g., "2.13")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub octavia_version: Option<String>,
    /// Rollout progress of the currently deployed components
    #[serde(default)]
    pub rollout: ComponentRollout,
}

/// OpenStack user credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackCredentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// User domain (default: "Default")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain_name: Option<String>,
}

/// Whether each component finished rolling out to the target release
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRollout {
    /// Every CNI daemon pod runs the target release
    #[serde(default)]
    pub daemon_updated: bool,
    /// The controller runs the target release
    #[serde(default)]
    pub controller_updated: bool,
}

/// Node identity webhook facts
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentityFacts {
    /// CA bundle the API server uses to trust the webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// The webhook pods report ready
    #[serde(default)]
    pub webhook_ready: bool,
}
