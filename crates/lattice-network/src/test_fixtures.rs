//! Shared specs and fact snapshots for unit tests

use lattice_common::crd::{ClusterNetworkEntry, DefaultNetworkDefinition, NetworkSpec};

use crate::facts::{
    ApiServerEndpoint, BootstrapFacts, KuryrFacts, NodeIdentityFacts, OpenStackCredentials,
};

/// Minimal Kuryr spec: one service network, one cluster network, no overrides
pub fn kuryr_spec() -> NetworkSpec {
    NetworkSpec {
        service_network: vec!["172.30.0.0/16".to_string()],
        cluster_network: vec![ClusterNetworkEntry {
            cidr: "10.128.0.0/15".to_string(),
            host_prefix: Some(23),
        }],
        default_network: DefaultNetworkDefinition {
            type_: "Kuryr".to_string(),
            kuryr_config: None,
        },
        ..Default::default()
    }
}

/// Spec for a pod network installed outside Lattice
pub fn third_party_spec() -> NetworkSpec {
    let mut spec = kuryr_spec();
    spec.default_network.type_ = "ThirdParty".to_string();
    spec
}

/// Complete OpenStack discovery results
pub fn kuryr_facts() -> KuryrFacts {
    KuryrFacts {
        auth_url: "https://keystone.example.com:5000/v3".to_string(),
        region_name: Some("regionOne".to_string()),
        project_id: "project-1".to_string(),
        credentials: OpenStackCredentials {
            username: "kuryr".to_string(),
            password: "s3cret".to_string(),
            user_domain_name: None,
        },
        ca_bundle: None,
        pod_subnetpool_id: "subnetpool-1".to_string(),
        service_subnet_id: "subnet-svc".to_string(),
        router_id: "router-1".to_string(),
        worker_nodes_subnet_ids: vec!["subnet-workers".to_string()],
        pod_security_group_ids: vec!["sg-pods".to_string()],
        external_network_id: Some("ext-net".to_string()),
        octavia_provider: Some("amphora".to_string()),
        octavia_version: Some("2.13".to_string()),
        rollout: Default::default(),
    }
}

/// Fact snapshot for a fresh install with every fact present
pub fn full_facts() -> BootstrapFacts {
    BootstrapFacts {
        running_release_version: None,
        api_server: Some(ApiServerEndpoint {
            host: "api-int.example.com".to_string(),
            port: 6443,
        }),
        kuryr: Some(kuryr_facts()),
        node_identity: NodeIdentityFacts {
            ca_bundle: Some("-----BEGIN CERTIFICATE-----".to_string()),
            webhook_ready: true,
        },
    }
}
