//! Validation helpers shared by providers that read the top-level networks

use ipnet::IpNet;

use lattice_common::crd::NetworkSpec;
use lattice_common::Error;

use crate::subnet::parse_cidr;

/// Field path of the service network list
pub const SERVICE_NETWORK_FIELD: &str = "spec.serviceNetwork";
/// Field path of the cluster network list
pub const CLUSTER_NETWORK_FIELD: &str = "spec.clusterNetwork";

/// Parse every service network, collecting one error per bad entry
pub fn service_networks(spec: &NetworkSpec) -> (Vec<IpNet>, Vec<Error>) {
    let mut nets = Vec::new();
    let mut errors = Vec::new();
    for (i, cidr) in spec.service_network.iter().enumerate() {
        match parse_cidr(cidr) {
            Ok(net) => nets.push(net),
            Err(e) => errors.push(Error::semantic(
                format!("{}[{}]", SERVICE_NETWORK_FIELD, i),
                e.to_string(),
            )),
        }
    }
    (nets, errors)
}

/// Parse every cluster network and its host prefix, collecting one error per bad entry
pub fn cluster_networks(spec: &NetworkSpec) -> (Vec<IpNet>, Vec<Error>) {
    let mut nets = Vec::new();
    let mut errors = Vec::new();
    for (i, entry) in spec.cluster_network.iter().enumerate() {
        let field = format!("{}[{}]", CLUSTER_NETWORK_FIELD, i);
        let net = match parse_cidr(&entry.cidr) {
            Ok(net) => net,
            Err(e) => {
                errors.push(Error::semantic(format!("{}.cidr", field), e.to_string()));
                continue;
            }
        };

        if let Some(host_prefix) = entry.host_prefix {
            let prefix = u32::from(net.prefix_len());
            let max = u32::from(net.max_prefix_len());
            if host_prefix < prefix || host_prefix > max {
                errors.push(Error::semantic(
                    format!("{}.hostPrefix", field),
                    format!(
                        "/{} must be between /{} and /{} for {}",
                        host_prefix, prefix, max, net
                    ),
                ));
            }
        }
        nets.push(net);
    }
    (nets, errors)
}

/// Structural check that a list field has exactly one entry
pub fn require_exactly_one(field: &str, len: usize) -> Option<Error> {
    match len {
        1 => None,
        0 => Some(Error::structural(field, "exactly one entry is required, found none")),
        n => Some(Error::structural(
            field,
            format!("exactly one entry is required, found {}", n),
        )),
    }
}
