//! Subnet arithmetic for network validation
//!
//! CIDR parsing, containment, overlap, and "expand by one prefix bit".
//! All operations are address-family aware; networks of different families
//! never contain or overlap each other.

use ipnet::IpNet;
use thiserror::Error;

use lattice_common::Error;

/// Errors from subnet arithmetic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubnetError {
    /// Input is not `address/prefix`
    #[error("invalid CIDR {input:?}: {reason}")]
    Parse {
        /// The rejected input
        input: String,
        /// Parser message
        reason: String,
    },

    /// A /0 network has no larger supernet
    #[error("cannot expand {0}: prefix length is already 0")]
    CannotExpand(IpNet),
}

/// Parse a CIDR, masking any host bits (`10.0.0.7/8` becomes `10.0.0.0/8`)
pub fn parse_cidr(input: &str) -> Result<IpNet, SubnetError> {
    input
        .trim()
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| SubnetError::Parse {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

/// Return the supernet one prefix bit shorter (twice the address space)
pub fn expand(net: &IpNet) -> Result<IpNet, SubnetError> {
    let prefix = net.prefix_len();
    if prefix == 0 {
        return Err(SubnetError::CannotExpand(*net));
    }
    IpNet::new(net.network(), prefix - 1)
        .map(|supernet| supernet.trunc())
        .map_err(|_| SubnetError::CannotExpand(*net))
}

/// True iff every address of `inner` lies within `outer`
pub fn includes(outer: &IpNet, inner: &IpNet) -> bool {
    outer.contains(inner)
}

/// True iff the two networks share at least one address
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    // CIDR blocks are aligned: they intersect iff one holds the other's first address
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Check that a service-subnet override can host the service network.
///
/// Runs every check independently and reports all violations:
/// 1. the override must not overlap any cluster network
/// 2. the override must include the service network
/// 3. the override must be strictly larger than the service network
pub fn validate_service_subnet_sizing(
    field: &str,
    service: &IpNet,
    service_override: &IpNet,
    cluster_networks: &[IpNet],
) -> Vec<Error> {
    let mut errors = Vec::new();

    for cluster in cluster_networks {
        if overlaps(service_override, cluster) {
            errors.push(Error::semantic(
                field,
                format!(
                    "{} overlaps cluster network {}",
                    service_override, cluster
                ),
            ));
        }
    }

    if !includes(service_override, service) {
        errors.push(Error::semantic(
            field,
            format!(
                "{} does not include service network {}",
                service_override, service
            ),
        ));
    }

    if service_override.prefix_len() >= service.prefix_len() {
        errors.push(Error::semantic(
            field,
            format!(
                "{} must be larger than service network {} (prefix /{} is not shorter than /{})",
                service_override,
                service,
                service_override.prefix_len(),
                service.prefix_len()
            ),
        ));
    }

    errors
}
