//! Custom Resource Definitions for Lattice networking
//!
//! This module contains the LatticeNetwork CRD and the provider-specific
//! configuration blocks it carries.

mod network;
mod providers;

pub use network::{
    ClusterNetworkEntry, DefaultNetworkDefinition, LatticeNetwork, LatticeNetworkStatus,
    NetworkPhase, NetworkSpec, NetworkType,
};
pub use providers::{
    AdditionalNetwork, AdditionalNetworkType, IpamConfig, IpamType, KuryrConfig, MacvlanMode,
    NodeIdentityConfig, ProxyConfig, SimpleMacvlanConfig, StaticIpamAddress, StaticIpamConfig,
    StaticIpamRoute,
};

/// Validate a DNS-1123 label (lowercase alphanumeric with hyphens, max 63 chars).
///
/// Used for additional network names and namespaces.
pub fn validate_dns_label(s: &str, what: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if s.len() > 63 {
        return Err(format!("{} must be at most 63 characters: {}", what, s));
    }

    let bytes = s.as_bytes();
    if !bytes[0].is_ascii_lowercase() && !bytes[0].is_ascii_digit() {
        return Err(format!(
            "{} must start with a lowercase letter or digit: {}",
            what, s
        ));
    }
    if s.ends_with('-') {
        return Err(format!("{} cannot end with hyphen: {}", what, s));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "{} must be lowercase alphanumeric with hyphens: {}",
            what, s
        ));
    }

    Ok(())
}
