//! Provider-specific configuration types for cluster networking.
//!
//! Each provider module contains the configuration struct for one network
//! component:
//! - Kuryr (OpenStack-integrated pod/service networking)
//! - Standalone kube-proxy
//! - Multus secondary networks
//! - Network node identity webhook

mod kube_proxy;
mod kuryr;
mod multus;
mod node_identity;

pub use kube_proxy::ProxyConfig;
pub use kuryr::KuryrConfig;
pub use multus::{
    AdditionalNetwork, AdditionalNetworkType, IpamConfig, IpamType, MacvlanMode,
    SimpleMacvlanConfig, StaticIpamAddress, StaticIpamConfig, StaticIpamRoute,
};
pub use node_identity::NodeIdentityConfig;
