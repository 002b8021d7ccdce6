//! Network provider abstraction layer
//!
//! Every network component the pipeline manages implements
//! [`NetworkProvider`]: fill defaults, validate, check change safety, render.
//! The primary provider is selected from `spec.defaultNetwork.type` through
//! [`create_provider`]; companion providers take part in every pass and gate
//! themselves with [`NetworkProvider::is_active`].
//!
//! # Supported Providers
//!
//! - [`KuryrProvider`] - OpenStack-integrated pod network (primary)
//! - [`KubeProxyProvider`] - standalone kube-proxy (companion)
//! - [`MultusProvider`] - multus and secondary networks (companion)
//! - [`NodeIdentityProvider`] - node identity admission webhook (companion)

mod kube_proxy;
mod kuryr;
mod multus;
mod node_identity;

pub use kube_proxy::KubeProxyProvider;
pub use kuryr::KuryrProvider;
pub use multus::MultusProvider;
pub use node_identity::NodeIdentityProvider;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use lattice_common::crd::{NetworkSpec, NetworkType};
use lattice_common::{Error, ReleaseConfig, Result};

use crate::facts::BootstrapFacts;
use crate::manifest::Manifest;

/// Output of one provider's render
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedProvider {
    /// Objects to apply, in the order the provider produced them
    pub objects: Vec<Manifest>,
    /// Render-relevant values; hashed into the config-hash annotation
    pub data: BTreeMap<String, Value>,
    /// Degraded-discovery conditions that withheld or deferred objects
    pub warnings: Vec<Error>,
}

impl RenderedProvider {
    /// Record a render-relevant value
    pub fn insert_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }
}

/// Capability set implemented once per network provider
pub trait NetworkProvider: Send + Sync {
    /// Stable provider name used in logs, errors, and status
    fn name(&self) -> &'static str;

    /// Whether the provider renders anything for this (defaulted) spec
    fn is_active(&self, spec: &NetworkSpec) -> bool;

    /// Return a copy of `spec` with unset fields of this provider's subtree filled.
    ///
    /// Never overwrites an explicitly-set field.
    fn fill_defaults(&self, spec: &NetworkSpec) -> NetworkSpec;

    /// Every structural and semantic violation in this provider's subtree
    fn validate(&self, spec: &NetworkSpec) -> Vec<Error>;

    /// Every field that changed from `previous` to `next` and must not change
    fn is_change_safe(&self, previous: &NetworkSpec, next: &NetworkSpec) -> Vec<Error>;

    /// Render objects from a validated spec and the pass's fact snapshot
    fn render(&self, spec: &NetworkSpec, facts: &BootstrapFacts) -> Result<RenderedProvider>;
}

/// Create the primary provider for a default network type
///
/// `ThirdParty` networks are installed outside Lattice and have no primary
/// provider; only the companions run.
pub fn create_provider(
    network_type: NetworkType,
    release: Arc<ReleaseConfig>,
) -> Option<Box<dyn NetworkProvider>> {
    match network_type {
        NetworkType::Kuryr => Some(Box::new(KuryrProvider::new(release))),
        NetworkType::ThirdParty => None,
    }
}

/// Builds the provider set for a pass
#[derive(Clone, Debug)]
pub struct ProviderRegistry {
    release: Arc<ReleaseConfig>,
}

impl ProviderRegistry {
    /// Create a registry rendering for the given release
    pub fn new(release: ReleaseConfig) -> Self {
        Self {
            release: Arc::new(release),
        }
    }

    /// The release this registry renders for
    pub fn release(&self) -> &ReleaseConfig {
        &self.release
    }

    /// Companion providers, in defaulting order
    pub fn companions(&self) -> Vec<Box<dyn NetworkProvider>> {
        vec![
            Box::new(KubeProxyProvider::new(self.release.clone())),
            Box::new(MultusProvider::new(self.release.clone())),
            Box::new(NodeIdentityProvider::new(self.release.clone())),
        ]
    }

    /// The primary provider (if any) followed by every companion
    ///
    /// Fails with `UnsupportedType` for an unknown default network tag.
    pub fn for_spec(&self, spec: &NetworkSpec) -> Result<Vec<Box<dyn NetworkProvider>>> {
        let network_type = spec.network_type()?;
        let mut providers: Vec<Box<dyn NetworkProvider>> = Vec::new();
        if let Some(primary) = create_provider(network_type, self.release.clone()) {
            providers.push(primary);
        }
        providers.extend(self.companions());
        Ok(providers)
    }
}

/// Annotate a workload as create-only (applied if absent, never updated)
pub(crate) fn mark_create_only(manifest: &mut Manifest) {
    manifest.annotate(lattice_common::CREATE_ONLY_ANNOTATION, "true");
}

/// Annotate an object as create-wait (created once prerequisites are ready)
pub(crate) fn mark_create_wait(manifest: &mut Manifest) {
    manifest.annotate(lattice_common::CREATE_WAIT_ANNOTATION, "true");
}

/// Report `field` as an unsafe change when it was set before and differs now.
///
/// A field going from unset to set is a first assignment, not a change.
pub(crate) fn check_unchanged<T: PartialEq + Debug>(
    errors: &mut Vec<Error>,
    field: &str,
    previous: &Option<T>,
    next: &Option<T>,
) {
    if let Some(prev) = previous {
        if next.as_ref() != Some(prev) {
            let next = next
                .as_ref()
                .map_or_else(|| "unset".to_string(), |n| format!("{:?}", n));
            errors.push(Error::unsafe_change(
                field,
                format!("{:?} -> {}; immutable once the network is bootstrapped", prev, next),
            ));
        }
    }
}

/// Build a render contract violation, logging it at error level
pub(crate) fn contract_violation(provider: &str, message: impl Into<String>) -> Error {
    let message = message.into();
    error!(provider, %message, "render received input that validation should have rejected");
    Error::render_contract(provider, message)
}

/// Read a field that defaulting always sets
pub(crate) fn required<T: Clone>(provider: &str, field: &str, value: &Option<T>) -> Result<T> {
    value.clone().ok_or_else(|| {
        contract_violation(
            provider,
            format!("{} is unset; defaults were not applied", field),
        )
    })
}

/// Container running `image` with an optional command and args
pub(crate) fn container(name: &str, image: &str, command: Vec<String>, args: Vec<String>) -> Value {
    let mut container = serde_json::json!({
        "name": name,
        "image": image,
        "imagePullPolicy": "IfNotPresent",
        "terminationMessagePolicy": "FallbackToLogsOnError",
    });
    if !command.is_empty() {
        container["command"] = serde_json::json!(command);
    }
    if !args.is_empty() {
        container["args"] = serde_json::json!(args);
    }
    container
}
