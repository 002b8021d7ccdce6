//! Reconcile pass
//!
//! One pass takes a desired [`NetworkSpec`], the previously applied spec (if
//! any) and a snapshot of bootstrap facts, and either rejects the spec with
//! every error found or returns the ordered manifests to apply:
//!
//! ```text
//! Unset -> Defaulted -> Validated -> Rendered
//!                    \-> Rejected  \-> Rejected
//! ```
//!
//! A rejected pass has no side effects; nothing is rendered.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::facts::BootstrapFacts;
use crate::hash::hash_value;
use crate::manifest::Manifest;
use crate::provider::{NetworkProvider, ProviderRegistry};
use lattice_common::crd::{LatticeNetworkStatus, NetworkPhase, NetworkSpec};
use lattice_common::{Error, ReleaseConfig, Result, CONFIG_HASH_ANNOTATION};

/// Where a pass currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilePhase {
    /// Nothing applied yet
    Unset,
    /// Every provider filled its defaults
    Defaulted,
    /// Validation and change-safety checks passed
    Validated,
    /// Manifests were produced
    Rendered,
    /// Validation or change safety failed
    Rejected,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "Unset"),
            Self::Defaulted => write!(f, "Defaulted"),
            Self::Validated => write!(f, "Validated"),
            Self::Rendered => write!(f, "Rendered"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Result of a successful pass
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedNetwork {
    /// The spec with every default filled; persist it as the next pass's previous spec
    pub spec: NetworkSpec,
    /// Objects to apply, namespaces first
    pub objects: Vec<Manifest>,
    /// Render data per active provider
    pub data: BTreeMap<String, BTreeMap<String, Value>>,
    /// Config hash per active provider
    pub config_hashes: BTreeMap<String, String>,
    /// Degraded-discovery conditions; the pass still succeeded
    pub warnings: Vec<Error>,
    /// Release version the objects were rendered for
    pub release: String,
}

impl RenderedNetwork {
    /// Status to record on the LatticeNetwork
    pub fn status(&self) -> LatticeNetworkStatus {
        let mut message = format!("rendered {} objects", self.objects.len());
        if !self.warnings.is_empty() {
            let warnings: Vec<String> = self.warnings.iter().map(ToString::to_string).collect();
            message.push_str(&format!(
                " with {} warning(s): {}",
                warnings.len(),
                warnings.join("; ")
            ));
        }
        LatticeNetworkStatus {
            phase: NetworkPhase::Rendered,
            message: Some(message),
            errors: Vec::new(),
            config_hashes: self.config_hashes.clone(),
            observed_release: Some(self.release.clone()),
        }
    }

    /// Every object as a multi-document YAML stream
    pub fn to_yaml(&self) -> Result<String> {
        let docs = self
            .objects
            .iter()
            .map(Manifest::to_yaml)
            .collect::<Result<Vec<_>>>()?;
        Ok(docs
            .iter()
            .map(|d| format!("---\n{}", d))
            .collect::<String>())
    }
}

/// Status to record for a pass that failed
///
/// Rejections and unsupported types are the user's to fix and mark the
/// network `Rejected`; anything else leaves it `Pending`.
pub fn failure_status(err: &Error, release: &str) -> LatticeNetworkStatus {
    let phase = match err {
        Error::Rejected { .. } | Error::UnsupportedType { .. } => NetworkPhase::Rejected,
        _ => NetworkPhase::Pending,
    };
    let errors = match err.violations() {
        [] => vec![err.to_string()],
        violations => violations.iter().map(ToString::to_string).collect(),
    };
    LatticeNetworkStatus {
        phase,
        message: Some(err.to_string()),
        errors,
        config_hashes: BTreeMap::new(),
        observed_release: Some(release.to_string()),
    }
}

/// Runs reconcile passes for one release
#[derive(Clone, Debug)]
pub struct NetworkReconciler {
    registry: ProviderRegistry,
}

impl NetworkReconciler {
    /// Create a reconciler rendering for the given release
    pub fn new(release: ReleaseConfig) -> Self {
        Self {
            registry: ProviderRegistry::new(release),
        }
    }

    /// The provider registry used by each pass
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Fill every provider's defaults, primary first
    pub fn fill_defaults(&self, spec: &NetworkSpec) -> Result<NetworkSpec> {
        let providers = self.registry.for_spec(spec)?;
        Ok(Self::defaulted(&providers, spec))
    }

    /// Default and validate without rendering
    ///
    /// Returns the defaulted spec, or a `Rejected` error carrying every
    /// validation and change-safety violation.
    pub fn check(&self, spec: &NetworkSpec, previous: Option<&NetworkSpec>) -> Result<NetworkSpec> {
        let providers = self.registry.for_spec(spec)?;
        let spec = Self::defaulted(&providers, spec);
        let previous = previous.map(|prev| self.as_applied(prev));
        Self::validated(&providers, &spec, previous.as_ref())?;
        Ok(spec)
    }

    /// Run one full pass
    pub fn reconcile(
        &self,
        spec: &NetworkSpec,
        previous: Option<&NetworkSpec>,
        facts: &BootstrapFacts,
    ) -> Result<RenderedNetwork> {
        let release = self.registry.release().version.clone();
        debug!(
            phase = %ReconcilePhase::Unset,
            network_type = %spec.default_network.type_,
            "starting network pass"
        );

        let providers = self.registry.for_spec(spec)?;
        let spec = Self::defaulted(&providers, spec);
        info!(phase = %ReconcilePhase::Defaulted, providers = providers.len(), "defaults filled");

        let previous = previous.map(|prev| self.as_applied(prev));
        if let Err(err) = Self::validated(&providers, &spec, previous.as_ref()) {
            warn!(phase = %ReconcilePhase::Rejected, error = %err, "network spec rejected");
            return Err(err);
        }
        info!(phase = %ReconcilePhase::Validated, "network spec accepted");

        let mut objects = Vec::new();
        let mut data = BTreeMap::new();
        let mut config_hashes = BTreeMap::new();
        let mut warnings = Vec::new();

        for provider in providers.iter().filter(|p| p.is_active(&spec)) {
            let rendered = provider.render(&spec, facts)?;
            let hash = hash_value(&Value::Object(
                rendered
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>(),
            ))?;

            let mut provider_objects = rendered.objects;
            for object in provider_objects.iter_mut().filter(|m| m.is_workload()) {
                object.annotate(CONFIG_HASH_ANNOTATION, hash.clone());
                object.annotate_pod_template(CONFIG_HASH_ANNOTATION, hash.clone())?;
            }
            debug!(
                provider = provider.name(),
                objects = provider_objects.len(),
                hash = %hash,
                "provider rendered"
            );

            for warning in &rendered.warnings {
                warn!(
                    provider = provider.name(),
                    warning = %warning,
                    "rendered with degraded discovery"
                );
            }

            objects.extend(provider_objects);
            warnings.extend(rendered.warnings);
            config_hashes.insert(provider.name().to_string(), hash);
            data.insert(provider.name().to_string(), rendered.data);
        }

        objects.sort_by_key(|m| !m.is_namespace());
        info!(
            phase = %ReconcilePhase::Rendered,
            objects = objects.len(),
            warnings = warnings.len(),
            release = %release,
            "network rendered"
        );

        Ok(RenderedNetwork {
            spec,
            objects,
            data,
            config_hashes,
            warnings,
            release,
        })
    }

    /// Fill a previous spec's defaults with the providers of its own type
    ///
    /// Defaulting is idempotent, so a spec stored as applied comes back
    /// unchanged. A previous spec of an unknown type is compared as given.
    fn as_applied(&self, previous: &NetworkSpec) -> NetworkSpec {
        match self.registry.for_spec(previous) {
            Ok(providers) => Self::defaulted(&providers, previous),
            Err(_) => previous.clone(),
        }
    }

    fn defaulted(providers: &[Box<dyn NetworkProvider>], spec: &NetworkSpec) -> NetworkSpec {
        providers
            .iter()
            .fold(spec.clone(), |acc, provider| provider.fill_defaults(&acc))
    }

    fn validated(
        providers: &[Box<dyn NetworkProvider>],
        spec: &NetworkSpec,
        previous: Option<&NetworkSpec>,
    ) -> Result<()> {
        let errors = dedup(
            providers
                .iter()
                .filter(|p| p.is_active(spec))
                .flat_map(|p| p.validate(spec))
                .collect(),
        );
        if !errors.is_empty() {
            return Err(Error::rejected("validation", errors));
        }

        let Some(previous) = previous.filter(|prev| *prev != spec) else {
            return Ok(());
        };

        let mut errors = Vec::new();
        if previous.default_network.type_ != spec.default_network.type_ {
            errors.push(Error::unsafe_change(
                "spec.defaultNetwork.type",
                format!(
                    "{:?} -> {:?}; migrating the default network is not supported",
                    previous.default_network.type_, spec.default_network.type_
                ),
            ));
        }
        if previous.service_network != spec.service_network {
            errors.push(Error::unsafe_change(
                "spec.serviceNetwork",
                format!(
                    "{:?} -> {:?}; service networks are immutable",
                    previous.service_network, spec.service_network
                ),
            ));
        }
        errors.extend(providers.iter().flat_map(|p| p.is_change_safe(previous, spec)));

        let errors = dedup(errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::rejected("change safety", errors))
        }
    }
}

/// Drop repeated errors, keeping first occurrences in order
fn dedup(errors: Vec<Error>) -> Vec<Error> {
    let mut out: Vec<Error> = Vec::with_capacity(errors.len());
    for err in errors {
        if !out.contains(&err) {
            out.push(err);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{full_facts, kuryr_spec, third_party_spec};

    fn reconciler() -> NetworkReconciler {
        NetworkReconciler::new(ReleaseConfig::default())
    }

    #[test]
    fn phases_display() {
        assert_eq!(ReconcilePhase::Defaulted.to_string(), "Defaulted");
        assert_eq!(ReconcilePhase::Rejected.to_string(), "Rejected");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = Error::semantic("spec.a", "bad");
        let b = Error::semantic("spec.b", "bad");
        assert_eq!(dedup(vec![a.clone(), b.clone(), a.clone()]), vec![a, b]);
    }

    #[test]
    fn namespaces_come_first() {
        let out = reconciler()
            .reconcile(&kuryr_spec(), None, &full_facts())
            .unwrap();
        let first_other = out
            .objects
            .iter()
            .position(|m| !m.is_namespace())
            .unwrap();
        assert!(first_other > 0);
        assert!(out.objects[first_other..].iter().all(|m| !m.is_namespace()));
    }

    #[test]
    fn workloads_carry_provider_hash() {
        let out = reconciler()
            .reconcile(&kuryr_spec(), None, &full_facts())
            .unwrap();
        let workloads: Vec<&Manifest> = out.objects.iter().filter(|m| m.is_workload()).collect();
        assert!(!workloads.is_empty());
        for workload in workloads {
            let hash = workload.annotation(CONFIG_HASH_ANNOTATION).unwrap();
            assert_eq!(workload.pod_template_annotation(CONFIG_HASH_ANNOTATION), Some(hash));
            assert_eq!(hash.len(), 64);
        }
        assert!(out.config_hashes.contains_key("kuryr"));
        assert!(!out.config_hashes.contains_key("kube-proxy"));
    }

    #[test]
    fn hashes_are_stable_across_passes() {
        let first = reconciler()
            .reconcile(&kuryr_spec(), None, &full_facts())
            .unwrap();
        let second = reconciler()
            .reconcile(&first.spec, Some(&first.spec), &full_facts())
            .unwrap();
        assert_eq!(first.config_hashes, second.config_hashes);
        assert_eq!(first.objects, second.objects);
    }

    #[test]
    fn third_party_renders_companions_only() {
        let out = reconciler()
            .reconcile(&third_party_spec(), None, &full_facts())
            .unwrap();
        let providers: Vec<&str> = out.config_hashes.keys().map(String::as_str).collect();
        assert_eq!(providers, vec!["kube-proxy", "multus", "node-identity"]);
    }

    #[test]
    fn type_change_is_unsafe() {
        let previous = reconciler().fill_defaults(&third_party_spec()).unwrap();
        let err = reconciler()
            .reconcile(&kuryr_spec(), Some(&previous), &full_facts())
            .unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|e| e.to_string().contains("spec.defaultNetwork.type")));
    }

    #[test]
    fn type_change_reports_only_the_type() {
        let previous = third_party_spec();
        let mut next = kuryr_spec();
        next.default_network
            .kuryr_config
            .get_or_insert_with(Default::default)
            .pool_batch_ports = Some(8);
        let err = reconciler().check(&next, Some(&previous)).unwrap_err();
        assert_eq!(err.violations().len(), 1, "{err}");
        assert!(err.violations()[0]
            .to_string()
            .contains("spec.defaultNetwork.type"));
    }

    #[test]
    fn service_network_change_is_unsafe() {
        let previous = reconciler().fill_defaults(&third_party_spec()).unwrap();
        let mut next = third_party_spec();
        next.service_network = vec!["172.31.0.0/16".to_string()];
        let err = reconciler().check(&next, Some(&previous)).unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert!(matches!(err.violations()[0], Error::UnsafeChange { .. }));
    }

    #[test]
    fn warnings_surface_in_status() {
        let mut facts = full_facts();
        facts.kuryr = None;
        let out = reconciler().reconcile(&kuryr_spec(), None, &facts).unwrap();
        assert!(!out.warnings.is_empty());
        let status = out.status();
        assert_eq!(status.phase, NetworkPhase::Rendered);
        assert!(status.message.unwrap().contains("warning"));
    }

    #[test]
    fn failure_status_lists_every_violation() {
        let err = Error::rejected(
            "validation",
            vec![Error::semantic("spec.a", "x"), Error::structural("spec.b", "y")],
        );
        let status = failure_status(&err, "4.14.0");
        assert_eq!(status.phase, NetworkPhase::Rejected);
        assert_eq!(status.errors.len(), 2);

        let status = failure_status(&Error::render_contract("kuryr", "boom"), "4.14.0");
        assert_eq!(status.phase, NetworkPhase::Pending);
        assert_eq!(status.errors.len(), 1);
    }

    #[test]
    fn yaml_stream_has_one_document_per_object() {
        let out = reconciler()
            .reconcile(&third_party_spec(), None, &full_facts())
            .unwrap();
        let yaml = out.to_yaml().unwrap();
        assert!(yaml.starts_with("---\n"));
        assert!(yaml.matches("---\n").count() >= out.objects.len());
    }
}
