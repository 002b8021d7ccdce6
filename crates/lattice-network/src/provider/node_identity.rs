//! Network node identity provider
//!
//! Runs an admission webhook on every control-plane node that restricts
//! nodes to updating their own network-related objects. Available from
//! release 4.14 on.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::{container, mark_create_wait, required, NetworkProvider, RenderedProvider};
use crate::facts::BootstrapFacts;
use crate::manifest::{
    cluster_role, cluster_role_binding, component_labels, daemon_set, namespace, service,
    service_account, validating_webhook_configuration,
};
use crate::version::at_least;
use lattice_common::crd::{NetworkSpec, NodeIdentityConfig};
use lattice_common::{Error, ReleaseConfig, Result};

const PROVIDER: &str = "node-identity";

/// Namespace the node identity webhook runs in
pub const NODE_IDENTITY_NAMESPACE: &str = "lattice-network-node-identity";

/// Default port the webhook listens on
pub const DEFAULT_WEBHOOK_PORT: u32 = 9743;

const CONFIG_FIELD: &str = "spec.nodeIdentity";
const SERVICE_ACCOUNT: &str = "network-node-identity";
const WEBHOOK_NAME: &str = "network-node-identity.lattice.dev";
const MIN_RELEASE: (u64, u64) = (4, 14);

/// Network node identity webhook provider
#[derive(Clone, Debug)]
pub struct NodeIdentityProvider {
    release: Arc<ReleaseConfig>,
}

fn enabled(spec: &NetworkSpec) -> bool {
    spec.node_identity
        .as_ref()
        .and_then(|cfg| cfg.enabled)
        .unwrap_or(true)
}

impl NodeIdentityProvider {
    /// Create a node identity provider rendering for the given release
    pub fn new(release: Arc<ReleaseConfig>) -> Self {
        Self { release }
    }

    fn pod_spec(&self, port: u32) -> Value {
        let mut webhook = container(
            "webhook",
            &self.release.images.network_node_identity,
            vec!["/usr/bin/network-node-identity".to_string()],
            vec![
                format!("--webhook-port={}", port),
                "--webhook-cert-dir=/etc/webhook-cert".to_string(),
                "--webhook-host=127.0.0.1".to_string(),
                "--loglevel=2".to_string(),
            ],
        );
        webhook["ports"] = json!([{ "name": "webhook", "containerPort": port }]);
        webhook["volumeMounts"] =
            json!([{ "name": "webhook-cert", "mountPath": "/etc/webhook-cert", "readOnly": true }]);

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "hostNetwork": true,
            "priorityClassName": "system-cluster-critical",
            "nodeSelector": { "node-role.kubernetes.io/control-plane": "" },
            "tolerations": [{ "operator": "Exists" }],
            "containers": [webhook],
            "volumes": [
                { "name": "webhook-cert", "secret": { "secretName": "network-node-identity-cert" } },
            ],
        })
    }

    fn webhooks(ca_bundle: &str) -> Value {
        json!([{
            "name": WEBHOOK_NAME,
            "admissionReviewVersions": ["v1"],
            "sideEffects": "None",
            "failurePolicy": "Fail",
            "matchPolicy": "Equivalent",
            "clientConfig": {
                "service": {
                    "name": SERVICE_ACCOUNT,
                    "namespace": NODE_IDENTITY_NAMESPACE,
                    "port": 443,
                },
                "caBundle": ca_bundle,
            },
            "rules": [{
                "operations": ["UPDATE"],
                "apiGroups": [""],
                "apiVersions": ["v1"],
                "resources": ["nodes/status"],
                "scope": "*",
            }],
        }])
    }
}

impl NetworkProvider for NodeIdentityProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn is_active(&self, spec: &NetworkSpec) -> bool {
        enabled(spec) && at_least(&self.release.version, MIN_RELEASE.0, MIN_RELEASE.1)
    }

    fn fill_defaults(&self, spec: &NetworkSpec) -> NetworkSpec {
        let mut next = spec.clone();
        let cfg = next
            .node_identity
            .get_or_insert_with(NodeIdentityConfig::default);
        cfg.enabled.get_or_insert(true);
        cfg.webhook_port.get_or_insert(DEFAULT_WEBHOOK_PORT);
        next
    }

    fn validate(&self, spec: &NetworkSpec) -> Vec<Error> {
        let mut errors = Vec::new();
        if let Some(port) = spec.node_identity.as_ref().and_then(|c| c.webhook_port) {
            if !(1024..=65535).contains(&port) {
                errors.push(Error::semantic(
                    format!("{}.webhookPort", CONFIG_FIELD),
                    format!("{} must be between 1024 and 65535", port),
                ));
            }
        }
        errors
    }

    fn is_change_safe(&self, _previous: &NetworkSpec, _next: &NetworkSpec) -> Vec<Error> {
        Vec::new()
    }

    fn render(&self, spec: &NetworkSpec, facts: &BootstrapFacts) -> Result<RenderedProvider> {
        let cfg = spec.node_identity.clone().unwrap_or_default();
        let port = required(PROVIDER, "webhookPort", &cfg.webhook_port)?;

        let mut out = RenderedProvider::default();
        out.objects.push(namespace(
            NODE_IDENTITY_NAMESPACE,
            component_labels(PROVIDER),
        ));
        out.objects.push(service_account(
            SERVICE_ACCOUNT,
            NODE_IDENTITY_NAMESPACE,
            PROVIDER,
        ));
        out.objects.push(cluster_role(
            "lattice-network-node-identity",
            PROVIDER,
            json!([
                {
                    "apiGroups": [""],
                    "resources": ["nodes"],
                    "verbs": ["get", "list", "watch"],
                },
                {
                    "apiGroups": ["certificates.k8s.io"],
                    "resources": ["certificatesigningrequests"],
                    "verbs": ["get", "list", "watch"],
                },
            ]),
        ));
        out.objects.push(cluster_role_binding(
            "lattice-network-node-identity",
            PROVIDER,
            "lattice-network-node-identity",
            SERVICE_ACCOUNT,
            NODE_IDENTITY_NAMESPACE,
        ));
        out.objects.push(daemon_set(
            "network-node-identity",
            NODE_IDENTITY_NAMESPACE,
            PROVIDER,
            self.pod_spec(port),
        ));
        out.objects.push(service(
            SERVICE_ACCOUNT,
            NODE_IDENTITY_NAMESPACE,
            PROVIDER,
            json!([{ "name": "webhook", "port": 443, "targetPort": port }]),
        ));

        match &facts.node_identity.ca_bundle {
            Some(ca) => {
                let mut webhook = validating_webhook_configuration(
                    "network-node-identity",
                    PROVIDER,
                    Self::webhooks(ca),
                );
                if !facts.node_identity.webhook_ready {
                    info!("node identity webhook not ready, deferring its configuration");
                    mark_create_wait(&mut webhook);
                }
                out.objects.push(webhook);
            }
            None => {
                warn!("no CA bundle for the node identity webhook, withholding its configuration");
                out.warnings.push(Error::discovery_unavailable(
                    PROVIDER,
                    "webhook CA bundle not yet issued; ValidatingWebhookConfiguration withheld",
                ));
            }
        }

        out.insert_data("webhookPort", port);
        out.insert_data("image", self.release.images.network_node_identity.clone());
        out.insert_data(
            "caBundle",
            facts.node_identity.ca_bundle.clone().map_or(Value::Null, Value::from),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{full_facts, kuryr_spec};
    use rstest::rstest;

    fn provider_for(version: &str) -> NodeIdentityProvider {
        NodeIdentityProvider::new(Arc::new(ReleaseConfig {
            version: version.to_string(),
            ..Default::default()
        }))
    }

    fn provider() -> NodeIdentityProvider {
        NodeIdentityProvider::new(Arc::new(ReleaseConfig::default()))
    }

    fn defaulted() -> NetworkSpec {
        provider().fill_defaults(&kuryr_spec())
    }

    #[test]
    fn defaults_enable_on_standard_port() {
        let cfg = defaulted().node_identity.unwrap();
        assert_eq!(cfg.enabled, Some(true));
        assert_eq!(cfg.webhook_port, Some(DEFAULT_WEBHOOK_PORT));
    }

    #[test]
    fn defaults_keep_explicit_values() {
        let mut spec = kuryr_spec();
        spec.node_identity = Some(NodeIdentityConfig {
            enabled: Some(false),
            webhook_port: Some(10443),
        });
        let cfg = provider().fill_defaults(&spec).node_identity.unwrap();
        assert_eq!(cfg.enabled, Some(false));
        assert_eq!(cfg.webhook_port, Some(10443));
    }

    #[rstest]
    #[case::released("4.14.0", true)]
    #[case::nightly("4.14.0-0.nightly-2023-09-01-000000", true)]
    #[case::newer("4.15.2", true)]
    #[case::older("4.13.9", false)]
    #[case::unparseable("latest", false)]
    fn active_from_release(#[case] version: &str, #[case] active: bool) {
        assert_eq!(provider_for(version).is_active(&defaulted()), active);
    }

    #[test]
    fn disabled_is_inactive() {
        let mut spec = defaulted();
        if let Some(cfg) = spec.node_identity.as_mut() {
            cfg.enabled = Some(false);
        }
        assert!(!provider().is_active(&spec));
    }

    #[rstest]
    #[case::privileged(80, 1)]
    #[case::lowest(1024, 0)]
    #[case::default(9743, 0)]
    #[case::highest(65535, 0)]
    #[case::too_high(70000, 1)]
    fn webhook_port_range(#[case] port: u32, #[case] expected: usize) {
        let mut spec = defaulted();
        if let Some(cfg) = spec.node_identity.as_mut() {
            cfg.webhook_port = Some(port);
        }
        assert_eq!(provider().validate(&spec).len(), expected);
    }

    #[test]
    fn renders_webhook_configuration_when_ready() {
        let out = provider().render(&defaulted(), &full_facts()).unwrap();
        let webhook = out
            .objects
            .iter()
            .find(|m| m.kind == "ValidatingWebhookConfiguration")
            .expect("webhook configuration rendered");
        assert!(webhook
            .annotation(lattice_common::CREATE_WAIT_ANNOTATION)
            .is_none());
        assert!(out.warnings.is_empty());
        assert_eq!(out.data["webhookPort"], 9743);
    }

    #[test]
    fn webhook_not_ready_is_create_wait() {
        let mut facts = full_facts();
        facts.node_identity.webhook_ready = false;
        let out = provider().render(&defaulted(), &facts).unwrap();
        let webhook = out
            .objects
            .iter()
            .find(|m| m.kind == "ValidatingWebhookConfiguration")
            .unwrap();
        assert_eq!(
            webhook.annotation(lattice_common::CREATE_WAIT_ANNOTATION),
            Some("true")
        );
    }

    #[test]
    fn missing_ca_withholds_webhook_configuration() {
        let mut facts = full_facts();
        facts.node_identity.ca_bundle = None;
        let out = provider().render(&defaulted(), &facts).unwrap();
        assert!(out
            .objects
            .iter()
            .all(|m| m.kind != "ValidatingWebhookConfiguration"));
        assert!(out.objects.iter().any(|m| m.kind == "DaemonSet"));
        assert_eq!(out.warnings.len(), 1);
        assert!(matches!(out.warnings[0], Error::DiscoveryUnavailable { .. }));
    }
}
