//! Untyped infrastructure object specifications
//!
//! Providers render [`Manifest`] values: an apiVersion/kind/metadata envelope
//! plus untyped `spec`/`data` and any other top-level fields (`rules`,
//! `subjects`, `webhooks`, ...). The apply collaborator diffs them against
//! live state; nothing here talks to a cluster.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lattice_common::{Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_LATTICE, LABEL_NAME};

/// API version for core objects (Namespace, ConfigMap, Service, ...)
pub const CORE_API_VERSION: &str = "v1";
/// API version for DaemonSet and Deployment
pub const APPS_API_VERSION: &str = "apps/v1";
/// API version for ClusterRole and ClusterRoleBinding
pub const RBAC_API_VERSION: &str = "rbac.authorization.k8s.io/v1";
/// API version for ValidatingWebhookConfiguration
pub const ADMISSION_API_VERSION: &str = "admissionregistration.k8s.io/v1";
/// API version for NetworkAttachmentDefinition
pub const NAD_API_VERSION: &str = "k8s.cni.cncf.io/v1";

/// A rendered object represented as an untyped Kubernetes resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// API version (e.g., "apps/v1")
    pub api_version: String,
    /// Kind of resource (e.g., "DaemonSet")
    pub kind: String,
    /// Resource metadata
    pub metadata: ManifestMetadata,
    /// Resource spec (untyped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    /// Resource data (ConfigMaps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Other top-level fields
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Metadata for a rendered object
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestMetadata {
    /// Name of the resource
    pub name: String,
    /// Namespace (absent for cluster-scoped resources)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    /// Annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// Create a cluster-scoped manifest
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                ..Default::default()
            },
            spec: None,
            data: None,
            fields: BTreeMap::new(),
        }
    }

    /// Place the manifest in a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// Set the spec for this manifest
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set the data for this manifest
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set an arbitrary top-level field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Merge labels into the manifest
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
        self
    }

    /// Set a single annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotate(key, value);
        self
    }

    /// Set a single annotation in place
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }

    /// Look up an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Set an annotation on the pod template (`spec.template.metadata.annotations`)
    ///
    /// Fails for objects without a pod template.
    pub fn annotate_pod_template(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let key = key.into();
        let identity = self.key();
        let template = self
            .spec
            .as_mut()
            .and_then(|s| s.get_mut("template"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                Error::render_contract(identity.clone(), "object has no pod template")
            })?;

        let metadata = template
            .entry("metadata")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| {
                Error::render_contract(identity.clone(), "pod template metadata is not an object")
            })?;

        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| {
                Error::render_contract(identity, "pod template annotations is not an object")
            })?;

        annotations.insert(key, Value::String(value.into()));
        Ok(())
    }

    /// Read a pod template annotation
    pub fn pod_template_annotation(&self, key: &str) -> Option<&str> {
        self.spec
            .as_ref()?
            .pointer("/template/metadata/annotations")?
            .get(key)?
            .as_str()
    }

    /// True for Namespace objects
    pub fn is_namespace(&self) -> bool {
        self.kind == "Namespace"
    }

    /// True for objects that run pods from a template
    pub fn is_workload(&self) -> bool {
        matches!(self.kind.as_str(), "DaemonSet" | "Deployment")
    }

    /// `kind/namespace/name` (or `kind/name` when cluster-scoped)
    pub fn key(&self) -> String {
        match &self.metadata.namespace {
            Some(ns) => format!("{}/{}/{}", self.kind, ns, self.metadata.name),
            None => format!("{}/{}", self.kind, self.metadata.name),
        }
    }

    /// Serialize the manifest to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind(self.kind.clone(), e.to_string()))
    }
}

// ============================================================================
// Shared Helper Functions
// ============================================================================

/// Standard labels for every object rendered for a component
pub fn component_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), component.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_LATTICE.to_string(),
        ),
    ])
}

/// Namespace
pub fn namespace(name: &str, labels: BTreeMap<String, String>) -> Manifest {
    Manifest::new(CORE_API_VERSION, "Namespace", name).with_labels(labels)
}

/// ServiceAccount
pub fn service_account(name: &str, namespace: &str, component: &str) -> Manifest {
    Manifest::new(CORE_API_VERSION, "ServiceAccount", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
}

/// ClusterRole with the given policy rules
pub fn cluster_role(name: &str, component: &str, rules: Value) -> Manifest {
    Manifest::new(RBAC_API_VERSION, "ClusterRole", name)
        .with_labels(component_labels(component))
        .with_field("rules", rules)
}

/// ClusterRoleBinding granting `role` to a service account
pub fn cluster_role_binding(
    name: &str,
    component: &str,
    role: &str,
    service_account: &str,
    namespace: &str,
) -> Manifest {
    Manifest::new(RBAC_API_VERSION, "ClusterRoleBinding", name)
        .with_labels(component_labels(component))
        .with_field(
            "roleRef",
            json!({
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": role,
            }),
        )
        .with_field(
            "subjects",
            json!([{
                "kind": "ServiceAccount",
                "name": service_account,
                "namespace": namespace,
            }]),
        )
}

/// ConfigMap
pub fn config_map(
    name: &str,
    namespace: &str,
    component: &str,
    data: BTreeMap<String, String>,
) -> Manifest {
    Manifest::new(CORE_API_VERSION, "ConfigMap", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
        .with_data(json!(data))
}

/// Opaque Secret populated through `stringData`
pub fn secret(
    name: &str,
    namespace: &str,
    component: &str,
    string_data: BTreeMap<String, String>,
) -> Manifest {
    Manifest::new(CORE_API_VERSION, "Secret", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
        .with_field("type", json!("Opaque"))
        .with_field("stringData", json!(string_data))
}

fn pod_template(component: &str, pod_spec: Value) -> Value {
    json!({
        "metadata": { "labels": { LABEL_NAME: component } },
        "spec": pod_spec,
    })
}

/// DaemonSet running `pod_spec` on every matching node
pub fn daemon_set(name: &str, namespace: &str, component: &str, pod_spec: Value) -> Manifest {
    Manifest::new(APPS_API_VERSION, "DaemonSet", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
        .with_spec(json!({
            "selector": { "matchLabels": { LABEL_NAME: component } },
            "updateStrategy": {
                "type": "RollingUpdate",
                "rollingUpdate": { "maxUnavailable": "10%" },
            },
            "template": pod_template(component, pod_spec),
        }))
}

/// Deployment with a fixed replica count
pub fn deployment(
    name: &str,
    namespace: &str,
    component: &str,
    replicas: u32,
    pod_spec: Value,
) -> Manifest {
    Manifest::new(APPS_API_VERSION, "Deployment", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
        .with_spec(json!({
            "replicas": replicas,
            "selector": { "matchLabels": { LABEL_NAME: component } },
            "template": pod_template(component, pod_spec),
        }))
}

/// ClusterIP Service selecting the component's pods
pub fn service(name: &str, namespace: &str, component: &str, ports: Value) -> Manifest {
    Manifest::new(CORE_API_VERSION, "Service", name)
        .in_namespace(namespace)
        .with_labels(component_labels(component))
        .with_spec(json!({
            "selector": { LABEL_NAME: component },
            "ports": ports,
        }))
}

/// ValidatingWebhookConfiguration
pub fn validating_webhook_configuration(name: &str, component: &str, webhooks: Value) -> Manifest {
    Manifest::new(
        ADMISSION_API_VERSION,
        "ValidatingWebhookConfiguration",
        name,
    )
    .with_labels(component_labels(component))
    .with_field("webhooks", webhooks)
}

/// NetworkAttachmentDefinition carrying a CNI configuration document
pub fn network_attachment_definition(name: &str, namespace: &str, config: &str) -> Manifest {
    Manifest::new(NAD_API_VERSION, "NetworkAttachmentDefinition", name)
        .in_namespace(namespace)
        .with_labels(component_labels("multus"))
        .with_spec(json!({ "config": config }))
}
