//! Multus provider
//!
//! Multus attaches secondary networks to pods. It runs unless
//! `disableMultiNetwork` is set, and renders one NetworkAttachmentDefinition
//! per additional network.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    check_unchanged, container, contract_violation, required, NetworkProvider, RenderedProvider,
};
use crate::facts::BootstrapFacts;
use crate::manifest::{
    cluster_role, cluster_role_binding, component_labels, config_map, daemon_set, deployment,
    namespace, network_attachment_definition, service, service_account,
};
use crate::version::at_most;
use lattice_common::crd::{
    validate_dns_label, AdditionalNetwork, AdditionalNetworkType, IpamConfig, IpamType,
    MacvlanMode, NetworkSpec, SimpleMacvlanConfig, StaticIpamConfig,
};
use lattice_common::{Error, ReleaseConfig, Result};

const PROVIDER: &str = "multus";

/// Namespace the multus daemon runs in
pub const MULTUS_NAMESPACE: &str = "lattice-multus";

/// Namespace additional networks are created in when none is given
pub const DEFAULT_NETWORK_NAMESPACE: &str = "default";

const NETWORKS_FIELD: &str = "spec.additionalNetworks";
const SERVICE_ACCOUNT: &str = "multus";
const DAEMON_CONFIG_MAP: &str = "multus-daemon-config";
const CNI_VERSION: &str = "0.3.1";

/// Last release that still ships the standalone admission controller
const LEGACY_ADMISSION_RELEASE: (u64, u64) = (4, 13);

/// Linux IFNAMSIZ minus the terminator
const MAX_INTERFACE_NAME: usize = 15;

/// Multus and secondary networks provider
#[derive(Clone, Debug)]
pub struct MultusProvider {
    release: Arc<ReleaseConfig>,
}

fn network_namespace(network: &AdditionalNetwork) -> &str {
    network
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NETWORK_NAMESPACE)
}

fn disabled(spec: &NetworkSpec) -> bool {
    spec.disable_multi_network.unwrap_or(false)
}

impl MultusProvider {
    /// Create a multus provider rendering for the given release
    pub fn new(release: Arc<ReleaseConfig>) -> Self {
        Self { release }
    }

    fn legacy_admission_controller(&self) -> bool {
        at_most(
            &self.release.version,
            LEGACY_ADMISSION_RELEASE.0,
            LEGACY_ADMISSION_RELEASE.1,
        )
    }

    fn validate_network(field: &str, network: &AdditionalNetwork, errors: &mut Vec<Error>) {
        if let Err(msg) = validate_dns_label(&network.name, "name") {
            errors.push(Error::semantic(format!("{}.name", field), msg));
        }
        if let Some(ns) = &network.namespace {
            if let Err(msg) = validate_dns_label(ns, "namespace") {
                errors.push(Error::semantic(format!("{}.namespace", field), msg));
            }
        }

        match network.type_ {
            AdditionalNetworkType::Raw => {
                if network.simple_macvlan_config.is_some() {
                    errors.push(Error::structural(
                        format!("{}.simpleMacvlanConfig", field),
                        "only valid for SimpleMacvlan networks",
                    ));
                }
                let raw_field = format!("{}.rawCNIConfig", field);
                match &network.raw_cni_config {
                    Some(raw) => Self::validate_raw(&raw_field, &network.name, raw, errors),
                    None => errors.push(Error::structural(raw_field, "required for Raw networks")),
                }
            }
            AdditionalNetworkType::SimpleMacvlan => {
                if network.raw_cni_config.is_some() {
                    errors.push(Error::structural(
                        format!("{}.rawCNIConfig", field),
                        "only valid for Raw networks",
                    ));
                }
                if let Some(cfg) = &network.simple_macvlan_config {
                    Self::validate_macvlan(&format!("{}.simpleMacvlanConfig", field), cfg, errors);
                }
            }
        }
    }

    fn validate_raw(field: &str, name: &str, raw: &str, errors: &mut Vec<Error>) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                errors.push(Error::semantic(field, format!("not valid JSON: {}", e)));
                return;
            }
        };
        let Some(object) = value.as_object() else {
            errors.push(Error::semantic(field, "must be a JSON object"));
            return;
        };
        match object.get("name").and_then(Value::as_str) {
            Some(n) if n == name => {}
            Some(n) => errors.push(Error::semantic(
                field,
                format!("name {:?} does not match network name {:?}", n, name),
            )),
            None => errors.push(Error::semantic(field, "must contain a \"name\" string")),
        }
    }

    fn validate_macvlan(field: &str, cfg: &SimpleMacvlanConfig, errors: &mut Vec<Error>) {
        if let Some(master) = &cfg.master {
            if master.is_empty()
                || master.len() > MAX_INTERFACE_NAME
                || master.contains('/')
                || master.chars().any(char::is_whitespace)
            {
                errors.push(Error::semantic(
                    format!("{}.master", field),
                    format!("{:?} is not a valid interface name", master),
                ));
            }
        }
        if let Some(mtu) = cfg.mtu {
            if !(68..=65535).contains(&mtu) {
                errors.push(Error::semantic(
                    format!("{}.mtu", field),
                    format!("{} must be between 68 and 65535", mtu),
                ));
            }
        }
        if let Some(ipam) = &cfg.ipam_config {
            Self::validate_ipam(&format!("{}.ipamConfig", field), ipam, errors);
        }
    }

    fn validate_ipam(field: &str, ipam: &IpamConfig, errors: &mut Vec<Error>) {
        let static_field = format!("{}.staticIPAMConfig", field);
        match (ipam.type_, &ipam.static_ipam_config) {
            (IpamType::Static, None) => {
                errors.push(Error::structural(static_field, "required for Static IPAM"));
            }
            (IpamType::Static, Some(cfg)) => Self::validate_static(&static_field, cfg, errors),
            (IpamType::Dhcp, Some(_)) => {
                errors.push(Error::structural(static_field, "only valid for Static IPAM"));
            }
            (IpamType::Dhcp, None) => {}
        }
    }

    fn validate_static(field: &str, cfg: &StaticIpamConfig, errors: &mut Vec<Error>) {
        if cfg.addresses.is_empty() {
            errors.push(Error::structural(
                format!("{}.addresses", field),
                "at least one address is required",
            ));
        }
        for (i, addr) in cfg.addresses.iter().enumerate() {
            let entry = format!("{}.addresses[{}]", field, i);
            if addr.address.parse::<IpNet>().is_err() {
                errors.push(Error::semantic(
                    format!("{}.address", entry),
                    format!("{:?} is not an address/prefix", addr.address),
                ));
            }
            check_gateway(&entry, addr.gateway.as_deref(), errors);
        }
        for (i, route) in cfg.routes.iter().enumerate() {
            let entry = format!("{}.routes[{}]", field, i);
            if route.destination.parse::<IpNet>().is_err() {
                errors.push(Error::semantic(
                    format!("{}.destination", entry),
                    format!("{:?} is not a CIDR", route.destination),
                ));
            }
            check_gateway(&entry, route.gateway.as_deref(), errors);
        }
    }

    /// CNI configuration document for a network
    fn cni_config(network: &AdditionalNetwork) -> Result<String> {
        match network.type_ {
            AdditionalNetworkType::Raw => {
                required(PROVIDER, "rawCNIConfig", &network.raw_cni_config)
            }
            AdditionalNetworkType::SimpleMacvlan => {
                let cfg = network.simple_macvlan_config.as_ref().ok_or_else(|| {
                    contract_violation(
                        PROVIDER,
                        format!("simpleMacvlanConfig for {} is unset", network.name),
                    )
                })?;
                let mode = required(PROVIDER, "simpleMacvlanConfig.mode", &cfg.mode)?;
                let ipam = required(PROVIDER, "simpleMacvlanConfig.ipamConfig", &cfg.ipam_config)?;

                let mut config = json!({
                    "cniVersion": CNI_VERSION,
                    "name": network.name,
                    "type": "macvlan",
                    "mode": mode.as_str(),
                    "ipam": ipam_json(&ipam),
                });
                if let Some(master) = &cfg.master {
                    config["master"] = json!(master);
                }
                if let Some(mtu) = cfg.mtu {
                    config["mtu"] = json!(mtu);
                }
                Ok(config.to_string())
            }
        }
    }

    fn daemon_config() -> String {
        json!({
            "chrootDir": "/hostroot",
            "cniVersion": CNI_VERSION,
            "logLevel": "verbose",
            "logToStderr": true,
            "cniConfigDir": "/host/etc/cni/net.d",
            "multusAutoconfigDir": "/host/run/multus/cni/net.d",
            "multusConfigFile": "auto",
            "socketDir": "/host/run/multus/socket",
        })
        .to_string()
    }

    fn daemon_pod_spec(&self) -> Value {
        let mut daemon = container(
            "kube-multus",
            &self.release.images.multus,
            vec!["/usr/src/multus-cni/bin/multus-daemon".to_string()],
            vec!["--config=/etc/cni/net.d/multus.d/daemon-config.json".to_string()],
        );
        daemon["securityContext"] = json!({ "privileged": true });
        daemon["volumeMounts"] = json!([
            { "name": "daemon-config", "mountPath": "/etc/cni/net.d/multus.d", "readOnly": true },
            { "name": "hostroot", "mountPath": "/hostroot", "mountPropagation": "HostToContainer" },
            { "name": "cni", "mountPath": "/host/etc/cni/net.d" },
            { "name": "host-run", "mountPath": "/host/run" },
        ]);

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "hostNetwork": true,
            "hostPID": true,
            "priorityClassName": "system-node-critical",
            "tolerations": [{ "operator": "Exists" }],
            "containers": [daemon],
            "volumes": [
                { "name": "daemon-config", "configMap": { "name": DAEMON_CONFIG_MAP } },
                { "name": "hostroot", "hostPath": { "path": "/" } },
                { "name": "cni", "hostPath": { "path": "/etc/cni/net.d" } },
                { "name": "host-run", "hostPath": { "path": "/run" } },
            ],
        })
    }

    fn admission_pod_spec(&self) -> Value {
        let mut webhook = container(
            "multus-admission-controller",
            &self.release.images.multus_admission_controller,
            vec!["/usr/bin/webhook".to_string()],
            vec![
                "-bind-address=0.0.0.0".to_string(),
                "-port=6443".to_string(),
                "-tls-private-key-file=/etc/webhook/tls.key".to_string(),
                "-tls-cert-file=/etc/webhook/tls.crt".to_string(),
            ],
        );
        webhook["ports"] = json!([{ "name": "webhook", "containerPort": 6443 }]);
        webhook["volumeMounts"] =
            json!([{ "name": "webhook-certs", "mountPath": "/etc/webhook", "readOnly": true }]);

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "nodeSelector": { "node-role.kubernetes.io/control-plane": "" },
            "tolerations": [{ "operator": "Exists" }],
            "containers": [webhook],
            "volumes": [
                { "name": "webhook-certs", "secret": { "secretName": "multus-admission-controller-secret" } },
            ],
        })
    }
}

fn check_gateway(entry: &str, gateway: Option<&str>, errors: &mut Vec<Error>) {
    if let Some(gw) = gateway {
        if gw.parse::<IpAddr>().is_err() {
            errors.push(Error::semantic(
                format!("{}.gateway", entry),
                format!("{:?} is not an IP address", gw),
            ));
        }
    }
}

fn ipam_json(ipam: &IpamConfig) -> Value {
    match (ipam.type_, &ipam.static_ipam_config) {
        (IpamType::Static, Some(cfg)) => {
            let addresses: Vec<Value> = cfg
                .addresses
                .iter()
                .map(|a| {
                    let mut entry = Map::new();
                    entry.insert("address".to_string(), json!(a.address));
                    if let Some(gw) = &a.gateway {
                        entry.insert("gateway".to_string(), json!(gw));
                    }
                    Value::Object(entry)
                })
                .collect();
            let routes: Vec<Value> = cfg
                .routes
                .iter()
                .map(|r| {
                    let mut entry = Map::new();
                    entry.insert("dst".to_string(), json!(r.destination));
                    if let Some(gw) = &r.gateway {
                        entry.insert("gw".to_string(), json!(gw));
                    }
                    Value::Object(entry)
                })
                .collect();
            json!({ "type": "static", "addresses": addresses, "routes": routes })
        }
        (IpamType::Static, None) => json!({ "type": "static" }),
        (IpamType::Dhcp, _) => json!({ "type": "dhcp" }),
    }
}

impl NetworkProvider for MultusProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    /// Active when enabled, and also whenever additional networks are
    /// requested so a disabled-but-requested combination is validated
    fn is_active(&self, spec: &NetworkSpec) -> bool {
        !disabled(spec) || !spec.additional_networks.is_empty()
    }

    fn fill_defaults(&self, spec: &NetworkSpec) -> NetworkSpec {
        let mut next = spec.clone();
        next.disable_multi_network.get_or_insert(false);

        for network in &mut next.additional_networks {
            network
                .namespace
                .get_or_insert_with(|| DEFAULT_NETWORK_NAMESPACE.to_string());
            if network.type_ == AdditionalNetworkType::SimpleMacvlan {
                let cfg = network
                    .simple_macvlan_config
                    .get_or_insert_with(SimpleMacvlanConfig::default);
                cfg.mode.get_or_insert(MacvlanMode::Bridge);
                cfg.ipam_config.get_or_insert(IpamConfig {
                    type_: IpamType::Dhcp,
                    static_ipam_config: None,
                });
            }
        }
        next
    }

    fn validate(&self, spec: &NetworkSpec) -> Vec<Error> {
        let mut errors = Vec::new();

        if disabled(spec) && !spec.additional_networks.is_empty() {
            errors.push(Error::structural(
                NETWORKS_FIELD,
                "additional networks require multus, but disableMultiNetwork is true",
            ));
        }

        let mut seen = BTreeSet::new();
        for (i, network) in spec.additional_networks.iter().enumerate() {
            let field = format!("{}[{}]", NETWORKS_FIELD, i);
            Self::validate_network(&field, network, &mut errors);

            let key = (network_namespace(network), network.name.as_str());
            if !seen.insert(key) {
                errors.push(Error::semantic(
                    format!("{}.name", field),
                    format!("duplicate network {}/{}", key.0, key.1),
                ));
            }
        }
        errors
    }

    fn is_change_safe(&self, previous: &NetworkSpec, next: &NetworkSpec) -> Vec<Error> {
        if previous == next {
            return Vec::new();
        }

        let mut errors = Vec::new();
        check_unchanged(
            &mut errors,
            "spec.disableMultiNetwork",
            &previous.disable_multi_network,
            &next.disable_multi_network,
        );

        let before: BTreeMap<(&str, &str), AdditionalNetworkType> = previous
            .additional_networks
            .iter()
            .map(|n| ((network_namespace(n), n.name.as_str()), n.type_))
            .collect();
        for (i, network) in next.additional_networks.iter().enumerate() {
            let key = (network_namespace(network), network.name.as_str());
            if let Some(old) = before.get(&key).filter(|old| **old != network.type_) {
                errors.push(Error::unsafe_change(
                    format!("{}[{}].type", NETWORKS_FIELD, i),
                    format!(
                        "network {}/{} was {}, now {}; remove and re-add it instead",
                        key.0, key.1, old, network.type_
                    ),
                ));
            }
        }
        errors
    }

    fn render(&self, spec: &NetworkSpec, _facts: &BootstrapFacts) -> Result<RenderedProvider> {
        if disabled(spec) {
            return Err(contract_violation(
                PROVIDER,
                "render called with disableMultiNetwork set",
            ));
        }

        let mut out = RenderedProvider::default();
        let daemon_config = Self::daemon_config();

        out.objects
            .push(namespace(MULTUS_NAMESPACE, component_labels(PROVIDER)));
        out.objects
            .push(service_account(SERVICE_ACCOUNT, MULTUS_NAMESPACE, PROVIDER));
        out.objects.push(cluster_role(
            "lattice-multus",
            PROVIDER,
            json!([
                {
                    "apiGroups": ["k8s.cni.cncf.io"],
                    "resources": ["*"],
                    "verbs": ["*"],
                },
                {
                    "apiGroups": [""],
                    "resources": ["pods", "pods/status"],
                    "verbs": ["get", "list", "watch", "update"],
                },
                {
                    "apiGroups": ["", "events.k8s.io"],
                    "resources": ["events"],
                    "verbs": ["create", "patch", "update"],
                },
            ]),
        ));
        out.objects.push(cluster_role_binding(
            "lattice-multus",
            PROVIDER,
            "lattice-multus",
            SERVICE_ACCOUNT,
            MULTUS_NAMESPACE,
        ));
        out.objects.push(config_map(
            DAEMON_CONFIG_MAP,
            MULTUS_NAMESPACE,
            PROVIDER,
            BTreeMap::from([("daemon-config.json".to_string(), daemon_config.clone())]),
        ));
        out.objects.push(daemon_set(
            "multus",
            MULTUS_NAMESPACE,
            PROVIDER,
            self.daemon_pod_spec(),
        ));

        let legacy = self.legacy_admission_controller();
        if legacy {
            debug!(release = %self.release.version, "rendering legacy multus admission controller");
            out.objects.push(deployment(
                "multus-admission-controller",
                MULTUS_NAMESPACE,
                PROVIDER,
                2,
                self.admission_pod_spec(),
            ));
            out.objects.push(service(
                "multus-admission-controller",
                MULTUS_NAMESPACE,
                PROVIDER,
                json!([{ "name": "webhook", "port": 443, "targetPort": 6443 }]),
            ));
        }

        let mut networks = Map::new();
        for network in &spec.additional_networks {
            let config = Self::cni_config(network)?;
            let ns = network_namespace(network);
            out.objects
                .push(network_attachment_definition(&network.name, ns, &config));
            networks.insert(format!("{}/{}", ns, network.name), json!(config));
        }

        out.insert_data("daemonConfig", daemon_config);
        out.insert_data("image", self.release.images.multus.clone());
        out.insert_data("legacyAdmissionController", legacy);
        out.insert_data("networks", Value::Object(networks));
        Ok(out)
    }
}
