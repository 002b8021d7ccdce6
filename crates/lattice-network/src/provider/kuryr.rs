//! Kuryr network provider
//!
//! Kuryr backs pod networking with Neutron ports and services with Octavia
//! load balancers. Because the OpenStack side is provisioned once at
//! bootstrap, most of its configuration is immutable afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    check_unchanged, container, contract_violation, mark_create_only, required, NetworkProvider,
    RenderedProvider,
};
use crate::checks::{
    cluster_networks, require_exactly_one, service_networks, CLUSTER_NETWORK_FIELD,
    SERVICE_NETWORK_FIELD,
};
use crate::facts::{ApiServerEndpoint, BootstrapFacts, KuryrFacts};
use crate::manifest::{
    cluster_role, cluster_role_binding, component_labels, config_map, daemon_set, deployment,
    namespace, secret, service_account, Manifest,
};
use crate::subnet::{expand, parse_cidr, validate_service_subnet_sizing};
use crate::version::{at_least, RolloutOrder};
use lattice_common::crd::{KuryrConfig, NetworkSpec, NetworkType};
use lattice_common::{Error, ReleaseConfig, Result};

const PROVIDER: &str = "kuryr";

/// Namespace Kuryr components run in
pub const KURYR_NAMESPACE: &str = "lattice-kuryr";

const CONFIG_FIELD: &str = "spec.defaultNetwork.kuryrConfig";
const SERVICE_ACCOUNT: &str = "kuryr";
const CONFIG_MAP: &str = "kuryr-config";
const CREDENTIALS_SECRET: &str = "kuryr-credentials";
const CA_CONFIG_MAP: &str = "kuryr-openstack-ca";

/// Default minimum number of ports kept in each pool
pub const DEFAULT_POOL_MIN_PORTS: u32 = 1;
/// Default number of ports created per pool refill
pub const DEFAULT_POOL_BATCH_PORTS: u32 = 3;
/// Default pool ceiling; zero disables the ceiling
pub const DEFAULT_POOL_MAX_PORTS: u32 = 0;
/// Default CNI daemon health port
pub const DEFAULT_DAEMON_PROBES_PORT: u32 = 8090;
/// Default controller health port
pub const DEFAULT_CONTROLLER_PROBES_PORT: u32 = 8082;
/// Smallest MTU that still carries IPv6
pub const MIN_MTU: u32 = 1280;

/// First Octavia API version with listener allowed-CIDR ACLs
const OCTAVIA_ACL_VERSION: (u64, u64) = (2, 13);

/// Kuryr (OpenStack-integrated SDN) provider
#[derive(Clone, Debug)]
pub struct KuryrProvider {
    release: Arc<ReleaseConfig>,
}

impl KuryrProvider {
    /// Create a Kuryr provider rendering for the given release
    pub fn new(release: Arc<ReleaseConfig>) -> Self {
        Self { release }
    }

    fn field(name: &str) -> String {
        format!("{}.{}", CONFIG_FIELD, name)
    }

    fn validate_pools(cfg: &KuryrConfig, errors: &mut Vec<Error>) {
        if let Some(batch) = cfg.pool_batch_ports {
            if batch == 0 {
                errors.push(Error::semantic(
                    Self::field("poolBatchPorts"),
                    "must be at least 1",
                ));
            }
        }

        if let (Some(min), Some(batch)) = (cfg.pool_min_ports, cfg.pool_batch_ports) {
            if min > batch {
                errors.push(Error::semantic(
                    Self::field("poolMinPorts"),
                    format!("{} must not exceed poolBatchPorts ({})", min, batch),
                ));
            }
        }

        // poolMaxPorts = 0 means the pools are unbounded
        if let Some(max) = cfg.pool_max_ports.filter(|max| *max > 0) {
            for (name, value) in [
                ("poolMinPorts", cfg.pool_min_ports),
                ("poolBatchPorts", cfg.pool_batch_ports),
            ] {
                if let Some(value) = value.filter(|v| *v > max) {
                    errors.push(Error::semantic(
                        Self::field(name),
                        format!("{} must not exceed poolMaxPorts ({})", value, max),
                    ));
                }
            }
        }
    }

    fn validate_ports(cfg: &KuryrConfig, errors: &mut Vec<Error>) {
        let ports = [
            ("daemonProbesPort", cfg.daemon_probes_port),
            ("controllerProbesPort", cfg.controller_probes_port),
        ];
        for (name, port) in ports {
            if let Some(port) = port.filter(|p| !(1..=65535).contains(p)) {
                errors.push(Error::semantic(
                    Self::field(name),
                    format!("{} is not a valid port (1-65535)", port),
                ));
            }
        }

        if let (Some(daemon), Some(controller)) = (cfg.daemon_probes_port, cfg.controller_probes_port)
        {
            if daemon == controller {
                errors.push(Error::semantic(
                    Self::field("controllerProbesPort"),
                    format!("{} is already used by daemonProbesPort", controller),
                ));
            }
        }

        if let Some(mtu) = cfg.mtu {
            if !(MIN_MTU..=65535).contains(&mtu) {
                errors.push(Error::semantic(
                    Self::field("mtu"),
                    format!("{} must be between {} and 65535", mtu, MIN_MTU),
                ));
            }
        }
    }

    /// `kuryr.conf` contents
    fn kuryr_conf(
        &self,
        settings: &Settings,
        os: &KuryrFacts,
        api: &ApiServerEndpoint,
        octavia_acls: bool,
    ) -> String {
        let mut conf = Conf::default();

        conf.section("DEFAULT")
            .set("debug", "false")
            .set("use_stderr", "true");

        conf.section("kubernetes")
            .set("api_root", api.url())
            .set(
                "ssl_ca_crt_file",
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            )
            .set(
                "token_file",
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            )
            .set(
                "enabled_handlers",
                "vif,kuryrport,service,endpoints,kuryrloadbalancer,kuryrnetwork,namespace,policy",
            )
            .set("pod_subnets_driver", "namespace")
            .set("pod_security_groups_driver", "policy")
            .set("service_security_groups_driver", "policy")
            .set("controller_ha", "true")
            .set("controller_ha_elector_port", "16401");

        conf.section("cni_daemon")
            .set("daemon_enabled", "true")
            .set("docker_mode", "true")
            .set("netns_proc_dir", "/host/proc");

        conf.section("cni_health_server")
            .set("port", settings.daemon_probes_port.to_string());

        conf.section("health_server")
            .set("port", settings.controller_probes_port.to_string());

        let mut neutron = conf.section("neutron");
        neutron
            .set("auth_type", "password")
            .set("auth_url", &os.auth_url)
            .set("project_id", &os.project_id)
            .set("username", &os.credentials.username)
            .set("password", &os.credentials.password)
            .set(
                "user_domain_name",
                os.credentials
                    .user_domain_name
                    .as_deref()
                    .unwrap_or("Default"),
            );
        if let Some(region) = &os.region_name {
            neutron.set("region_name", region);
        }
        if os.ca_bundle.is_some() {
            neutron.set("cafile", "/etc/ssl/certs/openstack/ca-bundle.pem");
        }

        let mut defaults = conf.section("neutron_defaults");
        defaults
            .set("project", &os.project_id)
            .set("service_subnet", &os.service_subnet_id)
            .set("pod_security_groups", os.pod_security_group_ids.join(","))
            .set("resource_tags", "lattice-managed");
        if let Some(external) = &os.external_network_id {
            defaults.set("external_svc_net", external);
        }
        if let Some(mtu) = settings.mtu {
            defaults.set("network_device_mtu", mtu.to_string());
        }

        if !os.worker_nodes_subnet_ids.is_empty() {
            conf.section("pod_vif_nested")
                .set("worker_nodes_subnets", os.worker_nodes_subnet_ids.join(","));
        }

        conf.section("namespace_subnet")
            .set("pod_router", &os.router_id)
            .set("pod_subnet_pool", &os.pod_subnetpool_id);

        let ovn = os.octavia_provider.as_deref() == Some("ovn");
        let mut octavia = conf.section("octavia_defaults");
        octavia
            .set("member_mode", "L3")
            .set("enforce_sg_rules", (!octavia_acls).to_string())
            .set(
                "lb_algorithm",
                if ovn { "SOURCE_IP_PORT" } else { "ROUND_ROBIN" },
            );
        if let Some(provider) = &os.octavia_provider {
            octavia.set("provider", provider);
        }

        conf.section("vif_pool")
            .set("ports_pool_min", settings.pool_min.to_string())
            .set("ports_pool_max", settings.pool_max.to_string())
            .set("ports_pool_batch", settings.pool_batch.to_string())
            .set("ports_pool_update_frequency", "30")
            .set(
                "ports_pool_prepopulation",
                settings.prepopulation.to_string(),
            );

        conf.render()
    }

    fn clouds_yaml(os: &KuryrFacts) -> Result<String> {
        let mut cloud = json!({
            "auth": {
                "auth_url": os.auth_url,
                "project_id": os.project_id,
                "username": os.credentials.username,
                "password": os.credentials.password,
                "user_domain_name": os.credentials.user_domain_name.as_deref().unwrap_or("Default"),
            },
        });
        if let Some(region) = &os.region_name {
            cloud["region_name"] = json!(region);
        }
        serde_yaml::to_string(&json!({ "clouds": { "openstack": cloud } }))
            .map_err(|e| Error::serialization_for_kind("Secret", e.to_string()))
    }

    fn controller_pod_spec(&self, settings: &Settings, has_ca: bool) -> Value {
        let mut controller = container(
            "kuryr-controller",
            &self.release.images.kuryr_controller,
            vec!["kuryr-k8s-controller".to_string()],
            vec!["--config-file=/etc/kuryr/kuryr.conf".to_string()],
        );
        controller["readinessProbe"] = http_probe("/ready", settings.controller_probes_port);
        controller["livenessProbe"] = http_probe("/alive", settings.controller_probes_port);
        controller["volumeMounts"] = volume_mounts(has_ca);

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "hostNetwork": true,
            "priorityClassName": "system-cluster-critical",
            "nodeSelector": { "node-role.kubernetes.io/control-plane": "" },
            "tolerations": [{ "operator": "Exists" }],
            "containers": [controller],
            "volumes": volumes(has_ca, false),
        })
    }

    fn daemon_pod_spec(&self, settings: &Settings, has_ca: bool) -> Value {
        let mut daemon = container(
            "kuryr-cni",
            &self.release.images.kuryr_daemon,
            vec!["kuryr-daemon".to_string()],
            vec!["--config-file=/etc/kuryr/kuryr.conf".to_string()],
        );
        daemon["securityContext"] = json!({ "privileged": true });
        daemon["readinessProbe"] = http_probe("/ready", settings.daemon_probes_port);
        daemon["livenessProbe"] = http_probe("/alive", settings.daemon_probes_port);
        let mut mounts = volume_mounts(has_ca);
        if let Some(list) = mounts.as_array_mut() {
            list.extend([
                json!({ "name": "bin", "mountPath": "/opt/cni/bin" }),
                json!({ "name": "net-conf", "mountPath": "/etc/cni/net.d" }),
                json!({ "name": "proc", "mountPath": "/host/proc" }),
            ]);
        }
        daemon["volumeMounts"] = mounts;

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "hostNetwork": true,
            "priorityClassName": "system-node-critical",
            "tolerations": [{ "operator": "Exists" }],
            "containers": [daemon],
            "volumes": volumes(has_ca, true),
        })
    }

    fn rbac(&self) -> Vec<Manifest> {
        vec![
            service_account(SERVICE_ACCOUNT, KURYR_NAMESPACE, PROVIDER),
            cluster_role(
                "lattice-kuryr",
                PROVIDER,
                json!([
                    {
                        "apiGroups": [""],
                        "resources": ["pods", "services", "endpoints", "namespaces", "nodes"],
                        "verbs": ["get", "list", "watch", "patch", "update"],
                    },
                    {
                        "apiGroups": ["openstack.org"],
                        "resources": ["kuryrnetworks", "kuryrports", "kuryrloadbalancers", "kuryrnetworkpolicies"],
                        "verbs": ["*"],
                    },
                    {
                        "apiGroups": ["networking.k8s.io"],
                        "resources": ["networkpolicies"],
                        "verbs": ["get", "list", "watch", "update", "patch"],
                    },
                    {
                        "apiGroups": ["coordination.k8s.io"],
                        "resources": ["leases"],
                        "verbs": ["get", "create", "update"],
                    },
                ]),
            ),
            cluster_role_binding(
                "lattice-kuryr",
                PROVIDER,
                "lattice-kuryr",
                SERVICE_ACCOUNT,
                KURYR_NAMESPACE,
            ),
        ]
    }
}

/// Fully-defaulted values render reads
struct Settings {
    service_override: String,
    pool_min: u32,
    pool_max: u32,
    pool_batch: u32,
    prepopulation: bool,
    daemon_probes_port: u32,
    controller_probes_port: u32,
    mtu: Option<u32>,
}

impl Settings {
    fn from_spec(spec: &NetworkSpec) -> Result<Self> {
        let cfg = spec
            .kuryr()
            .ok_or_else(|| contract_violation(PROVIDER, "kuryrConfig is missing"))?;

        let service_override = required(
            PROVIDER,
            "openStackServiceNetwork",
            &cfg.openstack_service_network,
        )?;
        parse_cidr(&service_override).map_err(|e| contract_violation(PROVIDER, e.to_string()))?;

        Ok(Self {
            service_override,
            pool_min: required(PROVIDER, "poolMinPorts", &cfg.pool_min_ports)?,
            pool_max: required(PROVIDER, "poolMaxPorts", &cfg.pool_max_ports)?,
            pool_batch: required(PROVIDER, "poolBatchPorts", &cfg.pool_batch_ports)?,
            prepopulation: required(
                PROVIDER,
                "enablePortPoolsPrepopulation",
                &cfg.enable_port_pools_prepopulation,
            )?,
            daemon_probes_port: required(PROVIDER, "daemonProbesPort", &cfg.daemon_probes_port)?,
            controller_probes_port: required(
                PROVIDER,
                "controllerProbesPort",
                &cfg.controller_probes_port,
            )?,
            mtu: cfg.mtu,
        })
    }
}

impl NetworkProvider for KuryrProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn is_active(&self, spec: &NetworkSpec) -> bool {
        matches!(spec.network_type(), Ok(NetworkType::Kuryr))
    }

    fn fill_defaults(&self, spec: &NetworkSpec) -> NetworkSpec {
        let mut next = spec.clone();
        let cfg = next
            .default_network
            .kuryr_config
            .get_or_insert_with(KuryrConfig::default);

        // The override depends on the service network, so it is computed first
        if cfg.openstack_service_network.is_none() {
            let expanded = spec
                .service_network
                .first()
                .and_then(|s| parse_cidr(s).ok())
                .and_then(|net| expand(&net).ok());
            match expanded {
                Some(net) => {
                    debug!(service_override = %net, "defaulting openStackServiceNetwork");
                    cfg.openstack_service_network = Some(net.to_string());
                }
                None => debug!("service network missing or invalid, leaving openStackServiceNetwork unset"),
            }
        }

        cfg.pool_min_ports.get_or_insert(DEFAULT_POOL_MIN_PORTS);
        cfg.pool_batch_ports.get_or_insert(DEFAULT_POOL_BATCH_PORTS);
        cfg.pool_max_ports.get_or_insert(DEFAULT_POOL_MAX_PORTS);
        cfg.enable_port_pools_prepopulation.get_or_insert(false);
        cfg.daemon_probes_port
            .get_or_insert(DEFAULT_DAEMON_PROBES_PORT);
        cfg.controller_probes_port
            .get_or_insert(DEFAULT_CONTROLLER_PROBES_PORT);

        next
    }

    fn validate(&self, spec: &NetworkSpec) -> Vec<Error> {
        let mut errors = Vec::new();

        let service_arity = require_exactly_one(SERVICE_NETWORK_FIELD, spec.service_network.len());
        let single_service = service_arity.is_none();
        errors.extend(service_arity);
        errors.extend(require_exactly_one(
            CLUSTER_NETWORK_FIELD,
            spec.cluster_network.len(),
        ));

        let (services, service_errors) = service_networks(spec);
        let (clusters, cluster_errors) = cluster_networks(spec);
        errors.extend(service_errors);
        errors.extend(cluster_errors);

        let Some(cfg) = spec.kuryr() else {
            errors.push(Error::structural(
                CONFIG_FIELD,
                "required when the default network type is Kuryr",
            ));
            return errors;
        };

        let override_field = Self::field("openStackServiceNetwork");
        match cfg.openstack_service_network.as_deref() {
            Some(raw) => match parse_cidr(raw) {
                Ok(service_override) => {
                    // Sizing depends on a single parsed service network
                    if let (true, [service]) = (single_service, services.as_slice()) {
                        errors.extend(validate_service_subnet_sizing(
                            &override_field,
                            service,
                            &service_override,
                            &clusters,
                        ));
                    }
                }
                Err(e) => errors.push(Error::semantic(&override_field, e.to_string())),
            },
            None if single_service && services.len() == 1 => {
                errors.push(Error::structural(&override_field, "must be set"));
            }
            None => {}
        }

        Self::validate_pools(cfg, &mut errors);
        Self::validate_ports(cfg, &mut errors);
        errors
    }

    fn is_change_safe(&self, previous: &NetworkSpec, next: &NetworkSpec) -> Vec<Error> {
        if previous == next {
            return Vec::new();
        }
        let (Some(prev), Some(next)) = (previous.kuryr(), next.kuryr()) else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        check_unchanged(
            &mut errors,
            &Self::field("openStackServiceNetwork"),
            &prev.openstack_service_network,
            &next.openstack_service_network,
        );
        check_unchanged(
            &mut errors,
            &Self::field("poolMinPorts"),
            &prev.pool_min_ports,
            &next.pool_min_ports,
        );
        check_unchanged(
            &mut errors,
            &Self::field("poolBatchPorts"),
            &prev.pool_batch_ports,
            &next.pool_batch_ports,
        );
        check_unchanged(
            &mut errors,
            &Self::field("poolMaxPorts"),
            &prev.pool_max_ports,
            &next.pool_max_ports,
        );
        check_unchanged(
            &mut errors,
            &Self::field("enablePortPoolsPrepopulation"),
            &prev.enable_port_pools_prepopulation,
            &next.enable_port_pools_prepopulation,
        );
        check_unchanged(
            &mut errors,
            &Self::field("daemonProbesPort"),
            &prev.daemon_probes_port,
            &next.daemon_probes_port,
        );
        check_unchanged(
            &mut errors,
            &Self::field("controllerProbesPort"),
            &prev.controller_probes_port,
            &next.controller_probes_port,
        );
        // The mtu is never defaulted, so setting or clearing it is a change too
        if prev.mtu != next.mtu {
            errors.push(Error::unsafe_change(
                Self::field("mtu"),
                format!(
                    "{:?} -> {:?}; the pod MTU is fixed at bootstrap",
                    prev.mtu, next.mtu
                ),
            ));
        }
        errors
    }

    fn render(&self, spec: &NetworkSpec, facts: &BootstrapFacts) -> Result<RenderedProvider> {
        let settings = Settings::from_spec(spec)?;
        let mut out = RenderedProvider::default();

        out.objects
            .push(namespace(KURYR_NAMESPACE, component_labels(PROVIDER)));
        out.objects.extend(self.rbac());
        out.insert_data("openStackServiceNetwork", settings.service_override.clone());

        let (Some(os), Some(api)) = (facts.kuryr.as_ref(), facts.api_server.as_ref()) else {
            let missing: Vec<&str> = [
                facts.kuryr.is_none().then_some("OpenStack facts"),
                facts.api_server.is_none().then_some("API server endpoint"),
            ]
            .into_iter()
            .flatten()
            .collect();
            let message = format!("{} not discovered; workloads withheld", missing.join(" and "));
            warn!(provider = PROVIDER, %message, "rendering without discovery facts");
            out.warnings
                .push(Error::discovery_unavailable(PROVIDER, message));
            return Ok(out);
        };

        let octavia_acls = os
            .octavia_version
            .as_deref()
            .is_some_and(|v| at_least(v, OCTAVIA_ACL_VERSION.0, OCTAVIA_ACL_VERSION.1));
        debug!(octavia_acls, octavia_version = ?os.octavia_version, "octavia feature detection");

        let conf = self.kuryr_conf(&settings, os, api, octavia_acls);
        let clouds = Self::clouds_yaml(os)?;
        let has_ca = os.ca_bundle.is_some();

        out.objects.push(secret(
            CREDENTIALS_SECRET,
            KURYR_NAMESPACE,
            PROVIDER,
            BTreeMap::from([("clouds.yaml".to_string(), clouds.clone())]),
        ));
        out.objects.push(config_map(
            CONFIG_MAP,
            KURYR_NAMESPACE,
            PROVIDER,
            BTreeMap::from([("kuryr.conf".to_string(), conf.clone())]),
        ));
        if let Some(ca) = &os.ca_bundle {
            out.objects.push(config_map(
                CA_CONFIG_MAP,
                KURYR_NAMESPACE,
                PROVIDER,
                BTreeMap::from([("ca-bundle.pem".to_string(), ca.clone())]),
            ));
            out.insert_data("caBundle", ca.clone());
        }

        let mut daemon = daemon_set(
            "kuryr-cni",
            KURYR_NAMESPACE,
            PROVIDER,
            self.daemon_pod_spec(&settings, has_ca),
        );
        let mut controller = deployment(
            "kuryr-controller",
            KURYR_NAMESPACE,
            PROVIDER,
            1,
            self.controller_pod_spec(&settings, has_ca),
        );

        let order = RolloutOrder::for_versions(
            facts.running_release_version.as_deref(),
            &self.release.version,
        );
        match order {
            RolloutOrder::NodesFirst if !os.rollout.daemon_updated => {
                info!(target_release = %self.release.version, "upgrade in progress, holding controller until daemon rolls out");
                mark_create_only(&mut controller);
            }
            RolloutOrder::ControllersFirst if !os.rollout.controller_updated => {
                info!(target_release = %self.release.version, "downgrade in progress, holding daemon until controller rolls out");
                mark_create_only(&mut daemon);
            }
            _ => {}
        }

        out.objects.push(daemon);
        out.objects.push(controller);

        out.insert_data("kuryrConf", conf);
        out.insert_data("cloudsYaml", clouds);
        out.insert_data("controllerImage", self.release.images.kuryr_controller.clone());
        out.insert_data("daemonImage", self.release.images.kuryr_daemon.clone());
        Ok(out)
    }
}

fn http_probe(path: &str, port: u32) -> Value {
    json!({
        "httpGet": { "path": path, "port": port },
        "initialDelaySeconds": 15,
        "timeoutSeconds": 5,
    })
}

fn volume_mounts(has_ca: bool) -> Value {
    let mut mounts = vec![
        json!({ "name": "config", "mountPath": "/etc/kuryr" }),
        json!({ "name": "credentials", "mountPath": "/etc/kuryr/credentials", "readOnly": true }),
    ];
    if has_ca {
        mounts.push(json!({ "name": "ca", "mountPath": "/etc/ssl/certs/openstack", "readOnly": true }));
    }
    Value::Array(mounts)
}

fn volumes(has_ca: bool, host_paths: bool) -> Value {
    let mut volumes = vec![
        json!({ "name": "config", "configMap": { "name": CONFIG_MAP } }),
        json!({ "name": "credentials", "secret": { "secretName": CREDENTIALS_SECRET } }),
    ];
    if has_ca {
        volumes.push(json!({ "name": "ca", "configMap": { "name": CA_CONFIG_MAP } }));
    }
    if host_paths {
        volumes.extend([
            json!({ "name": "bin", "hostPath": { "path": "/opt/cni/bin" } }),
            json!({ "name": "net-conf", "hostPath": { "path": "/etc/cni/net.d" } }),
            json!({ "name": "proc", "hostPath": { "path": "/proc" } }),
        ]);
    }
    Value::Array(volumes)
}

/// INI document builder; sections and keys keep insertion order
#[derive(Default)]
struct Conf {
    sections: Vec<(String, Vec<(String, String)>)>,
}

struct Section<'a> {
    entries: &'a mut Vec<(String, String)>,
}

impl Conf {
    fn section(&mut self, name: &str) -> Section<'_> {
        self.sections.push((name.to_string(), Vec::new()));
        let last = self.sections.len() - 1;
        Section {
            entries: &mut self.sections[last].1,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", name));
            for (key, value) in entries {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out
    }
}

impl Section<'_> {
    fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.entries.push((key.to_string(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{full_facts, kuryr_spec};
    use lattice_common::{CREATE_ONLY_ANNOTATION, LABEL_NAME};
    use rstest::rstest;

    fn provider() -> KuryrProvider {
        KuryrProvider::new(Arc::new(ReleaseConfig::default()))
    }

    fn provider_for(version: &str) -> KuryrProvider {
        KuryrProvider::new(Arc::new(ReleaseConfig {
            version: version.to_string(),
            ..Default::default()
        }))
    }

    fn defaulted() -> NetworkSpec {
        provider().fill_defaults(&kuryr_spec())
    }

    fn with_config(f: impl FnOnce(&mut KuryrConfig)) -> NetworkSpec {
        let mut spec = defaulted();
        if let Some(cfg) = spec.default_network.kuryr_config.as_mut() {
            f(cfg);
        }
        spec
    }

    fn find<'a>(out: &'a RenderedProvider, kind: &str, name: &str) -> &'a Manifest {
        out.objects
            .iter()
            .find(|m| m.kind == kind && m.metadata.name == name)
            .unwrap_or_else(|| panic!("{kind}/{name} not rendered"))
    }

    fn conf_of(out: &RenderedProvider) -> String {
        out.data["kuryrConf"].as_str().unwrap().to_string()
    }

    mod defaults {
        use super::*;

        #[test]
        fn computes_override_and_pool_sizes() {
            let spec = defaulted();
            let cfg = spec.kuryr().unwrap();
            assert_eq!(cfg.openstack_service_network.as_deref(), Some("172.30.0.0/15"));
            assert_eq!(cfg.pool_min_ports, Some(1));
            assert_eq!(cfg.pool_batch_ports, Some(3));
            assert_eq!(cfg.pool_max_ports, Some(0));
            assert_eq!(cfg.enable_port_pools_prepopulation, Some(false));
            assert_eq!(cfg.daemon_probes_port, Some(8090));
            assert_eq!(cfg.controller_probes_port, Some(8082));
            assert_eq!(cfg.mtu, None);
        }

        #[test]
        fn never_overwrites_explicit_fields() {
            let mut spec = kuryr_spec();
            spec.default_network.kuryr_config = Some(KuryrConfig {
                openstack_service_network: Some("172.28.0.0/14".to_string()),
                pool_batch_ports: Some(10),
                ..Default::default()
            });
            let cfg = provider().fill_defaults(&spec).kuryr().cloned().unwrap();
            assert_eq!(cfg.openstack_service_network.as_deref(), Some("172.28.0.0/14"));
            assert_eq!(cfg.pool_batch_ports, Some(10));
            assert_eq!(cfg.pool_min_ports, Some(1));
        }

        #[test]
        fn input_is_not_mutated() {
            let spec = kuryr_spec();
            let _ = provider().fill_defaults(&spec);
            assert!(spec.kuryr().is_none());
        }

        #[test]
        fn idempotent() {
            let once = defaulted();
            assert_eq!(provider().fill_defaults(&once), once);
        }

        #[test]
        fn invalid_service_network_leaves_override_unset() {
            let mut spec = kuryr_spec();
            spec.service_network = vec!["not-a-cidr".to_string()];
            let filled = provider().fill_defaults(&spec);
            assert_eq!(filled.kuryr().unwrap().openstack_service_network, None);
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn defaulted_spec_is_valid() {
            let errors = provider().validate(&defaulted());
            assert!(errors.is_empty(), "{errors:?}");
        }

        #[test]
        fn equal_size_override_is_rejected() {
            let spec = with_config(|c| c.openstack_service_network = Some("172.30.0.0/16".into()));
            let errors = provider().validate(&spec);
            assert_eq!(errors.len(), 1, "{errors:?}");
            assert!(errors[0].to_string().contains("must be larger"));
        }

        #[test]
        fn reports_every_problem_in_one_pass() {
            let mut spec = defaulted();
            spec.service_network.clear();
            spec.cluster_network[0].cidr = "10.128.0.0/99".to_string();
            let errors = provider().validate(&spec);
            assert!(errors.len() >= 2, "{errors:?}");
            assert!(errors
                .iter()
                .any(|e| matches!(e, Error::Structural { field, .. } if field == SERVICE_NETWORK_FIELD)));
            assert!(errors
                .iter()
                .any(|e| matches!(e, Error::Semantic { field, .. } if field.starts_with(CLUSTER_NETWORK_FIELD))));
        }

        #[test]
        fn two_service_networks_suppress_sizing() {
            let mut spec = defaulted();
            spec.service_network.push("fd02::/112".to_string());
            let errors = provider().validate(&spec);
            assert_eq!(errors.len(), 1, "{errors:?}");
            assert!(matches!(errors[0], Error::Structural { .. }));
        }

        #[test]
        fn missing_config_is_structural() {
            let errors = provider().validate(&kuryr_spec());
            assert_eq!(errors.len(), 1);
            assert!(errors[0].to_string().contains(CONFIG_FIELD));
        }

        #[rstest]
        #[case::zero_batch(|c: &mut KuryrConfig| c.pool_batch_ports = Some(0), "poolBatchPorts")]
        #[case::min_above_batch(|c: &mut KuryrConfig| c.pool_min_ports = Some(5), "poolMinPorts")]
        #[case::batch_above_max(|c: &mut KuryrConfig| c.pool_max_ports = Some(2), "poolBatchPorts")]
        #[case::port_out_of_range(|c: &mut KuryrConfig| c.daemon_probes_port = Some(70000), "daemonProbesPort")]
        #[case::port_zero(|c: &mut KuryrConfig| c.controller_probes_port = Some(0), "controllerProbesPort")]
        #[case::port_collision(|c: &mut KuryrConfig| c.controller_probes_port = Some(8090), "controllerProbesPort")]
        #[case::mtu_too_small(|c: &mut KuryrConfig| c.mtu = Some(1200), "mtu")]
        #[case::bad_override(|c: &mut KuryrConfig| c.openstack_service_network = Some("x".into()), "openStackServiceNetwork")]
        fn rejects(#[case] mutate: fn(&mut KuryrConfig), #[case] field: &str) {
            let errors = provider().validate(&with_config(mutate));
            assert!(!errors.is_empty());
            assert!(
                errors.iter().all(|e| e.to_string().contains(field)),
                "{errors:?}"
            );
        }

        #[test]
        fn unlimited_max_allows_any_batch() {
            let spec = with_config(|c| {
                c.pool_max_ports = Some(0);
                c.pool_batch_ports = Some(500);
                c.pool_min_ports = Some(100);
            });
            assert!(provider().validate(&spec).is_empty());
        }
    }

    mod change_safety {
        use super::*;

        #[test]
        fn identical_specs_are_safe() {
            let spec = defaulted();
            assert!(provider().is_change_safe(&spec, &spec).is_empty());
        }

        #[test]
        fn every_immutable_field_is_reported() {
            let previous = defaulted();
            let next = with_config(|c| {
                c.openstack_service_network = Some("172.28.0.0/14".into());
                c.pool_min_ports = Some(2);
                c.pool_batch_ports = Some(4);
                c.pool_max_ports = Some(10);
                c.enable_port_pools_prepopulation = Some(true);
                c.daemon_probes_port = Some(9000);
                c.controller_probes_port = Some(9001);
            });
            let errors = provider().is_change_safe(&previous, &next);
            assert_eq!(errors.len(), 7, "{errors:?}");
            assert!(errors.iter().all(|e| matches!(e, Error::UnsafeChange { .. })));
        }

        #[rstest]
        #[case::set(None, Some(1450))]
        #[case::changed(Some(1450), Some(1400))]
        #[case::cleared(Some(1450), None)]
        fn any_mtu_change_is_unsafe(#[case] before: Option<u32>, #[case] after: Option<u32>) {
            let previous = with_config(|c| c.mtu = before);
            let next = with_config(|c| c.mtu = after);
            let errors = provider().is_change_safe(&previous, &next);
            assert_eq!(errors.len(), 1, "{errors:?}");
            assert!(errors[0].to_string().contains("mtu"));
        }

        #[test]
        fn unrelated_fields_are_safe() {
            let previous = defaulted();
            let mut next = previous.clone();
            next.deploy_kube_proxy = Some(true);
            assert!(provider().is_change_safe(&previous, &next).is_empty());
        }
    }

    mod render {
        use super::*;

        #[test]
        fn renders_full_object_set_namespace_first() {
            let out = provider().render(&defaulted(), &full_facts()).unwrap();
            assert!(out.warnings.is_empty());
            assert!(out.objects[0].is_namespace());
            let kinds: Vec<&str> = out.objects.iter().map(|m| m.kind.as_str()).collect();
            assert_eq!(
                kinds,
                vec![
                    "Namespace",
                    "ServiceAccount",
                    "ClusterRole",
                    "ClusterRoleBinding",
                    "Secret",
                    "ConfigMap",
                    "DaemonSet",
                    "Deployment",
                ]
            );
            let ds = find(&out, "DaemonSet", "kuryr-cni");
            assert_eq!(
                ds.spec.as_ref().unwrap()["selector"]["matchLabels"][LABEL_NAME],
                PROVIDER
            );
        }

        #[test]
        fn conf_carries_pool_and_probe_settings() {
            let out = provider().render(&defaulted(), &full_facts()).unwrap();
            let conf = conf_of(&out);
            assert!(conf.contains("[vif_pool]\nports_pool_min = 1\nports_pool_max = 0\nports_pool_batch = 3"));
            assert!(conf.contains("[cni_health_server]\nport = 8090"));
            assert!(conf.contains("api_root = https://api-int.example.com:6443"));
            assert!(!conf.contains("cafile"));
        }

        #[rstest]
        #[case::acls_supported(Some("2.13"), "enforce_sg_rules = false")]
        #[case::newer(Some("2.20"), "enforce_sg_rules = false")]
        #[case::too_old(Some("2.12"), "enforce_sg_rules = true")]
        #[case::unknown(None, "enforce_sg_rules = true")]
        fn octavia_acls_gated_on_version(#[case] version: Option<&str>, #[case] expected: &str) {
            let mut facts = full_facts();
            if let Some(os) = facts.kuryr.as_mut() {
                os.octavia_version = version.map(str::to_string);
            }
            let out = provider().render(&defaulted(), &facts).unwrap();
            assert!(conf_of(&out).contains(expected));
        }

        #[test]
        fn ca_bundle_adds_config_map() {
            let mut facts = full_facts();
            if let Some(os) = facts.kuryr.as_mut() {
                os.ca_bundle = Some("PEM".to_string());
            }
            let out = provider().render(&defaulted(), &facts).unwrap();
            find(&out, "ConfigMap", CA_CONFIG_MAP);
            assert!(conf_of(&out).contains("cafile = /etc/ssl/certs/openstack/ca-bundle.pem"));
        }

        #[rstest]
        #[case::single(vec!["subnet-workers"], Some("worker_nodes_subnets = subnet-workers"))]
        #[case::several(vec!["subnet-a", "subnet-b"], Some("worker_nodes_subnets = subnet-a,subnet-b"))]
        #[case::none(vec![], None)]
        fn worker_subnets_feed_nested_vifs(
            #[case] subnets: Vec<&str>,
            #[case] expected: Option<&str>,
        ) {
            let mut facts = full_facts();
            if let Some(os) = facts.kuryr.as_mut() {
                os.worker_nodes_subnet_ids = subnets.iter().map(|s| s.to_string()).collect();
            }
            let conf = conf_of(&provider().render(&defaulted(), &facts).unwrap());
            match expected {
                Some(line) => assert!(conf.contains(&format!("[pod_vif_nested]\n{}\n", line))),
                None => assert!(!conf.contains("pod_vif_nested")),
            }
        }

        #[test]
        fn missing_facts_withhold_workloads() {
            let mut facts = full_facts();
            facts.kuryr = None;
            let out = provider().render(&defaulted(), &facts).unwrap();
            assert_eq!(out.objects.len(), 4);
            assert!(out.objects.iter().all(|m| !m.is_workload()));
            assert_eq!(out.warnings.len(), 1);
            assert!(matches!(
                out.warnings[0],
                Error::DiscoveryUnavailable { .. }
            ));
        }

        #[test]
        fn upgrade_holds_controller_until_daemon_rolled_out() {
            let mut facts = full_facts();
            facts.running_release_version = Some("4.13.2".to_string());
            let out = provider_for("4.14.0").render(&defaulted(), &facts).unwrap();
            assert_eq!(
                find(&out, "Deployment", "kuryr-controller").annotation(CREATE_ONLY_ANNOTATION),
                Some("true")
            );
            assert_eq!(
                find(&out, "DaemonSet", "kuryr-cni").annotation(CREATE_ONLY_ANNOTATION),
                None
            );

            if let Some(os) = facts.kuryr.as_mut() {
                os.rollout.daemon_updated = true;
            }
            let out = provider_for("4.14.0").render(&defaulted(), &facts).unwrap();
            assert_eq!(
                find(&out, "Deployment", "kuryr-controller").annotation(CREATE_ONLY_ANNOTATION),
                None
            );
        }

        #[test]
        fn downgrade_holds_daemon_until_controller_rolled_out() {
            let mut facts = full_facts();
            facts.running_release_version = Some("4.15.0".to_string());
            let out = provider_for("4.14.0").render(&defaulted(), &facts).unwrap();
            assert_eq!(
                find(&out, "DaemonSet", "kuryr-cni").annotation(CREATE_ONLY_ANNOTATION),
                Some("true")
            );
            assert_eq!(
                find(&out, "Deployment", "kuryr-controller").annotation(CREATE_ONLY_ANNOTATION),
                None
            );
        }

        #[test]
        fn undefaulted_spec_is_contract_violation() {
            let err = provider().render(&kuryr_spec(), &full_facts()).unwrap_err();
            assert!(matches!(err, Error::RenderContract { .. }));
        }

        #[test]
        fn render_is_idempotent() {
            let spec = defaulted();
            let facts = full_facts();
            assert_eq!(
                provider().render(&spec, &facts).unwrap(),
                provider().render(&spec, &facts).unwrap()
            );
        }
    }
}
