//! Standalone kube-proxy provider
//!
//! Deployed when the pod network does not implement services itself.
//! `deployKubeProxy` defaults per network type: Kuryr load-balances through
//! Octavia and needs no proxy; third-party networks get one.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::{container, contract_violation, required, NetworkProvider, RenderedProvider};
use crate::checks::{cluster_networks, CLUSTER_NETWORK_FIELD};
use crate::facts::BootstrapFacts;
use crate::manifest::{
    cluster_role_binding, component_labels, config_map, daemon_set, namespace, service,
    service_account,
};
use crate::subnet::parse_cidr;
use lattice_common::crd::{NetworkSpec, NetworkType, ProxyConfig};
use lattice_common::{Error, ReleaseConfig, Result};

const PROVIDER: &str = "kube-proxy";

/// Namespace the standalone kube-proxy runs in
pub const KUBE_PROXY_NAMESPACE: &str = "lattice-kube-proxy";

const CONFIG_FIELD: &str = "spec.kubeProxyConfig";
const SERVICE_ACCOUNT: &str = "kube-proxy";
const CONFIG_MAP: &str = "kube-proxy-config";
const CONFIG_FILE: &str = "kube-proxy-config.yaml";

/// Port kube-proxy serves metrics on; scraped by a fixed ServiceMonitor
pub const METRICS_PORT: u16 = 9102;
/// Port kube-proxy serves health checks on; used by node load balancers
pub const HEALTHZ_PORT: u16 = 10256;
/// Default iptables resync period
pub const DEFAULT_SYNC_PERIOD: &str = "30s";

/// Standalone kube-proxy provider
#[derive(Clone, Debug)]
pub struct KubeProxyProvider {
    release: Arc<ReleaseConfig>,
}

impl KubeProxyProvider {
    /// Create a kube-proxy provider rendering for the given release
    pub fn new(release: Arc<ReleaseConfig>) -> Self {
        Self { release }
    }

    fn field(name: &str) -> String {
        format!("{}.{}", CONFIG_FIELD, name)
    }

    /// Whether kube-proxy is deployed when `deployKubeProxy` is unset
    fn deploy_by_default(spec: &NetworkSpec) -> bool {
        match spec.network_type() {
            Ok(NetworkType::Kuryr) => false,
            Ok(NetworkType::ThirdParty) => true,
            Err(_) => false,
        }
    }

    fn validate_config(cfg: &ProxyConfig, errors: &mut Vec<Error>) {
        if let Some(addr) = &cfg.bind_address {
            if addr.parse::<IpAddr>().is_err() {
                errors.push(Error::semantic(
                    Self::field("bindAddress"),
                    format!("{:?} is not an IP address", addr),
                ));
            }
        }

        if let Some(period) = &cfg.iptables_sync_period {
            match humantime::parse_duration(period) {
                Ok(d) if d == Duration::ZERO => errors.push(Error::semantic(
                    Self::field("iptablesSyncPeriod"),
                    "must be greater than zero",
                )),
                Ok(_) => {}
                Err(e) => errors.push(Error::semantic(
                    Self::field("iptablesSyncPeriod"),
                    format!("{:?} is not a duration: {}", period, e),
                )),
            }
        }

        for (name, values) in &cfg.proxy_arguments {
            let field = Self::field(&format!("proxyArguments.{}", name));
            if name.is_empty() || name.starts_with('-') {
                errors.push(Error::semantic(
                    &field,
                    "argument names are given without leading dashes",
                ));
            }
            if values.is_empty() {
                errors.push(Error::semantic(&field, "must have at least one value"));
                continue;
            }
            match name.as_str() {
                "metrics-port" => Self::require_fixed(&field, values, METRICS_PORT, errors),
                "healthz-port" => Self::require_fixed(&field, values, HEALTHZ_PORT, errors),
                "config" | "hostname-override" | "metrics-bind-address"
                | "healthz-bind-address" => errors.push(Error::semantic(
                    &field,
                    "may not be overridden",
                )),
                _ => {}
            }
        }
    }

    fn require_fixed(field: &str, values: &[String], port: u16, errors: &mut Vec<Error>) {
        let expected = port.to_string();
        if values.iter().any(|v| *v != expected) {
            errors.push(Error::semantic(
                field,
                format!("may only be set to {}", expected),
            ));
        }
    }

    fn config_yaml(bind: IpAddr, cluster_cidr: &str, sync_period: &str) -> Result<String> {
        let config = json!({
            "apiVersion": "kubeproxy.config.k8s.io/v1alpha1",
            "kind": "KubeProxyConfiguration",
            "bindAddress": bind.to_string(),
            "clusterCIDR": cluster_cidr,
            "metricsBindAddress": SocketAddr::new(bind, METRICS_PORT).to_string(),
            "healthzBindAddress": SocketAddr::new(bind, HEALTHZ_PORT).to_string(),
            "mode": "iptables",
            "iptables": { "syncPeriod": sync_period },
        });
        serde_yaml::to_string(&config)
            .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))
    }

    /// Command-line flags: the fixed ones, then overrides as sorted `--name=value`
    fn args(cfg: &ProxyConfig) -> Vec<String> {
        let mut args = vec![
            format!("--config=/config/{}", CONFIG_FILE),
            "--hostname-override=$(NODE_NAME)".to_string(),
        ];
        // BTreeMap iteration is already sorted by name
        for (name, values) in &cfg.proxy_arguments {
            for value in values {
                args.push(format!("--{}={}", name, value));
            }
        }
        args
    }

    fn pod_spec(&self, args: Vec<String>) -> Value {
        let mut proxy = container(
            "kube-proxy",
            &self.release.images.kube_proxy,
            vec!["kube-proxy".to_string()],
            args,
        );
        proxy["securityContext"] = json!({ "privileged": true });
        proxy["env"] = json!([{
            "name": "NODE_NAME",
            "valueFrom": { "fieldRef": { "fieldPath": "spec.nodeName" } },
        }]);
        proxy["ports"] = json!([{ "name": "metrics", "containerPort": METRICS_PORT }]);
        proxy["readinessProbe"] = json!({
            "httpGet": { "path": "/healthz", "port": HEALTHZ_PORT },
        });
        proxy["volumeMounts"] = json!([
            { "name": "config", "mountPath": "/config" },
            { "name": "lib-modules", "mountPath": "/lib/modules", "readOnly": true },
        ]);

        json!({
            "serviceAccountName": SERVICE_ACCOUNT,
            "hostNetwork": true,
            "priorityClassName": "system-node-critical",
            "tolerations": [{ "operator": "Exists" }],
            "containers": [proxy],
            "volumes": [
                { "name": "config", "configMap": { "name": CONFIG_MAP } },
                { "name": "lib-modules", "hostPath": { "path": "/lib/modules" } },
            ],
        })
    }
}

impl NetworkProvider for KubeProxyProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn is_active(&self, spec: &NetworkSpec) -> bool {
        spec.deploy_kube_proxy
            .unwrap_or_else(|| Self::deploy_by_default(spec))
    }

    fn fill_defaults(&self, spec: &NetworkSpec) -> NetworkSpec {
        let mut next = spec.clone();
        let deploy = *next
            .deploy_kube_proxy
            .get_or_insert_with(|| Self::deploy_by_default(spec));
        if !deploy {
            return next;
        }

        let ipv6 = spec
            .cluster_network
            .first()
            .and_then(|c| parse_cidr(&c.cidr).ok())
            .is_some_and(|net| net.addr().is_ipv6());

        let cfg = next.kube_proxy_config.get_or_insert_with(ProxyConfig::default);
        cfg.bind_address.get_or_insert_with(|| {
            let addr = if ipv6 { "::" } else { "0.0.0.0" };
            debug!(bind_address = addr, "defaulting kube-proxy bind address");
            addr.to_string()
        });
        cfg.iptables_sync_period
            .get_or_insert_with(|| DEFAULT_SYNC_PERIOD.to_string());
        next
    }

    fn validate(&self, spec: &NetworkSpec) -> Vec<Error> {
        let mut errors = Vec::new();

        if spec.cluster_network.is_empty() {
            errors.push(Error::structural(
                CLUSTER_NETWORK_FIELD,
                "at least one entry is required to deploy kube-proxy",
            ));
        }
        let (_, cluster_errors) = cluster_networks(spec);
        errors.extend(cluster_errors);

        if let Some(cfg) = &spec.kube_proxy_config {
            Self::validate_config(cfg, &mut errors);
        }
        errors
    }

    fn is_change_safe(&self, _previous: &NetworkSpec, _next: &NetworkSpec) -> Vec<Error> {
        // kube-proxy reconfigures in place; every field may change
        Vec::new()
    }

    fn render(&self, spec: &NetworkSpec, _facts: &BootstrapFacts) -> Result<RenderedProvider> {
        let cfg = spec
            .kube_proxy_config
            .as_ref()
            .ok_or_else(|| contract_violation(PROVIDER, "kubeProxyConfig is missing"))?;
        let bind: IpAddr = required(PROVIDER, "bindAddress", &cfg.bind_address)?
            .parse()
            .map_err(|_| contract_violation(PROVIDER, "bindAddress is not an IP address"))?;
        let sync_period = required(PROVIDER, "iptablesSyncPeriod", &cfg.iptables_sync_period)?;
        if spec.cluster_network.is_empty() {
            return Err(contract_violation(PROVIDER, "no cluster network"));
        }
        let cluster_cidr = spec
            .cluster_network
            .iter()
            .map(|c| c.cidr.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let config = Self::config_yaml(bind, &cluster_cidr, &sync_period)?;
        let args = Self::args(cfg);

        let mut out = RenderedProvider::default();
        out.objects.push(namespace(
            KUBE_PROXY_NAMESPACE,
            component_labels(PROVIDER),
        ));
        out.objects.push(service_account(
            SERVICE_ACCOUNT,
            KUBE_PROXY_NAMESPACE,
            PROVIDER,
        ));
        out.objects.push(cluster_role_binding(
            "lattice-kube-proxy",
            PROVIDER,
            "system:node-proxier",
            SERVICE_ACCOUNT,
            KUBE_PROXY_NAMESPACE,
        ));
        out.objects.push(config_map(
            CONFIG_MAP,
            KUBE_PROXY_NAMESPACE,
            PROVIDER,
            BTreeMap::from([(CONFIG_FILE.to_string(), config.clone())]),
        ));
        out.objects.push(daemon_set(
            "kube-proxy",
            KUBE_PROXY_NAMESPACE,
            PROVIDER,
            self.pod_spec(args.clone()),
        ));
        out.objects.push(service(
            "kube-proxy-metrics",
            KUBE_PROXY_NAMESPACE,
            PROVIDER,
            json!([{ "name": "metrics", "port": METRICS_PORT, "targetPort": METRICS_PORT }]),
        ));

        out.insert_data("config", config);
        out.insert_data("args", json!(args));
        out.insert_data("image", self.release.images.kube_proxy.clone());
        Ok(out)
    }
}
