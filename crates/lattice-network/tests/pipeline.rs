//! End-to-end reconcile passes over specs and facts as they arrive from the API

use lattice_common::crd::{NetworkPhase, NetworkSpec};
use lattice_common::{Error, ReleaseConfig, CONFIG_HASH_ANNOTATION, CREATE_ONLY_ANNOTATION};
use lattice_network::{failure_status, BootstrapFacts, NetworkReconciler};
use rstest::rstest;
use serde_json::json;

fn spec(value: serde_json::Value) -> NetworkSpec {
    serde_json::from_value(value).expect("spec fixture deserializes")
}

fn kuryr_spec() -> NetworkSpec {
    spec(json!({
        "serviceNetwork": ["172.30.0.0/16"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
        "defaultNetwork": { "type": "Kuryr" }
    }))
}

fn facts() -> BootstrapFacts {
    serde_json::from_value(json!({
        "apiServer": { "host": "api-int.example.com", "port": 6443 },
        "kuryr": {
            "authUrl": "https://keystone.example.com:5000/v3",
            "projectId": "project-1",
            "credentials": { "username": "kuryr", "password": "s3cret" },
            "podSubnetpoolId": "subnetpool-1",
            "serviceSubnetId": "subnet-svc",
            "routerId": "router-1",
            "workerNodesSubnetIds": ["subnet-workers"],
            "podSecurityGroupIds": ["sg-pods"],
            "octaviaProvider": "ovn",
            "octaviaVersion": "2.16"
        },
        "nodeIdentity": { "caBundle": "-----BEGIN CERTIFICATE-----", "webhookReady": true }
    }))
    .expect("facts fixture deserializes")
}

fn reconciler() -> NetworkReconciler {
    NetworkReconciler::new(ReleaseConfig::default())
}

#[test]
fn kuryr_pass_fills_defaults_and_renders() {
    let out = reconciler().reconcile(&kuryr_spec(), None, &facts()).unwrap();

    let cfg = out.spec.kuryr().expect("kuryr config defaulted");
    assert_eq!(cfg.openstack_service_network.as_deref(), Some("172.30.0.0/15"));
    assert_eq!(cfg.pool_min_ports, Some(1));
    assert_eq!(cfg.pool_batch_ports, Some(3));
    assert_eq!(cfg.pool_max_ports, Some(0));

    assert!(!out.objects.is_empty());
    assert_eq!(out.objects[0].kind, "Namespace");
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);

    let status = out.status();
    assert_eq!(status.phase, NetworkPhase::Rendered);
    assert_eq!(status.observed_release.as_deref(), Some("4.14.0"));
    assert_eq!(status.config_hashes.len(), 3);
}

#[test]
fn minimal_spec_without_host_prefix_is_valid() {
    let input = spec(json!({
        "serviceNetwork": ["172.30.0.0/16"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/15" }],
        "defaultNetwork": { "type": "Kuryr" }
    }));
    let defaulted = reconciler().check(&input, None).unwrap();
    assert_eq!(
        defaulted.kuryr().and_then(|c| c.openstack_service_network.as_deref()),
        Some("172.30.0.0/15")
    );

    let out = reconciler().reconcile(&input, None, &facts()).unwrap();
    assert!(out.objects[0].is_namespace());
}

#[test]
fn every_workload_is_hash_annotated() {
    let out = reconciler().reconcile(&kuryr_spec(), None, &facts()).unwrap();
    for object in out.objects.iter().filter(|m| m.is_workload()) {
        let hash = object
            .annotation(CONFIG_HASH_ANNOTATION)
            .unwrap_or_else(|| panic!("{} has no config hash", object.key()));
        assert_eq!(object.pod_template_annotation(CONFIG_HASH_ANNOTATION), Some(hash));
    }
}

#[test]
fn config_changes_change_only_that_providers_hash() {
    let before = reconciler().reconcile(&kuryr_spec(), None, &facts()).unwrap();

    let mut next = before.spec.clone();
    next.additional_networks = serde_json::from_value(json!([{
        "name": "storage",
        "type": "Raw",
        "rawCNIConfig": "{\"name\":\"storage\",\"type\":\"bridge\"}"
    }]))
    .unwrap();
    let after = reconciler().reconcile(&next, Some(&before.spec), &facts()).unwrap();

    assert_eq!(before.config_hashes["kuryr"], after.config_hashes["kuryr"]);
    assert_ne!(before.config_hashes["multus"], after.config_hashes["multus"]);
    assert!(after
        .objects
        .iter()
        .any(|m| m.kind == "NetworkAttachmentDefinition" && m.metadata.name == "storage"));
}

#[test]
fn unknown_network_type_is_unsupported() {
    let mut input = kuryr_spec();
    input.default_network.type_ = "Calico".to_string();
    let err = reconciler().reconcile(&input, None, &facts()).unwrap_err();
    assert_eq!(err, Error::unsupported_type("Calico"));
    assert_eq!(failure_status(&err, "4.14.0").phase, NetworkPhase::Rejected);
}

#[test]
fn unselected_kuryr_config_is_inert() {
    let input = spec(json!({
        "serviceNetwork": ["172.30.0.0/16", "fd02::/112"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
        "defaultNetwork": {
            "type": "ThirdParty",
            "kuryrConfig": { "poolMinPorts": 10, "poolMaxPorts": 2, "mtu": 100 }
        }
    }));
    let out = reconciler().reconcile(&input, None, &facts()).unwrap();
    assert!(!out.config_hashes.contains_key("kuryr"));
    assert!(out.objects.iter().all(|m| m.metadata.namespace.as_deref() != Some("lattice-kuryr")));
    assert_eq!(out.spec.kuryr().and_then(|c| c.pool_min_ports), Some(10));
}

#[test]
fn immutable_changes_are_rejected_together() {
    let applied = reconciler().reconcile(&kuryr_spec(), None, &facts()).unwrap();

    let mut next = applied.spec.clone();
    next.disable_multi_network = Some(true);
    if let Some(cfg) = next.default_network.kuryr_config.as_mut() {
        cfg.pool_batch_ports = Some(5);
    }
    let err = reconciler()
        .reconcile(&next, Some(&applied.spec), &facts())
        .unwrap_err();

    assert!(matches!(err, Error::Rejected { .. }));
    assert_eq!(err.violations().len(), 2, "{err}");
    assert!(err.violations().iter().all(|e| matches!(e, Error::UnsafeChange { .. })));
}

#[test]
fn computed_defaults_are_immutable_against_a_raw_previous_spec() {
    let previous = spec(json!({
        "serviceNetwork": ["172.30.0.0/16"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
        "defaultNetwork": { "type": "Kuryr" }
    }));
    let next = spec(json!({
        "serviceNetwork": ["172.30.0.0/16"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
        "defaultNetwork": {
            "type": "Kuryr",
            "kuryrConfig": { "openStackServiceNetwork": "172.28.0.0/14", "poolBatchPorts": 10 }
        }
    }));

    let err = reconciler().check(&next, Some(&previous)).unwrap_err();
    let fields: Vec<String> = err.violations().iter().map(|e| e.to_string()).collect();
    assert_eq!(fields.len(), 2, "{fields:?}");
    assert!(fields.iter().any(|f| f.contains("openStackServiceNetwork")));
    assert!(fields.iter().any(|f| f.contains("poolBatchPorts")));

    // Restating the computed values is not a change
    assert!(reconciler().check(&previous, Some(&previous)).is_ok());
    let restated = reconciler().check(&previous, None).unwrap();
    assert!(reconciler().check(&restated, Some(&previous)).is_ok());
}

#[test]
fn every_validation_error_is_reported() {
    let input = spec(json!({
        "serviceNetwork": [],
        "clusterNetwork": [{ "cidr": "10.128.0.0/33" }],
        "defaultNetwork": { "type": "Kuryr" }
    }));
    let err = reconciler().reconcile(&input, None, &facts()).unwrap_err();
    assert!(err.violations().len() >= 2, "{err}");
    assert!(err.violations().iter().all(Error::is_validation));

    let status = failure_status(&err, "4.14.0");
    assert_eq!(status.errors.len(), err.violations().len());
}

#[test]
fn explicit_undersized_override_is_rejected() {
    let input = spec(json!({
        "serviceNetwork": ["172.30.0.0/16"],
        "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
        "defaultNetwork": {
            "type": "Kuryr",
            "kuryrConfig": { "openStackServiceNetwork": "172.30.0.0/16" }
        }
    }));
    let err = reconciler().check(&input, None).unwrap_err();
    assert!(err
        .violations()
        .iter()
        .any(|e| e.to_string().contains("openStackServiceNetwork")));
}

#[rstest]
#[case::fresh_install(None, false, false, None)]
#[case::upgrade_waits_for_daemon(Some("4.13.0"), false, false, Some("kuryr-controller"))]
#[case::upgrade_daemon_done(Some("4.13.0"), true, false, None)]
#[case::downgrade_waits_for_controller(Some("4.15.0"), false, false, Some("kuryr-cni"))]
#[case::downgrade_controller_done(Some("4.15.0"), false, true, None)]
fn rollout_order_holds_back_one_side(
    #[case] running: Option<&str>,
    #[case] daemon_updated: bool,
    #[case] controller_updated: bool,
    #[case] held_back: Option<&str>,
) {
    let mut facts = facts();
    facts.running_release_version = running.map(str::to_string);
    if let Some(kuryr) = facts.kuryr.as_mut() {
        kuryr.rollout.daemon_updated = daemon_updated;
        kuryr.rollout.controller_updated = controller_updated;
    }

    let out = reconciler().reconcile(&kuryr_spec(), None, &facts).unwrap();
    let create_only: Vec<&str> = out
        .objects
        .iter()
        .filter(|m| m.annotation(CREATE_ONLY_ANNOTATION).is_some())
        .map(|m| m.metadata.name.as_str())
        .collect();
    assert_eq!(create_only, held_back.into_iter().collect::<Vec<_>>());
}

#[test]
fn missing_openstack_facts_degrade_to_rbac_only() {
    let mut facts = facts();
    facts.kuryr = None;
    let out = reconciler().reconcile(&kuryr_spec(), None, &facts).unwrap();

    let kuryr_kinds: Vec<&str> = out
        .objects
        .iter()
        .filter(|m| {
            m.metadata.namespace.as_deref() == Some("lattice-kuryr")
                || m.metadata.name.contains("kuryr")
        })
        .map(|m| m.kind.as_str())
        .collect();
    assert!(kuryr_kinds.iter().all(|k| !matches!(*k, "DaemonSet" | "Deployment")));
    assert!(out
        .warnings
        .iter()
        .any(|w| matches!(w, Error::DiscoveryUnavailable { .. })));
}
