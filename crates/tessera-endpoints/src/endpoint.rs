//! Normalization of slice members into internal endpoints

use crate::traits::PodResolver;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use k8s_openapi::api::discovery::v1::{EndpointConditions, EndpointPort};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{
    ClusterId, DiscoverabilityPolicy, Endpoint, HealthStatus, Locality, NamespacedName, Service,
};

/// Slice address type that cannot be resolved to endpoints
pub const ADDRESS_TYPE_FQDN: &str = "FQDN";

const LABEL_LOCALITY: &str = "istio-locality";
const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";
const LABEL_TOPOLOGY_SUBZONE: &str = "topology.istio.io/subzone";
const LABEL_TLS_MODE: &str = "security.istio.io/tlsMode";

/// Derive the health of a slice member.
///
/// A member is healthy unless it is explicitly not ready. A not-ready member
/// that is still serving and not yet terminating is draining, but only when
/// `persistent_session_label` is configured and set on the owning service.
pub fn endpoint_health_status(
    persistent_session_label: Option<&str>,
    service: Option<&Service>,
    conditions: Option<&EndpointConditions>,
) -> HealthStatus {
    let ready = conditions.and_then(|c| c.ready);
    if ready.unwrap_or(true) {
        return HealthStatus::Healthy;
    }

    let sessions_enabled = match (persistent_session_label, service) {
        (Some(label), Some(svc)) if !label.is_empty() => svc
            .attributes
            .labels
            .get(label)
            .is_some_and(|v| !v.is_empty()),
        _ => false,
    };
    let serving = conditions.and_then(|c| c.serving).unwrap_or(true);
    let terminating = conditions.and_then(|c| c.terminating).unwrap_or(false);

    if sessions_enabled && serving && !terminating {
        return HealthStatus::Draining;
    }
    HealthStatus::Unhealthy
}

/// True when the member names an owning pod, which must then be resolvable
pub fn expects_pod(target_ref: Option<&ObjectReference>) -> bool {
    target_ref.is_some_and(|r| r.kind.as_deref() == Some("Pod"))
}

/// Resolve the pod behind a slice member.
///
/// A pod reference is looked up by name. Without one the member is manually
/// managed (e.g. host network) and the first pod holding the address in the
/// slice's namespace is used; the address may be shared, so this is a guess.
pub fn get_pod(
    pods: &dyn PodResolver,
    ip: &str,
    namespace: &str,
    target_ref: Option<&ObjectReference>,
) -> Option<Arc<Pod>> {
    if let Some(r) = target_ref.filter(|r| expects_pod(Some(*r))) {
        let key = NamespacedName::new(
            r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
            r.name.clone().unwrap_or_default(),
        );
        return pods.get_pod_by_key(&key);
    }

    pods.get_pods_by_ip(ip)
        .into_iter()
        .find(|p| p.metadata.namespace.as_deref() == Some(namespace))
}

/// Port number and name of a slice port, with unset values defaulted
pub fn slice_port(port: &EndpointPort) -> (u32, String) {
    let number = port.port.and_then(|p| u32::try_from(p).ok()).unwrap_or(0);
    (number, port.name.clone().unwrap_or_default())
}

/// Builds endpoints sharing the metadata of one (optional) pod
#[derive(Debug, Clone, Default)]
pub struct EndpointBuilder {
    labels: BTreeMap<String, String>,
    service_account: String,
    locality: Locality,
    namespace: String,
    workload_name: String,
    node_name: String,
    hostname: String,
    subdomain: String,
    tls_mode: String,
}

impl EndpointBuilder {
    pub fn new(cluster_id: &ClusterId, pod: Option<&Pod>) -> Self {
        let Some(pod) = pod else {
            return Self {
                locality: Locality {
                    label: String::new(),
                    cluster_id: cluster_id.to_string(),
                },
                tls_mode: "disabled".to_string(),
                ..Default::default()
            };
        };

        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let spec = pod.spec.as_ref();
        let tls_mode = match labels.get(LABEL_TLS_MODE).map(String::as_str) {
            Some("istio") => "istio",
            _ => "disabled",
        };

        Self {
            locality: Locality {
                label: locality_label(&labels),
                cluster_id: cluster_id.to_string(),
            },
            service_account: spec
                .and_then(|s| s.service_account_name.clone())
                .unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            workload_name: workload_name(pod),
            node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
            hostname: spec.and_then(|s| s.hostname.clone()).unwrap_or_default(),
            subdomain: spec.and_then(|s| s.subdomain.clone()).unwrap_or_default(),
            tls_mode: tls_mode.to_string(),
            labels,
        }
    }

    pub fn build(
        &self,
        address: &str,
        endpoint_port: u32,
        service_port_name: &str,
        discoverability_policy: DiscoverabilityPolicy,
        health_status: HealthStatus,
    ) -> Endpoint {
        Endpoint {
            address: address.to_string(),
            service_port_name: service_port_name.to_string(),
            endpoint_port,
            health_status,
            discoverability_policy,
            labels: self.labels.clone(),
            service_account: self.service_account.clone(),
            locality: self.locality.clone(),
            namespace: self.namespace.clone(),
            workload_name: self.workload_name.clone(),
            node_name: self.node_name.clone(),
            hostname: self.hostname.clone(),
            subdomain: self.subdomain.clone(),
            tls_mode: self.tls_mode.clone(),
        }
    }
}

/// region/zone/subzone from an explicit locality label or topology labels.
///
/// Topology levels stop at the first missing one, since a zone means
/// nothing without its region.
fn locality_label(labels: &BTreeMap<String, String>) -> String {
    if let Some(l) = labels.get(LABEL_LOCALITY) {
        return l.replace('.', "/");
    }
    [LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE, LABEL_TOPOLOGY_SUBZONE]
        .iter()
        .map_while(|k| labels.get(*k).map(String::as_str).filter(|v| !v.is_empty()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Name of the workload owning a pod
fn workload_name(pod: &Pod) -> String {
    let owner = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)).or(refs.first()));

    match owner {
        // Deployment pods are owned by "<deployment>-<template hash>"
        Some(o) if o.kind == "ReplicaSet" => match o.name.rsplit_once('-') {
            Some((deployment, _)) => deployment.to_string(),
            None => o.name.clone(),
        },
        Some(o) => o.name.clone(),
        None => pod.metadata.name.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod_cache::PodCache;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use tessera_core::{Hostname, ServiceAttributes};

    const SESSION_LABEL: &str = "istio.io/persistent-session";

    fn service(with_session_label: bool) -> Service {
        let mut attributes = ServiceAttributes::default();
        if with_session_label {
            attributes
                .labels
                .insert(SESSION_LABEL.to_string(), "cookie".to_string());
        }
        Service {
            hostname: Hostname::from("foo.default.svc.cluster.local"),
            ports: Vec::new(),
            attributes,
            headless: false,
        }
    }

    fn conditions(
        ready: Option<bool>,
        serving: Option<bool>,
        terminating: Option<bool>,
    ) -> EndpointConditions {
        EndpointConditions {
            ready,
            serving,
            terminating,
        }
    }

    fn pod(name: &str, namespace: &str, ip: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.spec = Some(PodSpec {
            service_account_name: Some("reviews".to_string()),
            node_name: Some("node-1".to_string()),
            ..Default::default()
        });
        pod.status = Some(PodStatus {
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        });
        pod
    }

    fn pod_ref(name: &str, namespace: &str) -> ObjectReference {
        ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_health_ready_or_absent_is_healthy() {
        let svc = service(true);
        for ready in [Some(true), None] {
            for serving in [Some(true), Some(false), None] {
                for terminating in [Some(true), Some(false), None] {
                    let c = conditions(ready, serving, terminating);
                    assert_eq!(
                        endpoint_health_status(Some(SESSION_LABEL), Some(&svc), Some(&c)),
                        HealthStatus::Healthy
                    );
                }
            }
        }
        assert_eq!(
            endpoint_health_status(Some(SESSION_LABEL), Some(&svc), None),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_health_draining_with_persistent_sessions() {
        let svc = service(true);
        for serving in [Some(true), None] {
            for terminating in [Some(false), None] {
                let c = conditions(Some(false), serving, terminating);
                assert_eq!(
                    endpoint_health_status(Some(SESSION_LABEL), Some(&svc), Some(&c)),
                    HealthStatus::Draining
                );
            }
        }
    }

    #[test]
    fn test_health_unhealthy_without_persistent_sessions() {
        let c = conditions(Some(false), Some(true), Some(false));
        // feature disabled
        assert_eq!(
            endpoint_health_status(None, Some(&service(true)), Some(&c)),
            HealthStatus::Unhealthy
        );
        // service not labelled
        assert_eq!(
            endpoint_health_status(Some(SESSION_LABEL), Some(&service(false)), Some(&c)),
            HealthStatus::Unhealthy
        );
        // service unknown
        assert_eq!(
            endpoint_health_status(Some(SESSION_LABEL), None, Some(&c)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_health_unhealthy_when_not_serving_or_terminating() {
        let svc = service(true);
        for terminating in [Some(true), Some(false), None] {
            let c = conditions(Some(false), Some(false), terminating);
            assert_eq!(
                endpoint_health_status(Some(SESSION_LABEL), Some(&svc), Some(&c)),
                HealthStatus::Unhealthy
            );
        }
        let c = conditions(Some(false), Some(true), Some(true));
        assert_eq!(
            endpoint_health_status(Some(SESSION_LABEL), Some(&svc), Some(&c)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_get_pod_by_reference() {
        let pods = PodCache::new();
        pods.upsert(pod("reviews-1", "default", "10.0.0.1"));

        let found = get_pod(&pods, "10.0.0.1", "default", Some(&pod_ref("reviews-1", "default")));
        assert_eq!(found.unwrap().metadata.name.as_deref(), Some("reviews-1"));

        let missing = get_pod(&pods, "10.0.0.1", "default", Some(&pod_ref("reviews-2", "default")));
        assert!(missing.is_none());
    }

    #[test]
    fn test_get_pod_by_address_in_namespace() {
        let pods = PodCache::new();
        pods.upsert(pod("other", "other-ns", "10.0.0.9"));
        pods.upsert(pod("host-agent", "default", "10.0.0.9"));

        let found = get_pod(&pods, "10.0.0.9", "default", None).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("host-agent"));
        assert!(get_pod(&pods, "10.0.0.9", "missing-ns", None).is_none());
    }

    #[test]
    fn test_expects_pod() {
        assert!(expects_pod(Some(&pod_ref("a", "b"))));
        assert!(!expects_pod(None));
        let node_ref = ObjectReference {
            kind: Some("Node".to_string()),
            ..Default::default()
        };
        assert!(!expects_pod(Some(&node_ref)));
    }

    #[test]
    fn test_slice_port_defaults() {
        assert_eq!(slice_port(&EndpointPort::default()), (0, String::new()));
        let port = EndpointPort {
            name: Some("http".to_string()),
            port: Some(8080),
            ..Default::default()
        };
        assert_eq!(slice_port(&port), (8080, "http".to_string()));
    }

    #[test]
    fn test_builder_copies_pod_metadata() {
        let mut p = pod("reviews-7d4b9-xk2p", "default", "10.0.0.1");
        p.metadata.labels = Some(BTreeMap::from([
            (LABEL_TOPOLOGY_REGION.to_string(), "us-east1".to_string()),
            (LABEL_TOPOLOGY_ZONE.to_string(), "us-east1-b".to_string()),
            (LABEL_TLS_MODE.to_string(), "istio".to_string()),
        ]));
        p.metadata.owner_references = Some(vec![OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: "reviews-7d4b9".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);

        let builder = EndpointBuilder::new(&ClusterId::from("c1"), Some(&p));
        let ep = builder.build(
            "10.0.0.1",
            9080,
            "http",
            DiscoverabilityPolicy::AlwaysDiscoverable,
            HealthStatus::Healthy,
        );

        assert_eq!(ep.address, "10.0.0.1");
        assert_eq!(ep.endpoint_port, 9080);
        assert_eq!(ep.service_port_name, "http");
        assert_eq!(ep.service_account, "reviews");
        assert_eq!(ep.namespace, "default");
        assert_eq!(ep.node_name, "node-1");
        assert_eq!(ep.workload_name, "reviews");
        assert_eq!(ep.locality.label, "us-east1/us-east1-b");
        assert_eq!(ep.locality.cluster_id, "c1");
        assert_eq!(ep.tls_mode, "istio");
    }

    #[test]
    fn test_builder_without_pod() {
        let builder = EndpointBuilder::new(&ClusterId::default(), None);
        let ep = builder.build(
            "10.0.0.1",
            0,
            "",
            DiscoverabilityPolicy::ClusterLocal,
            HealthStatus::Unhealthy,
        );
        assert!(ep.labels.is_empty());
        assert_eq!(ep.service_account, "");
        assert_eq!(ep.tls_mode, "disabled");
        assert_eq!(ep.discoverability_policy, DiscoverabilityPolicy::ClusterLocal);
    }

    #[test]
    fn test_locality_label_override() {
        let labels = BTreeMap::from([(LABEL_LOCALITY.to_string(), "r1.z1.s1".to_string())]);
        assert_eq!(locality_label(&labels), "r1/z1/s1");
        assert_eq!(locality_label(&BTreeMap::new()), "");
    }

    #[test]
    fn test_locality_label_partial_topology() {
        let labels = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        let zone_only = labels(&[(LABEL_TOPOLOGY_ZONE, "us-east1-b")]);
        assert_eq!(locality_label(&zone_only), "");

        let no_zone = labels(&[(LABEL_TOPOLOGY_REGION, "r"), (LABEL_TOPOLOGY_SUBZONE, "s")]);
        assert_eq!(locality_label(&no_zone), "r");

        let full = labels(&[
            (LABEL_TOPOLOGY_REGION, "r"),
            (LABEL_TOPOLOGY_ZONE, "z"),
            (LABEL_TOPOLOGY_SUBZONE, "s"),
        ]);
        assert_eq!(locality_label(&full), "r/z/s");
    }
}
