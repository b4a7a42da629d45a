use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use std::sync::Arc;
use tessera_core::{
    DiscoverabilityPolicy, Endpoint, Hostname, NamespacedName, PushRequest, Service, ShardKey,
};

/// Read access to the slices currently known to the watch layer
///
/// Implementations hold their own lock and never block on I/O.
pub trait SliceLister: Send + Sync {
    /// Get a slice by name
    fn get(&self, name: &str, namespace: &str) -> Option<EndpointSlice>;

    /// List slices in a namespace that pass the configured object filter
    fn list(&self, namespace: &str) -> Vec<EndpointSlice>;

    /// List every slice in a namespace, ignoring the object filter
    fn list_unfiltered(&self, namespace: &str) -> Vec<EndpointSlice>;

    /// List filtered slices owned by a cluster service
    fn list_for_service(&self, namespace: &str, service_name: &str) -> Vec<EndpointSlice> {
        self.list(namespace)
            .into_iter()
            .filter(|s| crate::labels::matches_service(s, service_name))
            .collect()
    }
}

/// Logical service registry
pub trait ServiceRegistry: Send + Sync {
    /// Logical services built from a cluster service
    fn services_for_namespaced_name(&self, name: &NamespacedName) -> Vec<Arc<Service>>;

    /// Hostnames of the logical services built from a cluster service
    fn hostnames_for_namespaced_name(&self, name: &NamespacedName) -> Vec<Hostname> {
        self.services_for_namespaced_name(name)
            .iter()
            .map(|s| s.hostname.clone())
            .collect()
    }

    /// Current logical service for a hostname
    fn get_service(&self, hostname: &Hostname) -> Option<Arc<Service>>;

    /// Discoverability policy applied to endpoints of a service
    fn endpoint_discoverability_policy(&self, service: Option<&Service>) -> DiscoverabilityPolicy;
}

/// Pod metadata cache, updated independently of slices
pub trait PodResolver: Send + Sync {
    /// Look up a pod by name
    fn get_pod_by_key(&self, key: &NamespacedName) -> Option<Arc<Pod>>;

    /// All pods currently holding an IP (host-network pods may share one)
    fn get_pods_by_ip(&self, ip: &str) -> Vec<Arc<Pod>>;

    /// Ask to replay the slice `slice_key` once a pod with `ip` arrives
    fn queue_endpoint_event_on_pod_arrival(&self, slice_key: &NamespacedName, ip: &str);

    /// The slice `slice_key` no longer lists `ip`
    fn endpoint_deleted(&self, slice_key: &NamespacedName, ip: &str);
}

/// Downstream push sink
pub trait XdsUpdater: Send + Sync {
    /// Incremental membership update for one hostname from one shard
    fn eds_update(
        &self,
        shard: &ShardKey,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Arc<Endpoint>>,
    );

    /// Full or partial reconfiguration
    fn config_update(&self, request: PushRequest);
}

/// Endpoints of non-cluster workloads selected by a cluster service
pub trait WorkloadInstanceSource: Send + Sync {
    fn collect_workload_instance_endpoints(&self, service: &Service) -> Vec<Arc<Endpoint>>;
}

/// Per-proxy status metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStatusMetric {
    /// Endpoint referenced a pod that is not yet known
    EndpointNoPod,
    /// Endpoint co-located with a proxy is not ready
    ProxyStatusEndpointNotReady,
}

/// Sink for per-proxy status metrics
pub trait ProxyStatusMetrics: Send + Sync {
    fn add_metric(&self, metric: ProxyStatusMetric, key: &str, proxy_id: &str, data: &str);
}
