//! In-memory collaborators
//!
//! Used by the binary to replay manifests and by tests. None of them talk to
//! a cluster; each is a lock-protected map fed by the caller.

use crate::error::{EndpointsError, Result};
use crate::traits::{
    ProxyStatusMetric, ProxyStatusMetrics, ServiceRegistry, SliceLister, WorkloadInstanceSource,
    XdsUpdater,
};
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tessera_core::{
    object_key, DiscoverabilityPolicy, Endpoint, Hostname, NamespacedName, Protocol, PushRequest,
    Service, ServiceAttributes, ServicePort, ShardKey, Visibility,
};
use tracing::debug;

/// Annotation restricting the namespaces a service is exported to
pub const ANNOTATION_EXPORT_TO: &str = "networking.istio.io/exportTo";

/// Slice lister backed by a map
#[derive(Debug, Default)]
pub struct SliceStore {
    slices: RwLock<HashMap<NamespacedName, EndpointSlice>>,
    /// Namespaces passing the object filter; `None` admits all
    namespace_filter: Option<HashSet<String>>,
}

impl SliceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only list slices of `namespaces` through the filtered listing
    pub fn with_namespace_filter<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespace_filter = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    /// Insert or replace a slice, returning the previous version
    pub fn upsert(&self, slice: EndpointSlice) -> Result<Option<EndpointSlice>> {
        let key = object_key("EndpointSlice", &slice.metadata)?;
        Ok(self.slices.write().insert(key, slice))
    }

    pub fn remove(&self, key: &NamespacedName) -> Option<EndpointSlice> {
        self.slices.write().remove(key)
    }

    /// Namespaces holding at least one slice, sorted
    pub fn namespaces(&self) -> Vec<String> {
        self.slices
            .read()
            .keys()
            .map(|k| k.namespace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn admits(&self, namespace: &str) -> bool {
        self.namespace_filter
            .as_ref()
            .is_none_or(|f| f.contains(namespace))
    }
}

impl SliceLister for SliceStore {
    fn get(&self, name: &str, namespace: &str) -> Option<EndpointSlice> {
        self.slices
            .read()
            .get(&NamespacedName::new(namespace, name))
            .cloned()
    }

    fn list(&self, namespace: &str) -> Vec<EndpointSlice> {
        if !self.admits(namespace) {
            return Vec::new();
        }
        self.list_unfiltered(namespace)
    }

    fn list_unfiltered(&self, namespace: &str) -> Vec<EndpointSlice> {
        let slices = self.slices.read();
        let mut keys: Vec<&NamespacedName> =
            slices.keys().filter(|k| k.namespace == namespace).collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| slices.get(k).cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Services {
    by_name: HashMap<NamespacedName, Vec<Arc<Service>>>,
    by_host: HashMap<Hostname, Arc<Service>>,
    workload_instances: HashMap<Hostname, Vec<Arc<Endpoint>>>,
    cluster_local: HashSet<Hostname>,
}

/// Logical service registry backed by maps
#[derive(Debug, Default)]
pub struct MemoryServiceRegistry {
    inner: RwLock<Services>,
}

impl MemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a logical service built from the cluster service `key`
    pub fn insert(&self, key: NamespacedName, service: Arc<Service>) {
        let mut inner = self.inner.write();
        inner
            .by_host
            .insert(service.hostname.clone(), Arc::clone(&service));
        let services = inner.by_name.entry(key).or_default();
        services.retain(|s| s.hostname != service.hostname);
        services.push(service);
    }

    /// Build and register the logical service of a cluster service
    pub fn insert_kube_service(
        &self,
        svc: &KubeService,
        domain_suffix: &str,
    ) -> Result<Arc<Service>> {
        let service = Arc::new(convert_service(svc, domain_suffix)?);
        debug!(
            "Registered service {} with {} port(s)",
            service.hostname,
            service.ports.len()
        );
        self.insert(
            NamespacedName::new(
                service.attributes.namespace.clone(),
                service.attributes.name.clone(),
            ),
            Arc::clone(&service),
        );
        Ok(service)
    }

    /// Drop every logical service of a cluster service
    pub fn remove(&self, key: &NamespacedName) {
        let mut inner = self.inner.write();
        if let Some(services) = inner.by_name.remove(key) {
            for svc in services {
                inner.by_host.remove(&svc.hostname);
            }
        }
    }

    /// Add a non-cluster workload endpoint selected by `hostname`
    pub fn add_workload_instance(&self, hostname: &Hostname, endpoint: Arc<Endpoint>) {
        self.inner
            .write()
            .workload_instances
            .entry(hostname.clone())
            .or_default()
            .push(endpoint);
    }

    /// Restrict discovery of `hostname` endpoints to their own cluster
    pub fn set_cluster_local(&self, hostname: &Hostname) {
        self.inner.write().cluster_local.insert(hostname.clone());
    }
}

impl ServiceRegistry for MemoryServiceRegistry {
    fn services_for_namespaced_name(&self, name: &NamespacedName) -> Vec<Arc<Service>> {
        self.inner
            .read()
            .by_name
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn get_service(&self, hostname: &Hostname) -> Option<Arc<Service>> {
        self.inner.read().by_host.get(hostname).cloned()
    }

    fn endpoint_discoverability_policy(&self, service: Option<&Service>) -> DiscoverabilityPolicy {
        match service {
            Some(svc) if self.inner.read().cluster_local.contains(&svc.hostname) => {
                DiscoverabilityPolicy::ClusterLocal
            }
            _ => DiscoverabilityPolicy::AlwaysDiscoverable,
        }
    }
}

impl WorkloadInstanceSource for MemoryServiceRegistry {
    fn collect_workload_instance_endpoints(&self, service: &Service) -> Vec<Arc<Endpoint>> {
        self.inner
            .read()
            .workload_instances
            .get(&service.hostname)
            .cloned()
            .unwrap_or_default()
    }
}

fn convert_service(svc: &KubeService, domain_suffix: &str) -> Result<Service> {
    let key = object_key("Service", &svc.metadata)?;
    let spec = svc.spec.as_ref();

    let mut ports = Vec::new();
    for p in spec.and_then(|s| s.ports.as_ref()).into_iter().flatten() {
        let port = u16::try_from(p.port).map_err(|_| {
            EndpointsError::from(tessera_core::CoreError::invalid_object(
                "Service",
                format!("port {} of {} is out of range", p.port, key),
            ))
        })?;
        let name = p.name.clone().unwrap_or_default();
        let protocol = match p.app_protocol.as_deref().map(Protocol::parse) {
            Some(proto) if proto != Protocol::Unsupported => proto,
            _ => match Protocol::parse(&name) {
                Protocol::Unsupported if p.protocol.as_deref() == Some("UDP") => Protocol::Udp,
                Protocol::Unsupported => Protocol::Tcp,
                proto => proto,
            },
        };
        ports.push(ServicePort {
            name,
            port,
            protocol,
        });
    }

    let export_to = svc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_EXPORT_TO))
        .map(|v| {
            v.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Visibility::parse)
                .collect()
        })
        .unwrap_or_default();

    Ok(Service {
        hostname: Hostname::new(format!(
            "{}.{}.svc.{}",
            key.name, key.namespace, domain_suffix
        )),
        ports,
        attributes: ServiceAttributes {
            name: key.name,
            namespace: key.namespace,
            labels: svc.metadata.labels.clone().unwrap_or_default(),
            export_to,
        },
        headless: spec.and_then(|s| s.cluster_ip.as_deref()) == Some("None"),
    })
}

/// One recorded incremental push
#[derive(Debug, Clone)]
pub struct EdsUpdate {
    pub shard: ShardKey,
    pub hostname: Hostname,
    pub namespace: String,
    pub endpoints: Vec<Arc<Endpoint>>,
}

/// Push sink that records every request
#[derive(Debug, Default)]
pub struct RecordingXdsUpdater {
    eds: Mutex<Vec<EdsUpdate>>,
    configs: Mutex<Vec<PushRequest>>,
}

impl RecordingXdsUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eds_updates(&self) -> Vec<EdsUpdate> {
        self.eds.lock().clone()
    }

    pub fn config_updates(&self) -> Vec<PushRequest> {
        self.configs.lock().clone()
    }

    /// Most recent push for a hostname
    pub fn last_eds(&self, hostname: &Hostname) -> Option<EdsUpdate> {
        self.eds
            .lock()
            .iter()
            .rev()
            .find(|u| &u.hostname == hostname)
            .cloned()
    }

    pub fn clear(&self) {
        self.eds.lock().clear();
        self.configs.lock().clear();
    }
}

impl XdsUpdater for RecordingXdsUpdater {
    fn eds_update(
        &self,
        shard: &ShardKey,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Arc<Endpoint>>,
    ) {
        self.eds.lock().push(EdsUpdate {
            shard: shard.clone(),
            hostname: Hostname::from(hostname),
            namespace: namespace.to_string(),
            endpoints,
        });
    }

    fn config_update(&self, request: PushRequest) {
        self.configs.lock().push(request);
    }
}

/// One recorded proxy status metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMetricRecord {
    pub metric: ProxyStatusMetric,
    pub key: String,
    pub proxy_id: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct RecordingProxyMetrics {
    records: Mutex<Vec<ProxyMetricRecord>>,
}

impl RecordingProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProxyMetricRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self, metric: ProxyStatusMetric) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.metric == metric)
            .count()
    }
}

impl ProxyStatusMetrics for RecordingProxyMetrics {
    fn add_metric(&self, metric: ProxyStatusMetric, key: &str, proxy_id: &str, data: &str) {
        self.records.lock().push(ProxyMetricRecord {
            metric,
            key: key.to_string(),
            proxy_id: proxy_id.to_string(),
            data: data.to_string(),
        });
    }
}
