use crate::cache::EndpointSliceCache;
use crate::endpoint::{
    endpoint_health_status, expects_pod, get_pod, slice_port, EndpointBuilder, ADDRESS_TYPE_FQDN,
};
use crate::error::{EndpointsError, Result};
use crate::labels::{is_multicluster_slice, service_namespaced_name};
use crate::metrics::ControllerMetrics;
use crate::push::{config_update_for, EdsPush};
use crate::traits::{
    PodResolver, ProxyStatusMetric, ProxyStatusMetrics, ServiceRegistry, SliceLister,
    WorkloadInstanceSource, XdsUpdater,
};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use std::sync::Arc;
use tessera_core::{
    ClusterId, Endpoint, EventKind, HealthStatus, Hostname, NamespacedName, Proxy,
    ServiceInstancePort, ServiceTarget, ShardKey, SliceEvent,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the endpoint slice controller
#[derive(Debug, Clone)]
pub struct EndpointSliceControllerConfig {
    /// Cluster observed by this controller; part of the push shard identity
    pub cluster_id: ClusterId,
    /// Service label enabling draining of not-ready endpoints
    pub persistent_session_label: Option<String>,
    /// Headless services get per-endpoint listeners, so HTTP-only services
    /// still need a full push on membership change
    pub enable_headless_service: bool,
    /// Merge workload entries selected by cluster services into pushes
    pub enable_k8s_service_select_workload_entries: bool,
}

impl Default for EndpointSliceControllerConfig {
    fn default() -> Self {
        Self {
            cluster_id: ClusterId::default(),
            persistent_session_label: None,
            enable_headless_service: true,
            enable_k8s_service_select_workload_entries: true,
        }
    }
}

/// Endpoint slice controller that folds slice events into per-hostname
/// memberships and pushes them downstream
pub struct EndpointSliceController {
    config: EndpointSliceControllerConfig,
    shard: ShardKey,
    cache: EndpointSliceCache,
    slices: Arc<dyn SliceLister>,
    services: Arc<dyn ServiceRegistry>,
    pods: Arc<dyn PodResolver>,
    xds: Arc<dyn XdsUpdater>,
    workload_instances: Option<Arc<dyn WorkloadInstanceSource>>,
    proxy_metrics: Option<Arc<dyn ProxyStatusMetrics>>,
    metrics: Option<ControllerMetrics>,
}

impl EndpointSliceController {
    pub fn new(
        config: EndpointSliceControllerConfig,
        slices: Arc<dyn SliceLister>,
        services: Arc<dyn ServiceRegistry>,
        pods: Arc<dyn PodResolver>,
        xds: Arc<dyn XdsUpdater>,
    ) -> Self {
        Self {
            shard: ShardKey::kubernetes(config.cluster_id.clone()),
            config,
            cache: EndpointSliceCache::new(),
            slices,
            services,
            pods,
            xds,
            workload_instances: None,
            proxy_metrics: None,
            metrics: None,
        }
    }

    pub fn with_workload_instances(mut self, source: Arc<dyn WorkloadInstanceSource>) -> Self {
        self.workload_instances = Some(source);
        self
    }

    pub fn with_proxy_metrics(mut self, metrics: Arc<dyn ProxyStatusMetrics>) -> Self {
        self.proxy_metrics = Some(metrics);
        self
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &EndpointSliceCache {
        &self.cache
    }

    pub fn shard(&self) -> &ShardKey {
        &self.shard
    }

    /// Apply slice events and pod arrival replays until `token` is cancelled
    /// or both channels close.
    ///
    /// Per-event failures are logged and do not stop the loop.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<SliceEvent>,
        mut resyncs: mpsc::UnboundedReceiver<NamespacedName>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Starting endpoint slice controller for shard {}", self.shard);

        let mut events_open = true;
        let mut resyncs_open = true;
        while events_open || resyncs_open {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Endpoint slice controller shutting down");
                    return Ok(());
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(e) = self.on_event(&event) {
                            error!("Failed to process {} event for endpoint slice: {}", event.kind, e);
                        }
                    }
                    None => events_open = false,
                },
                key = resyncs.recv(), if resyncs_open => match key {
                    Some(key) => {
                        if let Err(e) = self.pod_arrived(&key.name, &key.namespace) {
                            error!("Failed to replay endpoint slice {}: {}", key, e);
                        }
                    }
                    None => resyncs_open = false,
                },
            }
        }

        info!("Endpoint slice controller channels closed");
        Ok(())
    }

    /// Handle one slice lifecycle event
    pub fn on_event(&self, event: &SliceEvent) -> Result<()> {
        let slice = &event.slice;
        let key = slice_key(slice)?;
        if is_multicluster_slice(slice) {
            debug!("Ignoring multi-cluster endpoint slice {}", key);
            return Ok(());
        }

        let svc_key = service_namespaced_name(slice);
        let hostnames = self.services.hostnames_for_namespaced_name(&svc_key);
        debug!(
            "Handling {} for endpoint slice {} of {} ({} hostname(s))",
            event.kind,
            key,
            svc_key,
            hostnames.len()
        );

        match event.kind {
            EventKind::Delete => self.delete_slice(&key, slice, &hostnames),
            EventKind::Add | EventKind::Update => {
                for hostname in &hostnames {
                    self.update_endpoint_cache_for_slice(hostname, slice, &key);
                }
            }
        }

        self.push_eds(&hostnames, &key.namespace);
        self.request_config_update(&hostnames);
        Ok(())
    }

    /// Replay a slice after the pod one of its members referenced arrived
    pub fn pod_arrived(&self, name: &str, namespace: &str) -> Result<()> {
        match self.slices.get(name, namespace) {
            Some(slice) => self.on_event(&SliceEvent::added(slice)),
            None => {
                debug!("Endpoint slice {}/{} is gone, nothing to replay", namespace, name);
                Ok(())
            }
        }
    }

    /// Process every slice of a namespace as added.
    ///
    /// All slices are attempted; failures are returned together.
    pub fn initialize_namespace(&self, namespace: &str, filtered: bool) -> Result<()> {
        let slices = if filtered {
            self.slices.list(namespace)
        } else {
            self.slices.list_unfiltered(namespace)
        };
        debug!(
            "Initializing {} endpoint slice(s) in namespace {}",
            slices.len(),
            namespace
        );

        let errors = slices
            .into_iter()
            .filter_map(|s| self.on_event(&SliceEvent::added(s)).err())
            .collect();
        EndpointsError::aggregate(errors)
    }

    /// Process every slice of a namespace as deleted
    ///
    /// Runs when a namespace leaves the object filter, so the listing is unfiltered.
    pub fn delete_endpoints(&self, namespace: &str) -> Result<()> {
        let slices = self.slices.list_unfiltered(namespace);
        debug!(
            "Deleting {} endpoint slice(s) in namespace {}",
            slices.len(),
            namespace
        );

        let errors = slices
            .into_iter()
            .filter_map(|s| self.on_event(&SliceEvent::deleted(s)).err())
            .collect();
        EndpointsError::aggregate(errors)
    }

    /// Membership of `hostname` built from the slices of service `name`.
    ///
    /// With `update_cache` every slice is recomputed into the cache first.
    pub fn build_endpoints_with_service(
        &self,
        name: &str,
        namespace: &str,
        hostname: &Hostname,
        update_cache: bool,
    ) -> Vec<Arc<Endpoint>> {
        let slices = self.slices.list_for_service(namespace, name);
        if slices.is_empty() {
            debug!("No endpoint slices for service {}/{}", namespace, name);
            return Vec::new();
        }

        if update_cache {
            for slice in &slices {
                match slice_key(slice) {
                    Ok(key) => self.update_endpoint_cache_for_slice(hostname, slice, &key),
                    Err(e) => warn!("Skipping endpoint slice of {}/{}: {}", namespace, name, e),
                }
            }
        }
        self.cache.get(hostname)
    }

    /// Service targets backed by endpoints at one of the proxy's addresses
    pub fn get_proxy_service_targets(&self, proxy: &Proxy) -> Vec<ServiceTarget> {
        let mut out = Vec::new();
        for slice in self.slices.list(&proxy.namespace) {
            if is_multicluster_slice(&slice) {
                continue;
            }
            let services = self
                .services
                .services_for_namespaced_name(&service_namespaced_name(&slice));

            let cache = self.cache.read();
            for svc in services {
                for instance in cache.get(&svc.hostname) {
                    if !proxy.has_address(&instance.address) {
                        continue;
                    }
                    let Some(port) = svc.port(&instance.service_port_name) else {
                        warn!(
                            "Service {} has no port {}",
                            svc.hostname, instance.service_port_name
                        );
                        continue;
                    };
                    if instance.health_status == HealthStatus::Unhealthy {
                        if let Some(metrics) = &self.proxy_metrics {
                            metrics.add_metric(
                                ProxyStatusMetric::ProxyStatusEndpointNotReady,
                                &proxy.id,
                                &proxy.id,
                                "",
                            );
                        }
                    }
                    out.push(ServiceTarget {
                        service: Arc::clone(&svc),
                        port: ServiceInstancePort {
                            service_port: port.clone(),
                            target_port: instance.endpoint_port,
                        },
                    });
                }
            }
        }
        out
    }

    fn delete_slice(&self, key: &NamespacedName, slice: &EndpointSlice, hostnames: &[Hostname]) {
        for member in &slice.endpoints {
            for address in &member.addresses {
                self.pods.endpoint_deleted(key, address);
            }
        }

        let mut cache = self.cache.write();
        for hostname in hostnames {
            if cache.has(hostname) {
                cache.delete(hostname, &key.name);
            }
        }
    }

    fn update_endpoint_cache_for_slice(
        &self,
        hostname: &Hostname,
        slice: &EndpointSlice,
        key: &NamespacedName,
    ) {
        let endpoints = self.endpoints_for_slice(hostname, slice, key);
        self.cache.update(hostname, &key.name, endpoints);
    }

    fn endpoints_for_slice(
        &self,
        hostname: &Hostname,
        slice: &EndpointSlice,
        key: &NamespacedName,
    ) -> Vec<Arc<Endpoint>> {
        if slice.address_type == ADDRESS_TYPE_FQDN {
            debug!("Endpoint slice {} has FQDN addresses, skipping", key);
            return Vec::new();
        }

        let svc = self.services.get_service(hostname);
        let policy = self.services.endpoint_discoverability_policy(svc.as_deref());
        let ports = slice.ports.as_deref().unwrap_or_default();

        let mut out = Vec::new();
        for member in &slice.endpoints {
            let health = endpoint_health_status(
                self.config.persistent_session_label.as_deref(),
                svc.as_deref(),
                member.conditions.as_ref(),
            );
            for address in &member.addresses {
                let target_ref = member.target_ref.as_ref();
                let pod = get_pod(self.pods.as_ref(), address, &key.namespace, target_ref);
                if pod.is_none() && expects_pod(target_ref) {
                    // Endpoint seen before its pod; replay the slice once it arrives.
                    debug!(
                        "Pod for endpoint {} of slice {} not found, waiting for it",
                        address, key
                    );
                    self.pods.queue_endpoint_event_on_pod_arrival(key, address);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_endpoint_without_pod();
                    }
                    if let Some(metrics) = &self.proxy_metrics {
                        metrics.add_metric(
                            ProxyStatusMetric::EndpointNoPod,
                            hostname.as_str(),
                            "",
                            address,
                        );
                    }
                    continue;
                }

                let builder = EndpointBuilder::new(&self.config.cluster_id, pod.as_deref());
                for port in ports {
                    let (number, name) = slice_port(port);
                    out.push(Arc::new(builder.build(address, number, &name, policy, health)));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_endpoint_built(health);
                    }
                }
            }
        }
        out
    }

    fn push_eds(&self, hostnames: &[Hostname], namespace: &str) {
        let workload_instances = if self.config.enable_k8s_service_select_workload_entries {
            self.workload_instances.as_deref()
        } else {
            None
        };
        EdsPush {
            shard: &self.shard,
            services: self.services.as_ref(),
            xds: self.xds.as_ref(),
            workload_instances,
            metrics: self.metrics.as_ref(),
        }
        .push(&self.cache, hostnames, namespace);
    }

    fn request_config_update(&self, hostnames: &[Hostname]) {
        let services: Vec<_> = hostnames
            .iter()
            .filter_map(|h| self.services.get_service(h))
            .collect();
        let Some(request) = config_update_for(&services, self.config.enable_headless_service)
        else {
            return;
        };

        debug!(
            "Requesting {} config update for {} service(s)",
            if request.full { "full" } else { "partial" },
            request.configs_updated.len()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_config_update(request.full);
        }
        self.xds.config_update(request);
    }
}

fn slice_key(slice: &EndpointSlice) -> Result<NamespacedName> {
    let name = slice
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| EndpointsError::invalid_slice("slice has no name"))?;
    let namespace = slice.metadata.namespace.as_deref().ok_or_else(|| {
        EndpointsError::invalid_slice(format!("slice {} has no namespace", name))
    })?;
    Ok(NamespacedName::new(namespace, name))
}
