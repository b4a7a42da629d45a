//! Push fan-out to the downstream sink

use crate::cache::EndpointSliceCache;
use crate::metrics::ControllerMetrics;
use crate::traits::{ServiceRegistry, WorkloadInstanceSource, XdsUpdater};
use std::collections::HashSet;
use std::sync::Arc;
use tessera_core::{ConfigKey, Hostname, PushRequest, Service, ShardKey, TriggerReason};
use tracing::debug;

/// Everything needed to push the memberships of a set of hostnames
pub struct EdsPush<'a> {
    pub shard: &'a ShardKey,
    pub services: &'a dyn ServiceRegistry,
    pub xds: &'a dyn XdsUpdater,
    /// Set when workload entries selected by cluster services are merged in
    pub workload_instances: Option<&'a dyn WorkloadInstanceSource>,
    pub metrics: Option<&'a ControllerMetrics>,
}

impl EdsPush<'_> {
    /// Send the current membership of every hostname to the sink.
    ///
    /// The write lock is held across all hostnames so the sink sees one
    /// consistent snapshot.
    pub fn push(&self, cache: &EndpointSliceCache, hostnames: &[Hostname], namespace: &str) {
        let guard = cache.write();
        for hostname in hostnames {
            let mut endpoints = guard.get(hostname);
            if let Some(source) = self.workload_instances {
                match self.services.get_service(hostname) {
                    Some(svc) => {
                        endpoints.extend(source.collect_workload_instance_endpoints(&svc))
                    }
                    None => debug!(
                        "No service for {}, skipping workload entry endpoints",
                        hostname
                    ),
                }
            }

            debug!(
                "Pushing {} endpoint(s) for {} in shard {}",
                endpoints.len(),
                hostname,
                self.shard
            );
            self.xds
                .eds_update(self.shard, hostname.as_str(), namespace, endpoints);
            if let Some(metrics) = self.metrics {
                metrics.record_eds_push();
            }
        }
    }
}

/// Reconfiguration needed after the membership of `services` changed.
///
/// Only non-headless, exported services take part. The request is full unless
/// every participating port speaks HTTP and headless support is disabled.
pub fn config_update_for(
    services: &[Arc<Service>],
    enable_headless_service: bool,
) -> Option<PushRequest> {
    let mut configs_updated = HashSet::new();
    let mut only_http = true;

    for svc in services {
        if svc.headless || !svc.attributes.is_exported() {
            continue;
        }
        configs_updated.insert(ConfigKey::service_entry(
            &svc.hostname,
            svc.attributes.namespace.clone(),
        ));
        only_http &= svc.is_pure_http();
    }

    if configs_updated.is_empty() {
        return None;
    }
    Some(PushRequest {
        full: !(only_http && !enable_headless_service),
        configs_updated,
        reason: TriggerReason::HeadlessEndpointUpdate,
    })
}
