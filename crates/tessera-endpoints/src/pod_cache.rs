//! In-memory pod metadata cache
//!
//! Pods are indexed by key and by IP. Slices whose members reference a pod that
//! has not arrived yet register interest by IP; the registration is drained
//! when a pod with that IP is upserted, and the slice keys are handed back so
//! the controller can replay them.

use crate::traits::PodResolver;
use k8s_openapi::api::core::v1::Pod;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_core::NamespacedName;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PodIndex {
    by_key: HashMap<NamespacedName, Arc<Pod>>,
    by_ip: HashMap<String, HashSet<NamespacedName>>,
    /// Slices to replay once a pod with the IP arrives
    need_resync: HashMap<String, HashSet<NamespacedName>>,
}

/// Thread-safe pod cache implementing [`PodResolver`]
#[derive(Debug, Default)]
pub struct PodCache {
    inner: RwLock<PodIndex>,
    resync_tx: Option<mpsc::UnboundedSender<NamespacedName>>,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also send drained slice keys on `tx`
    pub fn with_resync_sender(mut self, tx: mpsc::UnboundedSender<NamespacedName>) -> Self {
        self.resync_tx = Some(tx);
        self
    }

    /// Insert or replace a pod and return the slices waiting for it
    pub fn upsert(&self, pod: Pod) -> Vec<NamespacedName> {
        let Some(key) = pod_key(&pod) else {
            warn!("Ignoring pod without name or namespace");
            return Vec::new();
        };
        let ips = pod_ips(&pod);

        let resync: Vec<NamespacedName> = {
            let mut index = self.inner.write();
            index.unindex(&key);
            for ip in &ips {
                index.by_ip.entry(ip.clone()).or_default().insert(key.clone());
            }
            index.by_key.insert(key.clone(), Arc::new(pod));

            let mut drained = HashSet::new();
            for ip in &ips {
                if let Some(slices) = index.need_resync.remove(ip) {
                    drained.extend(slices);
                }
            }
            drained.into_iter().collect()
        };

        if !resync.is_empty() {
            debug!("Pod {} arrived, {} slice(s) to replay", key, resync.len());
        }
        if let Some(tx) = &self.resync_tx {
            for slice in &resync {
                if tx.send(slice.clone()).is_err() {
                    warn!("Resync channel closed, dropping replay of {}", slice);
                    break;
                }
            }
        }
        resync
    }

    /// Remove a pod from both indexes
    pub fn remove(&self, key: &NamespacedName) -> Option<Arc<Pod>> {
        self.inner.write().unindex(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_key.is_empty()
    }

    /// Number of IPs with a pending replay registration
    pub fn pending_resyncs(&self) -> usize {
        self.inner.read().need_resync.len()
    }
}

impl PodIndex {
    fn unindex(&mut self, key: &NamespacedName) -> Option<Arc<Pod>> {
        let old = self.by_key.remove(key)?;
        for ip in pod_ips(&old) {
            if let Some(keys) = self.by_ip.get_mut(&ip) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_ip.remove(&ip);
                }
            }
        }
        Some(old)
    }
}

impl PodResolver for PodCache {
    fn get_pod_by_key(&self, key: &NamespacedName) -> Option<Arc<Pod>> {
        self.inner.read().by_key.get(key).cloned()
    }

    fn get_pods_by_ip(&self, ip: &str) -> Vec<Arc<Pod>> {
        let index = self.inner.read();
        index
            .by_ip
            .get(ip)
            .map(|keys| {
                let mut keys: Vec<&NamespacedName> = keys.iter().collect();
                keys.sort();
                keys.into_iter()
                    .filter_map(|k| index.by_key.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn queue_endpoint_event_on_pod_arrival(&self, slice_key: &NamespacedName, ip: &str) {
        self.inner
            .write()
            .need_resync
            .entry(ip.to_string())
            .or_default()
            .insert(slice_key.clone());
    }

    fn endpoint_deleted(&self, slice_key: &NamespacedName, ip: &str) {
        let mut index = self.inner.write();
        if let Some(slices) = index.need_resync.get_mut(ip) {
            slices.remove(slice_key);
            if slices.is_empty() {
                index.need_resync.remove(ip);
            }
        }
    }
}

fn pod_key(pod: &Pod) -> Option<NamespacedName> {
    Some(NamespacedName::new(
        pod.metadata.namespace.clone()?,
        pod.metadata.name.clone()?,
    ))
}

/// Primary IP plus any dual-stack IPs
fn pod_ips(pod: &Pod) -> Vec<String> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let mut ips: Vec<String> = status.pod_ip.iter().cloned().collect();
    for ip in status.pod_ips.iter().flatten() {
        if !ips.contains(&ip.ip) {
            ips.push(ip.ip.clone());
        }
    }
    ips
}
