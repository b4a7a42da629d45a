//! Endpoint cache keyed by hostname and slice name
//!
//! Each slice owns the complete list of endpoints produced by its most recent
//! processing. Reads union every slice of a hostname and drop duplicate
//! `(address, port name)` pairs. An endpoint moving between slices is listed by
//! both for a while; every slice's contribution is fresh, so which duplicate
//! survives is not significant.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_core::{Endpoint, Hostname};

/// Endpoints per hostname per slice.
///
/// This is the unlocked view of the cache, reached through
/// [`EndpointSliceCache::read`] or [`EndpointSliceCache::write`] by callers
/// that batch several steps under one lock.
#[derive(Debug, Default)]
pub struct EndpointsByHost {
    by_host: HashMap<Hostname, HashMap<String, Vec<Arc<Endpoint>>>>,
}

impl EndpointsByHost {
    /// Replace the contribution of `slice`. Empty `endpoints` removes it.
    pub fn update(&mut self, hostname: &Hostname, slice: &str, endpoints: Vec<Arc<Endpoint>>) {
        if endpoints.is_empty() {
            self.delete(hostname, slice);
            return;
        }
        // Always overwrite: the latest update of a slice is authoritative.
        self.by_host
            .entry(hostname.clone())
            .or_default()
            .insert(slice.to_string(), endpoints);
    }

    /// Remove the contribution of `slice`, and the hostname once no slice is left
    pub fn delete(&mut self, hostname: &Hostname, slice: &str) {
        if let Some(slices) = self.by_host.get_mut(hostname) {
            slices.remove(slice);
            if slices.is_empty() {
                self.by_host.remove(hostname);
            }
        }
    }

    /// Deduplicated union of every slice's endpoints, in no particular order
    pub fn get(&self, hostname: &Hostname) -> Vec<Arc<Endpoint>> {
        let Some(slices) = self.by_host.get(hostname) else {
            return Vec::new();
        };

        let mut found = HashSet::new();
        let mut endpoints = Vec::new();
        for ep in slices.values().flatten() {
            if found.insert(ep.key()) {
                endpoints.push(Arc::clone(ep));
            }
        }
        endpoints
    }

    pub fn has(&self, hostname: &Hostname) -> bool {
        self.by_host.contains_key(hostname)
    }

    /// Number of hostnames with at least one contributing slice
    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Names of the slices contributing to a hostname
    pub fn slices(&self, hostname: &Hostname) -> Vec<String> {
        self.by_host
            .get(hostname)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Thread-safe endpoint cache guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct EndpointSliceCache {
    inner: RwLock<EndpointsByHost>,
}

impl EndpointSliceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, hostname: &Hostname, slice: &str, endpoints: Vec<Arc<Endpoint>>) {
        self.inner.write().update(hostname, slice, endpoints);
    }

    pub fn delete(&self, hostname: &Hostname, slice: &str) {
        self.inner.write().delete(hostname, slice);
    }

    pub fn get(&self, hostname: &Hostname) -> Vec<Arc<Endpoint>> {
        self.inner.read().get(hostname)
    }

    pub fn has(&self, hostname: &Hostname) -> bool {
        self.inner.read().has(hostname)
    }

    /// Shared access for a sequence of reads
    pub fn read(&self) -> RwLockReadGuard<'_, EndpointsByHost> {
        self.inner.read()
    }

    /// Exclusive access for a sequence of reads and writes
    pub fn write(&self) -> RwLockWriteGuard<'_, EndpointsByHost> {
        self.inner.write()
    }
}
