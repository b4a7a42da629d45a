//! Internal service and endpoint model shared by the registry and the push sink

use crate::types::{ConfigKey, Hostname};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Health of an endpoint as seen by traffic configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Healthy,
    Unhealthy,
    /// Not ready, but still serving existing sessions. Only produced when
    /// persistent sessions are enabled for the owning service.
    Draining,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Draining => "draining",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Controls which proxies may discover an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiscoverabilityPolicy {
    #[default]
    AlwaysDiscoverable,
    /// Only proxies in the endpoint's own cluster may see it
    ClusterLocal,
}

/// Application protocol of a service port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Http2,
    Grpc,
    GrpcWeb,
    Https,
    Tls,
    Tcp,
    Udp,
    Unsupported,
}

impl Protocol {
    /// Parse a protocol from an `appProtocol` value or a port-name prefix.
    ///
    /// `http-web` and `http` both resolve to `Http`, names starting with `grpc-web`
    /// resolve to `GrpcWeb`; unknown values are `Unsupported`.
    pub fn parse(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("grpc-web") {
            return Protocol::GrpcWeb;
        }
        match lower.split('-').next().unwrap_or_default() {
            "http" => Protocol::Http,
            "http2" | "h2c" => Protocol::Http2,
            "grpc" => Protocol::Grpc,
            "grpc_web" | "grpcweb" => Protocol::GrpcWeb,
            "https" => Protocol::Https,
            "tls" => Protocol::Tls,
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => Protocol::Unsupported,
        }
    }

    /// HTTP-family protocols need no per-endpoint listener
    pub fn is_http(&self) -> bool {
        matches!(
            self,
            Protocol::Http | Protocol::Http2 | Protocol::Grpc | Protocol::GrpcWeb
        )
    }
}

/// Visibility of a logical service to consuming namespaces
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
    None,
    Namespace(String),
}

impl Visibility {
    /// Parse an exportTo entry ("*", ".", "~" or a namespace)
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "*" => Visibility::Public,
            "." => Visibility::Private,
            "~" => Visibility::None,
            ns => Visibility::Namespace(ns.to_string()),
        }
    }
}

/// A named port of a logical service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Attributes of a logical service used for visibility and policy decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttributes {
    /// Name of the owning cluster service
    pub name: String,
    /// Namespace of the owning cluster service
    pub namespace: String,
    /// Labels of the owning cluster service
    pub labels: BTreeMap<String, String>,
    /// Namespaces the service is exported to. Empty means public.
    pub export_to: HashSet<Visibility>,
}

impl ServiceAttributes {
    /// A service is exported unless its export set contains `Visibility::None`
    pub fn is_exported(&self) -> bool {
        !self.export_to.contains(&Visibility::None)
    }
}

/// Logical service descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub hostname: Hostname,
    pub ports: Vec<ServicePort>,
    pub attributes: ServiceAttributes,
    /// True when the cluster service has no virtual IP
    pub headless: bool,
}

impl Service {
    /// Look up a port by name
    pub fn port(&self, name: &str) -> Option<&ServicePort> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// True when every port speaks an HTTP-family protocol
    pub fn is_pure_http(&self) -> bool {
        self.ports.iter().all(|p| p.protocol.is_http())
    }
}

/// Locality of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    /// region/zone/subzone
    pub label: String,
    pub cluster_id: String,
}

/// The normalized unit of membership: one member address x one slice port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    /// Name of the service port this endpoint serves (may be empty)
    pub service_port_name: String,
    /// Target port number on the endpoint (zero when unset)
    pub endpoint_port: u32,
    pub health_status: HealthStatus,
    pub discoverability_policy: DiscoverabilityPolicy,
    pub labels: BTreeMap<String, String>,
    pub service_account: String,
    pub locality: Locality,
    pub namespace: String,
    pub workload_name: String,
    pub node_name: String,
    pub hostname: String,
    pub subdomain: String,
    pub tls_mode: String,
}

/// Dedup identity of an endpoint within a hostname
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub address: String,
    pub port: String,
}

impl Endpoint {
    /// Key used to deduplicate endpoints across slices
    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            address: self.address.clone(),
            port: self.service_port_name.clone(),
        }
    }
}

/// A proxy asking for its co-located service targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxy {
    pub id: String,
    pub namespace: String,
    pub ip_addresses: Vec<String>,
}

impl Proxy {
    pub fn has_address(&self, address: &str) -> bool {
        self.ip_addresses.iter().any(|ip| ip == address)
    }
}

/// Service port bound to the port the endpoint actually listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstancePort {
    pub service_port: ServicePort,
    pub target_port: u32,
}

/// A service x port binding served by a proxy
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub service: Arc<Service>,
    pub port: ServiceInstancePort,
}

/// Why a reconfiguration was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerReason {
    HeadlessEndpointUpdate,
}

/// Request for a full or partial reconfiguration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Full reconfiguration of listeners and routes
    pub full: bool,
    pub configs_updated: HashSet<ConfigKey>,
    pub reason: TriggerReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, protocol: Protocol) -> ServicePort {
        ServicePort {
            name: name.to_string(),
            port: 80,
            protocol,
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("http"), Protocol::Http);
        assert_eq!(Protocol::parse("http-web"), Protocol::Http);
        assert_eq!(Protocol::parse("GRPC"), Protocol::Grpc);
        assert_eq!(Protocol::parse("grpc-web"), Protocol::GrpcWeb);
        assert_eq!(Protocol::parse("grpc-web-ui"), Protocol::GrpcWeb);
        assert_eq!(Protocol::parse("grpc-api"), Protocol::Grpc);
        assert_eq!(Protocol::parse("tcp-db"), Protocol::Tcp);
        assert_eq!(Protocol::parse("mongo"), Protocol::Unsupported);
        assert_eq!(Protocol::parse(""), Protocol::Unsupported);
    }

    #[test]
    fn test_protocol_is_http() {
        assert!(Protocol::Http.is_http());
        assert!(Protocol::Grpc.is_http());
        assert!(!Protocol::Https.is_http());
        assert!(!Protocol::Tcp.is_http());
    }

    #[test]
    fn test_service_pure_http() {
        let mut svc = Service {
            hostname: Hostname::from("foo.ns.svc.cluster.local"),
            ports: vec![port("http", Protocol::Http), port("grpc", Protocol::Grpc)],
            attributes: ServiceAttributes::default(),
            headless: false,
        };
        assert!(svc.is_pure_http());
        assert!(svc.port("grpc").is_some());
        assert!(svc.port("tcp").is_none());

        svc.ports.push(port("tcp", Protocol::Tcp));
        assert!(!svc.is_pure_http());
    }

    #[test]
    fn test_visibility_export() {
        let mut attrs = ServiceAttributes::default();
        assert!(attrs.is_exported());

        attrs.export_to.insert(Visibility::parse("~"));
        assert!(!attrs.is_exported());

        assert_eq!(
            Visibility::parse("istio-system"),
            Visibility::Namespace("istio-system".to_string())
        );
    }

    #[test]
    fn test_endpoint_key() {
        let ep = Endpoint {
            address: "10.0.0.1".to_string(),
            service_port_name: "http".to_string(),
            endpoint_port: 8080,
            ..Default::default()
        };
        let other = Endpoint {
            endpoint_port: 9090,
            ..ep.clone()
        };
        assert_eq!(ep.key(), other.key());
    }
}
