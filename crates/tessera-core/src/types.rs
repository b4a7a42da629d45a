use serde::{Deserialize, Serialize};
use std::fmt;

/// Hostname of a logical service (e.g., "reviews.default.svc.cluster.local")
///
/// The endpoint cache is keyed by hostname; many slices may map to one hostname.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(pub String);

impl Hostname {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self(hostname.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Hostname {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Hostname {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// NamespacedName identifies a namespaced cluster object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NamespacedName {
    /// Namespace of the object
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl NamespacedName {
    /// Create a new NamespacedName
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifier of the cluster a registry observes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl Default for ClusterId {
    fn default() -> Self {
        Self("Kubernetes".to_string())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source registry of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    Kubernetes,
    External,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Kubernetes => write!(f, "Kubernetes"),
            ProviderId::External => write!(f, "External"),
        }
    }
}

/// ShardKey identifies the controller instance that produced a push.
///
/// The push sink merges memberships from several shards of the same hostname,
/// so the key must be stable for the lifetime of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub cluster: ClusterId,
    pub provider: ProviderId,
}

impl ShardKey {
    /// Shard key for a Kubernetes registry observing `cluster`
    pub fn kubernetes(cluster: ClusterId) -> Self {
        Self {
            cluster,
            provider: ProviderId::Kubernetes,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.cluster)
    }
}

/// Kind of a changed configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigKind {
    ServiceEntry,
}

/// ConfigKey identifies a changed logical service in a reconfiguration request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub kind: ConfigKind,
    pub name: String,
    pub namespace: String,
}

impl ConfigKey {
    /// ConfigKey for a logical service hostname
    pub fn service_entry(hostname: &Hostname, namespace: impl Into<String>) -> Self {
        Self {
            kind: ConfigKind::ServiceEntry,
            name: hostname.to_string(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}/{}", self.kind, self.namespace, self.name)
    }
}
