//! Tessera Core - Shared model for endpoint aggregation
//!
//! This crate provides:
//! - The internal service and endpoint model
//! - Error types with miette diagnostics
//! - Type-safe hostnames, object keys and shard identities
//! - Serialization helpers for cluster objects

pub mod error;
pub mod events;
pub mod model;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use events::{EventKind, SliceEvent};
pub use model::{
    DiscoverabilityPolicy, Endpoint, EndpointKey, HealthStatus, Locality, Protocol, Proxy,
    PushRequest, Service, ServiceAttributes, ServiceInstancePort, ServicePort, ServiceTarget,
    TriggerReason, Visibility,
};
pub use types::{ClusterId, ConfigKey, ConfigKind, Hostname, NamespacedName, ProviderId, ShardKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{ObjectReference, Pod, Service as KubeService};
pub use k8s_openapi::api::discovery::v1::EndpointSlice;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Key of a namespaced object, or an error naming the missing field
pub fn object_key(kind: &str, metadata: &ObjectMeta) -> Result<NamespacedName> {
    let name = metadata
        .name
        .as_deref()
        .ok_or_else(|| CoreError::invalid_object(kind, "missing metadata.name"))?;
    let namespace = metadata
        .namespace
        .as_deref()
        .ok_or_else(|| CoreError::invalid_object(kind, "missing metadata.namespace"))?;
    Ok(NamespacedName::new(namespace, name))
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        let mut slice = EndpointSlice::default();
        slice.metadata.name = Some("foo-abc".to_string());
        assert!(object_key("EndpointSlice", &slice.metadata).is_err());

        slice.metadata.namespace = Some("default".to_string());
        let key = object_key("EndpointSlice", &slice.metadata).unwrap();
        assert_eq!(key, NamespacedName::new("default", "foo-abc"));
    }

    #[test]
    fn test_yaml_slice() {
        let yaml = r#"
apiVersion: discovery.k8s.io/v1
kind: EndpointSlice
metadata:
  name: foo-abc
  namespace: default
  labels:
    kubernetes.io/service-name: foo
addressType: IPv4
endpoints:
  - addresses: ["10.0.0.1"]
    conditions:
      ready: true
ports:
  - name: http
    port: 80
"#;
        let slice: EndpointSlice = from_yaml(yaml).unwrap();
        assert_eq!(slice.address_type, "IPv4");
        assert_eq!(slice.endpoints.len(), 1);
        assert_eq!(slice.endpoints[0].addresses, vec!["10.0.0.1".to_string()]);

        let json = to_json_pretty(&slice).unwrap();
        assert!(json.contains("foo-abc"));
    }
}
