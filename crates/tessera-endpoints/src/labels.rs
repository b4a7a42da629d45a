//! Slice label conventions

use k8s_openapi::api::discovery::v1::EndpointSlice;
use tessera_core::NamespacedName;

/// Label naming the cluster service that owns a slice
pub const LABEL_SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Label set on slices managed by multi-cluster services
pub const LABEL_MULTICLUSTER_SERVICE_NAME: &str = "multicluster.kubernetes.io/service-name";

/// Slices managed by multi-cluster services are reconciled elsewhere
pub fn is_multicluster_slice(slice: &EndpointSlice) -> bool {
    slice
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(LABEL_MULTICLUSTER_SERVICE_NAME))
}

/// Name of the owning cluster service, empty when the label is absent
pub fn service_name_for_slice(slice: &EndpointSlice) -> &str {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_SERVICE_NAME))
        .map(String::as_str)
        .unwrap_or("")
}

/// Identity of the owning cluster service
pub fn service_namespaced_name(slice: &EndpointSlice) -> NamespacedName {
    NamespacedName::new(
        slice.metadata.namespace.clone().unwrap_or_default(),
        service_name_for_slice(slice),
    )
}

/// True when the slice belongs to `service_name` and is not a multi-cluster slice
pub fn matches_service(slice: &EndpointSlice, service_name: &str) -> bool {
    !is_multicluster_slice(slice) && service_name_for_slice(slice) == service_name
}
