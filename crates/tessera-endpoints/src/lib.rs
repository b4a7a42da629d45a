// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod cache;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod mock;
pub mod pod_cache;
pub mod push;
pub mod traits;

// Re-export primary types
pub use cache::{EndpointSliceCache, EndpointsByHost};
pub use controller::{EndpointSliceController, EndpointSliceControllerConfig};
pub use error::{EndpointsError, Result};
pub use metrics::ControllerMetrics;
pub use pod_cache::PodCache;
pub use traits::{
    PodResolver, ProxyStatusMetric, ProxyStatusMetrics, ServiceRegistry, SliceLister,
    WorkloadInstanceSource, XdsUpdater,
};

// Re-export in-memory collaborators
pub use mock::{
    EdsUpdate, MemoryServiceRegistry, RecordingProxyMetrics, RecordingXdsUpdater, SliceStore,
};
