use crate::error::{EndpointsError, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tessera_core::HealthStatus;

/// Prometheus counters maintained by the endpoint slice controller
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    endpoints_without_pods: IntCounter,
    endpoints_built: IntCounterVec,
    eds_pushes: IntCounter,
    config_updates: IntCounterVec,
}

impl ControllerMetrics {
    /// Counters registered into a private registry
    pub fn new() -> Result<Self> {
        Self::register(Registry::new())
    }

    /// Counters registered into `registry`
    pub fn register(registry: Registry) -> Result<Self> {
        let endpoints_without_pods = IntCounter::new(
            "tessera_endpoints_without_pods_total",
            "Endpoints referencing a pod that was not yet known",
        )
        .map_err(metrics_error)?;
        let endpoints_built = IntCounterVec::new(
            Opts::new(
                "tessera_endpoints_built_total",
                "Internal endpoints built from slices, by health status",
            ),
            &["health"],
        )
        .map_err(metrics_error)?;
        let eds_pushes = IntCounter::new(
            "tessera_eds_pushes_total",
            "Incremental per-hostname endpoint pushes",
        )
        .map_err(metrics_error)?;
        let config_updates = IntCounterVec::new(
            Opts::new(
                "tessera_config_updates_total",
                "Reconfiguration requests sent to the push sink",
            ),
            &["full"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(endpoints_without_pods.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(endpoints_built.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(eds_pushes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(config_updates.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            endpoints_without_pods,
            endpoints_built,
            eds_pushes,
            config_updates,
        })
    }

    pub fn record_endpoint_without_pod(&self) {
        self.endpoints_without_pods.inc();
    }

    pub fn record_endpoint_built(&self, health: HealthStatus) {
        self.endpoints_built
            .with_label_values(&[health.as_str()])
            .inc();
    }

    pub fn record_eds_push(&self) {
        self.eds_pushes.inc();
    }

    pub fn record_config_update(&self, full: bool) {
        self.config_updates
            .with_label_values(&[if full { "true" } else { "false" }])
            .inc();
    }

    pub fn endpoints_without_pods(&self) -> u64 {
        self.endpoints_without_pods.get()
    }

    pub fn endpoints_built(&self, health: HealthStatus) -> u64 {
        self.endpoints_built
            .with_label_values(&[health.as_str()])
            .get()
    }

    pub fn eds_pushes(&self) -> u64 {
        self.eds_pushes.get()
    }

    pub fn config_updates(&self, full: bool) -> u64 {
        self.config_updates
            .with_label_values(&[if full { "true" } else { "false" }])
            .get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every family in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(metrics_error)?;
        String::from_utf8(buf).map_err(|e| EndpointsError::internal_error(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> EndpointsError {
    EndpointsError::internal_error(format!("Metrics registration failed: {}", e))
}
