use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{
    ClusterId, Endpoint, EndpointSlice, KubeService, Pod, Protocol, Proxy, Service,
};
use tessera_endpoints::{
    ControllerMetrics, EndpointSliceController, EndpointSliceControllerConfig,
    MemoryServiceRegistry, PodCache, RecordingProxyMetrics, RecordingXdsUpdater, SliceStore,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "tessera", about = "Tessera endpoint slice aggregation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a manifest and print the membership of every hostname
    Replay {
        #[command(flatten)]
        controller: ControllerArgs,
    },
    /// Replay a manifest and print the service targets of a proxy
    Targets {
        #[command(flatten)]
        controller: ControllerArgs,
        /// Proxy IP address (repeatable)
        #[arg(long = "proxy-ip", required = true)]
        proxy_ips: Vec<String>,
        /// Namespace of the proxy
        #[arg(long, default_value = "default")]
        namespace: String,
        /// Proxy identifier used in status metrics
        #[arg(long, default_value = "sidecar")]
        proxy_id: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// YAML manifest with services, pods and endpointSlices
    #[arg(long)]
    manifest: PathBuf,
    /// DNS suffix of service hostnames
    #[arg(long, default_value = "cluster.local", env = "TESSERA_DOMAIN_SUFFIX")]
    domain_suffix: String,
    /// Cluster observed by the controller
    #[arg(long, default_value = "Kubernetes", env = "TESSERA_CLUSTER_ID")]
    cluster_id: String,
    /// Service label that enables draining of not-ready endpoints
    #[arg(long)]
    persistent_session_label: Option<String>,
    /// Headless service support
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_headless_service: bool,
    /// Merge workload entries selected by cluster services
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_workload_entries: bool,
    /// Print controller metrics to stderr when done
    #[arg(long)]
    metrics: bool,
}

impl ControllerArgs {
    fn config(&self) -> EndpointSliceControllerConfig {
        EndpointSliceControllerConfig {
            cluster_id: ClusterId::from(self.cluster_id.as_str()),
            persistent_session_label: self.persistent_session_label.clone(),
            enable_headless_service: self.enable_headless_service,
            enable_k8s_service_select_workload_entries: self.enable_workload_entries,
        }
    }
}

/// Cluster objects to replay
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Manifest {
    services: Vec<KubeService>,
    pods: Vec<Pod>,
    endpoint_slices: Vec<EndpointSlice>,
}

/// Controller after a manifest has been replayed through it
struct Replayed {
    controller: Arc<EndpointSliceController>,
    services: Vec<Arc<Service>>,
    metrics: ControllerMetrics,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct TargetView {
    hostname: String,
    port_name: String,
    port: u16,
    protocol: Protocol,
    target_port: u32,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { controller } => run_replay(&controller).await,
        Commands::Targets {
            controller,
            proxy_ips,
            namespace,
            proxy_id,
        } => run_targets(&controller, proxy_ips, namespace, proxy_id).await,
    }
}

/// Print per-hostname membership as JSON
async fn run_replay(args: &ControllerArgs) -> miette::Result<()> {
    let manifest = load_manifest(&args.manifest)?;
    let replayed = replay(manifest, args).await?;

    println!("{}", tessera_core::to_json_pretty(&membership(&replayed))?);
    print_metrics(args, &replayed)
}

/// Print the service targets of a proxy as JSON
async fn run_targets(
    args: &ControllerArgs,
    proxy_ips: Vec<String>,
    namespace: String,
    proxy_id: String,
) -> miette::Result<()> {
    let manifest = load_manifest(&args.manifest)?;
    let replayed = replay(manifest, args).await?;

    let proxy = Proxy {
        id: proxy_id,
        namespace,
        ip_addresses: proxy_ips,
    };
    println!(
        "{}",
        tessera_core::to_json_pretty(&service_targets(&replayed, &proxy))?
    );
    print_metrics(args, &replayed)
}

fn load_manifest(path: &Path) -> miette::Result<Manifest> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read manifest '{}': {}", path.display(), e))?;
    let manifest: Manifest = tessera_core::from_yaml(&data)?;
    debug!(
        "Loaded manifest with {} service(s), {} pod(s), {} endpoint slice(s)",
        manifest.services.len(),
        manifest.pods.len(),
        manifest.endpoint_slices.len()
    );
    Ok(manifest)
}

/// Feed a manifest through a controller backed by in-memory collaborators.
///
/// Slices are processed before pods, so members referencing a pod are
/// resolved through the pod arrival replay path.
async fn replay(manifest: Manifest, args: &ControllerArgs) -> miette::Result<Replayed> {
    let registry = Arc::new(MemoryServiceRegistry::new());
    let mut services = Vec::new();
    for svc in &manifest.services {
        services.push(registry.insert_kube_service(svc, &args.domain_suffix)?);
    }

    let slices = Arc::new(SliceStore::new());
    for slice in manifest.endpoint_slices {
        slices.upsert(slice)?;
    }

    let pods = Arc::new(PodCache::new());
    let metrics = ControllerMetrics::new()?;
    let controller = Arc::new(
        EndpointSliceController::new(
            args.config(),
            slices.clone(),
            registry.clone(),
            pods.clone(),
            Arc::new(RecordingXdsUpdater::new()),
        )
        .with_workload_instances(registry)
        .with_proxy_metrics(Arc::new(RecordingProxyMetrics::new()))
        .with_metrics(metrics.clone()),
    );

    for namespace in slices.namespaces() {
        if let Err(e) = controller.initialize_namespace(&namespace, true) {
            warn!("Namespace {} initialized with errors: {}", namespace, e);
        }
    }

    let (events_tx, events_rx) = mpsc::channel(1);
    let (resync_tx, resync_rx) = mpsc::unbounded_channel();
    drop(events_tx);

    let token = CancellationToken::new();
    let runner = {
        let controller = controller.clone();
        let token = token.clone();
        tokio::spawn(async move { controller.run(events_rx, resync_rx, token).await })
    };

    for pod in manifest.pods {
        for slice in pods.upsert(pod) {
            resync_tx
                .send(slice)
                .map_err(|e| miette::miette!("Controller stopped before replay: {}", e))?;
        }
    }
    drop(resync_tx);

    runner
        .await
        .map_err(|e| miette::miette!("Controller task failed: {}", e))??;
    info!(
        "Replayed {} service(s) in shard {}",
        services.len(),
        controller.shard()
    );

    Ok(Replayed {
        controller,
        services,
        metrics,
    })
}

/// Membership of every known hostname, sorted by address and port name
fn membership(replayed: &Replayed) -> BTreeMap<String, Vec<Endpoint>> {
    let cache = replayed.controller.cache().read();
    replayed
        .services
        .iter()
        .filter(|svc| cache.has(&svc.hostname))
        .map(|svc| {
            let mut endpoints: Vec<Endpoint> = cache
                .get(&svc.hostname)
                .iter()
                .map(|e| e.as_ref().clone())
                .collect();
            endpoints.sort_by(|a, b| {
                (&a.address, &a.service_port_name).cmp(&(&b.address, &b.service_port_name))
            });
            (svc.hostname.to_string(), endpoints)
        })
        .collect()
}

fn service_targets(replayed: &Replayed, proxy: &Proxy) -> Vec<TargetView> {
    // a service listed by several slices yields the same target per slice
    let mut seen: BTreeSet<(String, String, u32)> = BTreeSet::new();
    replayed
        .controller
        .get_proxy_service_targets(proxy)
        .into_iter()
        .filter(|t| {
            seen.insert((
                t.service.hostname.to_string(),
                t.port.service_port.name.clone(),
                t.port.target_port,
            ))
        })
        .map(|t| TargetView {
            hostname: t.service.hostname.to_string(),
            port_name: t.port.service_port.name.clone(),
            port: t.port.service_port.port,
            protocol: t.port.service_port.protocol,
            target_port: t.port.target_port,
        })
        .collect()
}

fn print_metrics(args: &ControllerArgs, replayed: &Replayed) -> miette::Result<()> {
    if args.metrics {
        eprint!("{}", replayed.metrics.encode_text()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
services:
  - apiVersion: v1
    kind: Service
    metadata:
      name: reviews
      namespace: default
    spec:
      clusterIP: 10.96.0.20
      ports:
        - name: http
          port: 9080
pods:
  - apiVersion: v1
    kind: Pod
    metadata:
      name: reviews-1
      namespace: default
    spec:
      serviceAccountName: reviews
      containers:
        - name: reviews
          image: reviews:v1
    status:
      podIP: 10.0.0.1
endpointSlices:
  - apiVersion: discovery.k8s.io/v1
    kind: EndpointSlice
    metadata:
      name: reviews-abc
      namespace: default
      labels:
        kubernetes.io/service-name: reviews
    addressType: IPv4
    endpoints:
      - addresses: ["10.0.0.1"]
        conditions:
          ready: true
        targetRef:
          kind: Pod
          name: reviews-1
          namespace: default
      - addresses: ["10.0.0.2"]
        conditions:
          ready: false
    ports:
      - name: http
        port: 8080
  - apiVersion: discovery.k8s.io/v1
    kind: EndpointSlice
    metadata:
      name: reviews-def
      namespace: default
      labels:
        kubernetes.io/service-name: reviews
    addressType: IPv4
    endpoints:
      - addresses: ["10.0.0.2"]
        conditions:
          ready: false
    ports:
      - name: http
        port: 8080
"#;

    fn args(manifest: PathBuf) -> ControllerArgs {
        ControllerArgs {
            manifest,
            domain_suffix: "cluster.local".to_string(),
            cluster_id: "Kubernetes".to_string(),
            persistent_session_label: None,
            enable_headless_service: true,
            enable_workload_entries: true,
            metrics: false,
        }
    }

    fn write_manifest() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "tessera",
            "replay",
            "--manifest",
            "m.yaml",
            "--enable-headless-service",
            "false",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay { controller } => {
                assert!(!controller.enable_headless_service);
                assert!(controller.enable_workload_entries);
                assert_eq!(controller.config().cluster_id, ClusterId::default());
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_load_manifest() {
        let file = write_manifest();
        let manifest = load_manifest(file.path()).unwrap();
        assert_eq!(manifest.services.len(), 1);
        assert_eq!(manifest.pods.len(), 1);
        assert_eq!(manifest.endpoint_slices.len(), 2);
    }

    #[test]
    fn test_load_missing_manifest() {
        assert!(load_manifest(Path::new("/nonexistent/manifest.yaml")).is_err());
    }

    #[tokio::test]
    async fn test_replay_membership() {
        let file = write_manifest();
        let args = args(file.path().to_path_buf());
        let replayed = replay(load_manifest(file.path()).unwrap(), &args)
            .await
            .unwrap();

        let members = membership(&replayed);
        let eps = &members["reviews.default.svc.cluster.local"];
        // 10.0.0.2 is listed by both slices
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].address, "10.0.0.1");
        assert_eq!(eps[0].service_account, "reviews");
        assert_eq!(eps[1].address, "10.0.0.2");
        assert_eq!(eps[1].health_status, tessera_core::HealthStatus::Unhealthy);

        // the pod arrived after its slice
        assert_eq!(replayed.metrics.endpoints_without_pods(), 1);
    }

    #[tokio::test]
    async fn test_replay_service_targets() {
        let file = write_manifest();
        let args = args(file.path().to_path_buf());
        let replayed = replay(load_manifest(file.path()).unwrap(), &args)
            .await
            .unwrap();

        let proxy = Proxy {
            id: "reviews-1.default".to_string(),
            namespace: "default".to_string(),
            ip_addresses: vec!["10.0.0.1".to_string()],
        };
        assert_eq!(
            service_targets(&replayed, &proxy),
            vec![TargetView {
                hostname: "reviews.default.svc.cluster.local".to_string(),
                port_name: "http".to_string(),
                port: 9080,
                protocol: Protocol::Http,
                target_port: 8080,
            }]
        );
    }
}
