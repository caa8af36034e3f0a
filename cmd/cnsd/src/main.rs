use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{Router, get, post};
use clap::{Parser, crate_description, crate_version};
use cnsd_ipam::config::CnsConfig;
use cnsd_ipam::error::Error as IpamError;
use cnsd_ipam::ipconfig::IpConfigState;
use cnsd_ipam::metrics::{MetricsTransitionHook, PoolMetrics, ReconcileMetrics};
use cnsd_ipam::nc::{AcceptingProgrammer, NcCache};
use cnsd_ipam::pod::{PodInfo, PodKeyScheme};
use cnsd_ipam::pool::monitor::{PoolMonitor, PoolMonitorHandle};
use cnsd_ipam::store::IpStateStore;
use cnsd_ipam::telemetry;
use cnsd_k8s_util::client::new_client_with_metrics;
use cnsd_nnc::client::NodeNetworkConfigClient;
use cnsd_nnc::reconcile::Context;
use kube::Config;
use kube::runtime::events::{Recorder, Reporter};
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "cnsd",
    about = crate_description!(),
    version = crate_version!(),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 10090, env)]
    port: u16,

    /// Logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=debug,cnsd=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// Name of the node this service runs on; scopes the NodeNetworkConfig
    /// watch
    #[arg(long, env = "NODENAME")]
    nodename: String,

    /// Path to the JSON configuration file
    #[arg(long, env = "CNS_CONFIGURATION_PATH")]
    config_path: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    store: Arc<IpStateStore>,
    nc_cache: Arc<NcCache>,
    monitor: PoolMonitorHandle,
    scheme: PodKeyScheme,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format)
        .context("failed to initialize logging")?;
    let config = CnsConfig::load(args.config_path.as_deref())
        .context("failed to load configuration")?;

    let mut registry = Registry::default();
    let pool_metrics = PoolMetrics::new(&mut registry);
    let reconcile_metrics = ReconcileMetrics::new(&mut registry);

    let kube_config = Config::infer()
        .await
        .context("failed to infer Kubernetes configuration")?;
    let client = new_client_with_metrics(kube_config, &mut registry)
        .await
        .context("failed to build Kubernetes client")?;

    let store = Arc::new(IpStateStore::with_hooks(vec![MetricsTransitionHook::new(
        pool_metrics.clone(),
    )]));
    let nc_cache = Arc::new(NcCache::new());

    let nnc_client =
        NodeNetworkConfigClient::new(client.clone(), &config.nnc_namespace, &args.nodename);
    let (monitor, handle) = PoolMonitor::new(
        store.clone(),
        nnc_client,
        pool_metrics.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
    );

    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: "cnsd".into(),
            instance: Some(args.nodename.clone()),
        },
    );
    let ctx = Arc::new(Context::new(
        client,
        store.clone(),
        nc_cache.clone(),
        Arc::new(AcceptingProgrammer),
        handle.nnc_tx.clone(),
        recorder,
        reconcile_metrics,
    ));

    info!(msg = "starting cnsd", node = %args.nodename, port = args.port);

    let shutdown = CancellationToken::new();
    let monitor_task = monitor.run(shutdown.clone());
    let controller_task = cnsd_nnc::controller::run(ctx, args.nodename, handle.css_tx.clone());

    let state = AppState {
        registry: Arc::new(registry),
        store,
        nc_cache,
        monitor: handle,
        scheme: config.pod_key_scheme,
    };
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/debug/ipconfigs", get(debug_ipconfigs))
        .route("/debug/podcontext", get(debug_podcontext))
        .route("/debug/ipam", get(debug_ipam))
        .route("/network/requestipaddress", post(request_ip_address))
        .route("/network/releaseipaddress", post(release_ip_address))
        .with_state(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown));

    tokio::join!(monitor_task, controller_task, server).2?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    shutdown.cancel();
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut buffer = String::new();
    match prometheus_client::encoding::text::encode(&mut buffer, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {e:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if *state.monitor.started.borrow() {
        (StatusCode::OK, Json("healthy")).into_response()
    } else {
        // degraded until the first NodeNetworkConfig has been observed
        (StatusCode::SERVICE_UNAVAILABLE, Json("initializing")).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct IpConfigsQuery {
    state: Option<IpConfigState>,
}

async fn debug_ipconfigs(
    State(state): State<AppState>,
    Query(query): Query<IpConfigsQuery>,
) -> impl IntoResponse {
    match query.state {
        Some(wanted) => Json(state.store.filter(&[wanted])).into_response(),
        None => {
            let (configs, _) = state.store.snapshot();
            Json(configs).into_response()
        }
    }
}

async fn debug_podcontext(State(state): State<AppState>) -> impl IntoResponse {
    let (_, pod_index) = state.store.snapshot();
    Json(pod_index)
}

async fn debug_ipam(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.snapshot.borrow().clone())
}

/// CNI-facing request envelope for IP assignment and release.
#[derive(Debug, Deserialize)]
struct IpConfigRequest {
    #[serde(rename = "OrchestratorContext")]
    orchestrator_context: serde_json::Value,
    #[serde(rename = "InfraContainerID", default)]
    infra_container_id: String,
    #[serde(rename = "PodInterfaceID", default)]
    pod_interface_id: String,
    #[serde(rename = "Ifname", default)]
    #[allow(dead_code)]
    ifname: String,
    #[serde(rename = "DesiredIPAddress", default)]
    desired_ip_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct IpConfigResponse {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    #[serde(rename = "NCID")]
    nc_id: String,
    #[serde(rename = "GatewayIPAddress", skip_serializing_if = "Option::is_none")]
    gateway: Option<String>,
    #[serde(rename = "SubnetPrefix", skip_serializing_if = "Option::is_none")]
    subnet_prefix: Option<String>,
}

fn pod_from_request(scheme: PodKeyScheme, req: &IpConfigRequest) -> Result<PodInfo, IpamError> {
    let context = serde_json::to_vec(&req.orchestrator_context).map_err(|e| {
        IpamError::SerializationError("failed to serialize orchestrator context".to_string(), e)
    })?;
    PodInfo::from_orchestrator_context(
        scheme,
        &context,
        req.infra_container_id.clone(),
        req.pod_interface_id.clone(),
    )
}

async fn request_ip_address(
    State(state): State<AppState>,
    Json(req): Json<IpConfigRequest>,
) -> impl IntoResponse {
    let pod = match pod_from_request(state.scheme, &req) {
        Ok(pod) => pod,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match state.store.reserve(&pod, req.desired_ip_address.as_deref()) {
        Ok(record) => {
            let nc = state.nc_cache.get(&record.nc_id);
            let response = IpConfigResponse {
                ip_address: record.ip_address,
                nc_id: record.nc_id,
                gateway: nc
                    .as_ref()
                    .and_then(|nc| nc.gateway.map(|g| g.to_string())),
                subnet_prefix: nc.as_ref().map(|nc| nc.subnet_prefix.to_string()),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e @ IpamError::NoAvailableIps) => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(e @ IpamError::IpNotAvailable(_)) => {
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn release_ip_address(
    State(state): State<AppState>,
    Json(req): Json<IpConfigRequest>,
) -> impl IntoResponse {
    let pod = match pod_from_request(state.scheme, &req) {
        Ok(pod) => pod,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    // releasing an unknown pod is a success no-op so CNI DEL retries converge
    match state.store.release_by_pod(&pod.key()) {
        Some(record) => (
            StatusCode::OK,
            Json(IpConfigResponse {
                ip_address: record.ip_address,
                nc_id: record.nc_id,
                gateway: None,
                subnet_prefix: None,
            }),
        )
            .into_response(),
        None => StatusCode::OK.into_response(),
    }
}
