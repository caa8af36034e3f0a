use crate::controller::DEFAULT_RECONCILE_INTERVAL;
use crate::crd::NodeNetworkConfig;
use crate::error::{Error, Result};
use crate::translate;

use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use cnsd_ipam::ipconfig::{IpConfigState, IpConfigurationStatus};
use cnsd_ipam::metrics::ReconcileMetrics;
use cnsd_ipam::nc::{CreateNetworkContainerRequest, NcCache, NetworkContainerProgrammer, ResponseCode};
use cnsd_ipam::pool::monitor::NncUpdate;
use cnsd_ipam::pool::scaler::ScalerPolicy;
use cnsd_ipam::store::IpStateStore;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};
use tokio::sync::{RwLock, mpsc};
use tokio::time::Duration;
use tracing::{debug, error, trace, warn};

/// Shared context for the NNC reconciler.
pub struct Context {
    pub client: Client,
    pub store: Arc<IpStateStore>,
    pub nc_cache: Arc<NcCache>,
    pub programmer: Arc<dyn NetworkContainerProgrammer>,
    pub monitor: mpsc::Sender<NncUpdate>,
    pub recorder: Recorder,
    pub metrics: Arc<ReconcileMetrics>,
    /// State of the error backoff policy; one NNC per node, so one policy.
    error_backoff: RwLock<Option<ExponentialBackoff>>,
}

impl Context {
    pub fn new(
        client: Client,
        store: Arc<IpStateStore>,
        nc_cache: Arc<NcCache>,
        programmer: Arc<dyn NetworkContainerProgrammer>,
        monitor: mpsc::Sender<NncUpdate>,
        recorder: Recorder,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        Self {
            client,
            store,
            nc_cache,
            programmer,
            monitor,
            recorder,
            metrics,
            error_backoff: RwLock::new(None),
        }
    }

    /// Next duration of the backoff policy, creating it on first failure.
    async fn get_backoff(&self) -> Duration {
        {
            let mut guard = self.error_backoff.write().await;
            if let Some(backoff) = guard.as_mut() {
                if let Some(duration) = backoff.next() {
                    return duration;
                }
            }
        }

        // Backoff policy: 1s, 2s, 4s, ... capped at the reconcile interval
        let mut backoff = ExponentialBuilder::default()
            .with_max_delay(DEFAULT_RECONCILE_INTERVAL)
            .without_max_times()
            .build();
        // safe unwrap: first backoff is always Some(Duration)
        let duration = backoff.next().unwrap();
        *self.error_backoff.write().await = Some(backoff);
        duration
    }

    async fn reset_backoff(&self) {
        let mut guard = self.error_backoff.write().await;
        if guard.is_some() {
            trace!(msg = "reset backoff policy");
            *guard = None;
        }
    }
}

/// Reconciler entry registered with the controller. Errors never escape:
/// failures are logged, counted and mapped to a backoff requeue, so the
/// registered error policy is unreachable.
pub async fn reconcile_nnc(nnc: Arc<NodeNetworkConfig>, ctx: Arc<Context>) -> Result<Action> {
    let name = nnc.name_any();
    match reconcile(nnc, &ctx).await {
        Ok(action) => {
            ctx.reset_backoff().await;
            Ok(action)
        }
        Err(error) => {
            error!(msg = "failed reconciliation", %name, %error);
            ctx.metrics.failure_inc();
            let backoff_duration = ctx.get_backoff().await;
            trace!(msg = format!("backoff duration: {backoff_duration:?}"), %name);
            Ok(Action::requeue(backoff_duration))
        }
    }
}

async fn reconcile(nnc: Arc<NodeNetworkConfig>, ctx: &Context) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure();
    // safe unwrap: NodeNetworkConfig is namespace scoped
    let namespace = nnc.namespace().unwrap();
    let name = nnc.name_any();

    let api: Api<NodeNetworkConfig> = Api::namespaced(ctx.client.clone(), &namespace);
    let nnc = match api.get(&name).await {
        Ok(nnc) => nnc,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(msg = "NodeNetworkConfig gone, ignoring stale event", %name);
            return Ok(Action::await_change());
        }
        Err(e) => {
            return Err(Error::KubeError(
                format!("failed to get NodeNetworkConfig {namespace}/{name}"),
                Box::new(e),
            ));
        }
    };

    let network_containers = nnc
        .status
        .as_ref()
        .map(|status| status.network_containers.as_slice())
        .unwrap_or_default();
    if network_containers.is_empty() {
        debug!(msg = "node not yet provisioned, nothing to reconcile", %name);
        return Ok(Action::await_change());
    }
    if network_containers.len() > 1 {
        let error = Error::UnsupportedNcQuantity(network_containers.len());
        publish_validation_warning(ctx, &nnc, &error).await;
        error!(msg = "rejecting NodeNetworkConfig", %name, %error);
        return Ok(Action::await_change());
    }

    let request = match translate::nc_request_from_status(&network_containers[0]) {
        Ok(request) => request,
        Err(error) => {
            // permanent: retrying the same status cannot succeed
            publish_validation_warning(ctx, &nnc, &error).await;
            error!(msg = "failed to translate NodeNetworkConfig status", %name, %error);
            return Ok(Action::await_change());
        }
    };

    let code = ctx.programmer.create_or_update_network_container(&request);
    if code != ResponseCode::Success {
        return Err(Error::DataplaneError(code.as_str()));
    }

    // Success means the dataplane accepted the request, not that it finished
    // programming it. The cache holds the last accepted request, so its
    // version is the newest one confirmed by a completed pass: secondary IPs
    // stamped with a newer version wait in PendingProgramming until a later
    // event re-observes them against the updated cache. The first request
    // for an NC seeds the pool as programmed.
    let previous = ctx.nc_cache.get(&request.network_container_id);
    let programmed_version = previous.as_ref().map_or(request.version, |p| p.version);
    ingest_nc_request(&ctx.store, previous.as_ref(), &request, programmed_version);
    ctx.nc_cache.insert(request.clone());

    // hand the observed NNC to the pool monitor; the capacity-1 channel
    // briefly backpressures us while the monitor is busy
    if ctx.monitor.send(pool_update(&nnc)).await.is_err() {
        warn!(msg = "pool monitor is gone, dropping NNC update", %name);
    }

    Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
}

/// Seed the store from a programming request and retire what the
/// orchestrator reclaimed, diffing against the previously cached request.
///
/// New secondary IPs enter Available, or PendingProgramming while their NC
/// version is ahead of what the dataplane has programmed. IDs that vanished
/// from the request are deleted only if already PendingRelease; an Assigned
/// record stays until the pod releases it.
pub fn ingest_nc_request(
    store: &IpStateStore,
    previous: Option<&CreateNetworkContainerRequest>,
    request: &CreateNetworkContainerRequest,
    programmed_version: i64,
) {
    store.add_or_update(request.secondary_ip_configs.iter().map(|(id, secondary)| {
        let state = if secondary.nc_version > programmed_version {
            IpConfigState::PendingProgramming
        } else {
            IpConfigState::Available
        };
        IpConfigurationStatus::new(
            id.clone(),
            request.network_container_id.clone(),
            secondary.ip_address.clone(),
            state,
        )
    }));

    if let Some(previous) = previous {
        let removed: Vec<&str> = previous
            .secondary_ip_configs
            .keys()
            .filter(|id| !request.secondary_ip_configs.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !removed.is_empty() {
            debug!(
                msg = "orchestrator reclaimed IP configurations",
                count = removed.len(),
            );
            store.remove_pending_release(removed);
        }
    }
}

fn pool_update(nnc: &NodeNetworkConfig) -> NncUpdate {
    let status = nnc.status.as_ref();
    NncUpdate {
        requested_ip_count: nnc.spec.requested_ip_count,
        ips_not_in_use: nnc.spec.ips_not_in_use.clone(),
        scaler: status
            .and_then(|s| s.scaler)
            .map(ScalerPolicy::from)
            .unwrap_or_default(),
        secondary_ip_count: status
            .map(|s| {
                s.network_containers
                    .iter()
                    .map(|nc| nc.ip_assignments.len() as i64)
                    .sum()
            })
            .unwrap_or_default(),
    }
}

async fn publish_validation_warning(ctx: &Context, nnc: &NodeNetworkConfig, error: &Error) {
    let event = Event {
        type_: EventType::Warning,
        reason: "ValidationFailed".to_string(),
        note: Some(error.to_string()),
        action: "ReconcileNodeNetworkConfig".to_string(),
        secondary: None,
    };
    if let Err(e) = ctx.recorder.publish(&event, &nnc.object_ref(&())).await {
        warn!(msg = "failed to publish validation event", %e);
    }
}
