use crate::error::Result;
use crate::metrics::PoolMetrics;
use crate::pool::PoolState;
use crate::pool::scaler::ScalerPolicy;
use crate::store::IpStateStore;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Full view of an observed NodeNetworkConfig, handed over by the
/// reconciler after every accepted event.
#[derive(Clone, Debug)]
pub struct NncUpdate {
    pub requested_ip_count: i64,
    pub ips_not_in_use: Vec<String>,
    pub scaler: ScalerPolicy,
    /// Total secondary IPs across the status network containers; used to
    /// detect that the orchestrator converged on our last request.
    pub secondary_ip_count: i64,
}

/// Subnet-wide exhaustion signal from the cluster subnet state watcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubnetExhaustion {
    pub exhausted: bool,
}

/// What we last asked the orchestrator for. Single-writer: only the monitor
/// produces new values, and a failed write never advances it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(rename = "requestedIPCount")]
    pub requested_ip_count: i64,
    pub ips_not_in_use: Vec<String>,
}

/// Writer seam for NNC spec updates. No retries inside; the monitor retries
/// on its next tick.
#[allow(async_fn_in_trait)]
pub trait PoolSpecWriter {
    async fn update_spec(&self, spec: &PoolSpec) -> Result<()>;
}

/// Read-only monitor state for the debug surface.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMonitorSnapshot {
    pub initialized: bool,
    pub min_free_count: i64,
    pub max_free_count: i64,
    pub not_in_use_count: i64,
    pub exhausted: bool,
    pub cached_spec: PoolSpec,
}

/// Endpoints for feeding and observing a running monitor.
#[derive(Clone)]
pub struct PoolMonitorHandle {
    pub nnc_tx: mpsc::Sender<NncUpdate>,
    pub css_tx: mpsc::Sender<SubnetExhaustion>,
    /// Flips to true once the first NNC has been observed.
    pub started: watch::Receiver<bool>,
    pub snapshot: watch::Receiver<PoolMonitorSnapshot>,
}

/// The autoscaling reconcile loop. Single-task by construction: every state
/// read and write happens on the loop task, inputs arrive through channels.
pub struct PoolMonitor<W> {
    store: Arc<IpStateStore>,
    writer: W,
    metrics: Arc<PoolMetrics>,
    tick: Duration,
    nnc_rx: mpsc::Receiver<NncUpdate>,
    css_rx: mpsc::Receiver<SubnetExhaustion>,
    css_open: bool,
    spec: Option<PoolSpec>,
    scaler: ScalerPolicy,
    exhausted: bool,
    not_in_use_count: i64,
    /// Start of the oldest outstanding scale operation; popped when a later
    /// NNC shows convergence.
    scale_started: Option<Instant>,
    started_tx: watch::Sender<bool>,
    snapshot_tx: watch::Sender<PoolMonitorSnapshot>,
}

impl<W: PoolSpecWriter> PoolMonitor<W> {
    pub fn new(
        store: Arc<IpStateStore>,
        writer: W,
        metrics: Arc<PoolMetrics>,
        tick: Duration,
    ) -> (Self, PoolMonitorHandle) {
        // capacity 1 so a busy monitor backpressures the reconciler
        let (nnc_tx, nnc_rx) = mpsc::channel(1);
        let (css_tx, css_rx) = mpsc::channel(1);
        let (started_tx, started) = watch::channel(false);
        let (snapshot_tx, snapshot) = watch::channel(PoolMonitorSnapshot::default());
        let monitor = Self {
            store,
            writer,
            metrics,
            tick,
            nnc_rx,
            css_rx,
            css_open: true,
            spec: None,
            scaler: ScalerPolicy::default().normalized(),
            exhausted: false,
            not_in_use_count: 0,
            scale_started: None,
            started_tx,
            snapshot_tx,
        };
        (
            monitor,
            PoolMonitorHandle {
                nnc_tx,
                css_tx,
                started,
                snapshot,
            },
        )
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(msg = "starting pool monitor", tick = ?self.tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(msg = "pool monitor stopped");
                    return;
                }
                update = self.nnc_rx.recv() => match update {
                    Some(update) => {
                        self.ingest_nnc(update);
                        self.publish_snapshot();
                    }
                    None => {
                        info!(msg = "NNC source closed, stopping pool monitor");
                        return;
                    }
                },
                update = self.css_rx.recv(), if self.css_open => match update {
                    Some(update) => self.ingest_css(update),
                    None => self.css_open = false,
                },
                _ = tick.tick() => {
                    if self.spec.is_none() {
                        trace!(msg = "dropping tick, scaler not yet observed");
                        continue;
                    }
                    if let Err(error) = self.reconcile().await {
                        warn!(msg = "pool reconcile failed", %error);
                    }
                    self.publish_snapshot();
                }
            }
        }
    }

    fn ingest_nnc(&mut self, update: NncUpdate) {
        self.scaler = update.scaler.normalized();
        let first = self.spec.is_none();
        if let Some(started_at) = self.scale_started {
            if update.secondary_ip_count == update.requested_ip_count {
                let seconds = started_at.elapsed().as_secs_f64();
                self.metrics.scale_latency_observe(seconds);
                self.scale_started = None;
                debug!(msg = "pool scale converged", seconds);
            }
        }
        self.spec = Some(PoolSpec {
            requested_ip_count: update.requested_ip_count,
            ips_not_in_use: update.ips_not_in_use,
        });
        if first {
            info!(
                msg = "pool monitor initialized",
                requested = update.requested_ip_count,
                batch = self.scaler.batch_size,
                max = self.scaler.max_ip_count,
            );
            self.started_tx.send_replace(true);
        }
    }

    fn ingest_css(&mut self, update: SubnetExhaustion) {
        if self.exhausted != update.exhausted {
            info!(msg = "subnet exhaustion changed", exhausted = update.exhausted);
        }
        self.exhausted = update.exhausted;
    }

    /// Effective scaler values for this pass. Exhaustion narrows the scaler
    /// to minimal granularity without touching the observed policy.
    fn effective_scaler(&self) -> (i64, i64, i64) {
        if self.exhausted {
            (1, 1, 2)
        } else {
            (
                self.scaler.batch_size,
                self.scaler.min_free_ip_count(),
                self.scaler.max_free_ip_count(),
            )
        }
    }

    /// One reconcile pass over a fresh pool snapshot. First matching branch
    /// wins: scale up, scale down, clean pending release, idle.
    async fn reconcile(&mut self) -> Result<()> {
        let Some(spec) = self.spec.clone() else {
            return Ok(());
        };
        let (batch, min_free, max_free) = self.effective_scaler();
        let max = self.scaler.max_ip_count;
        let requested = spec.requested_ip_count;
        let state = PoolState::new(self.store.pool_counts(), requested);
        self.metrics
            .observe_pool(&state.counts, requested, batch, max, self.exhausted);

        if state.expected_available() < min_free {
            if requested == max {
                trace!(msg = "pool at maximum, not scaling up", requested);
                return Ok(());
            }
            let target = (requested + batch - requested.rem_euclid(batch)).min(max);
            if target == requested {
                return Ok(());
            }
            info!(
                msg = "scaling pool up",
                requested,
                target,
                assigned = state.counts.assigned,
                min_free,
            );
            let next = PoolSpec {
                requested_ip_count: target,
                ips_not_in_use: self.store.pending_release_ids(),
            };
            return self.write_spec(next, true).await;
        }

        if state.current_available() >= max_free {
            let rem = requested.rem_euclid(batch);
            let target = if rem != 0 {
                requested - rem
            } else {
                requested - batch
            }
            .max(0);
            let n = requested - target;
            // re-mark only when the previous mark was consumed by a
            // successful spec write, or the orchestrator reclaimed in the
            // meantime; prevents double-marking across failed writes
            if self.not_in_use_count == 0 || self.not_in_use_count < state.counts.pending_release {
                let marked = self.store.mark_n_pending_release(n as usize)?;
                self.not_in_use_count = state.counts.pending_release + marked.len() as i64;
                debug!(
                    msg = "marked IP configurations for release",
                    count = marked.len(),
                );
            }
            info!(
                msg = "scaling pool down",
                requested,
                target,
                available = state.current_available(),
                max_free,
            );
            let next = PoolSpec {
                requested_ip_count: target,
                ips_not_in_use: self.store.pending_release_ids(),
            };
            self.write_spec(next, true).await?;
            self.not_in_use_count = 0;
            return Ok(());
        }

        let pending = self.store.pending_release_ids();
        if spec.ips_not_in_use.len() != pending.len() {
            debug!(
                msg = "cleaning reclaimed IPs from spec",
                stale = spec.ips_not_in_use.len(),
                pending = pending.len(),
            );
            let next = PoolSpec {
                requested_ip_count: requested,
                ips_not_in_use: pending,
            };
            return self.write_spec(next, false).await;
        }

        Ok(())
    }

    async fn write_spec(&mut self, spec: PoolSpec, scaling: bool) -> Result<()> {
        match self.writer.update_spec(&spec).await {
            Ok(()) => {
                self.metrics.spec_write_inc();
                if scaling && self.scale_started.is_none() {
                    self.scale_started = Some(Instant::now());
                }
                self.spec = Some(spec);
                Ok(())
            }
            Err(error) => {
                // cached spec is not advanced: the next tick retries the
                // same intent
                self.metrics.spec_write_failure_inc();
                Err(error)
            }
        }
    }

    fn publish_snapshot(&self) {
        let (_, min_free, max_free) = self.effective_scaler();
        self.snapshot_tx.send_replace(PoolMonitorSnapshot {
            initialized: self.spec.is_some(),
            min_free_count: min_free,
            max_free_count: max_free,
            not_in_use_count: self.not_in_use_count,
            exhausted: self.exhausted,
            cached_spec: self.spec.clone().unwrap_or_default(),
        });
    }
}
