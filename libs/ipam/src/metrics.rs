use crate::ipconfig::{IpConfigState, IpConfigurationStatus};
use crate::store::{PoolCounts, TransitionHook};

use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub from: String,
    pub to: String,
}

/// Prometheus metrics observed from the pool monitor and the store
/// transition hook. Observation only; nothing here feeds back into scaling
/// decisions.
pub struct PoolMetrics {
    pool_total: Gauge,
    pool_assigned: Gauge,
    pool_available: Gauge,
    pool_pending_programming: Gauge,
    pool_pending_release: Gauge,
    pool_requested: Gauge,
    batch_size: Gauge,
    max_ips: Gauge,
    subnet_exhausted: Gauge,
    spec_writes: Counter,
    spec_write_failures: Counter,
    scale_latency: Histogram,
    state_transitions: Family<TransitionLabels, Counter>,
}

impl PoolMetrics {
    pub fn new(registry: &mut Registry) -> Arc<Self> {
        let registry = registry.sub_registry_with_prefix("cnsd");

        let pool_total = Gauge::default();
        registry.register(
            "ip_pool_size",
            "Secondary IPs known to this node",
            pool_total.clone(),
        );
        let pool_assigned = Gauge::default();
        registry.register(
            "ips_assigned",
            "Secondary IPs bound to pods",
            pool_assigned.clone(),
        );
        let pool_available = Gauge::default();
        registry.register(
            "ips_available",
            "Secondary IPs free to assign",
            pool_available.clone(),
        );
        let pool_pending_programming = Gauge::default();
        registry.register(
            "ips_pending_programming",
            "Secondary IPs waiting for the dataplane to catch up",
            pool_pending_programming.clone(),
        );
        let pool_pending_release = Gauge::default();
        registry.register(
            "ips_pending_release",
            "Secondary IPs queued for reclamation",
            pool_pending_release.clone(),
        );
        let pool_requested = Gauge::default();
        registry.register(
            "ips_requested",
            "Secondary IP count most recently requested from the orchestrator",
            pool_requested.clone(),
        );
        let batch_size = Gauge::default();
        registry.register(
            "scaler_batch_size",
            "Scaling quantum from the orchestrator scaler policy",
            batch_size.clone(),
        );
        let max_ips = Gauge::default();
        registry.register(
            "scaler_max_ips",
            "Pool ceiling from the orchestrator scaler policy",
            max_ips.clone(),
        );
        let subnet_exhausted = Gauge::default();
        registry.register(
            "subnet_exhausted",
            "1 when the subnet reports exhaustion, 0 otherwise",
            subnet_exhausted.clone(),
        );
        let spec_writes = Counter::default();
        registry.register(
            "nnc_spec_writes",
            "NodeNetworkConfig spec updates issued",
            spec_writes.clone(),
        );
        let spec_write_failures = Counter::default();
        registry.register(
            "nnc_spec_write_failures",
            "NodeNetworkConfig spec updates that failed",
            spec_write_failures.clone(),
        );
        let scale_latency = Histogram::new(exponential_buckets(1.0, 2.0, 10));
        registry.register(
            "pool_scale_latency_seconds",
            "Seconds from a scale decision until the orchestrator converges",
            scale_latency.clone(),
        );
        let state_transitions = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "ip_state_transitions",
            "IP configuration state transitions",
            state_transitions.clone(),
        );

        Arc::new(Self {
            pool_total,
            pool_assigned,
            pool_available,
            pool_pending_programming,
            pool_pending_release,
            pool_requested,
            batch_size,
            max_ips,
            subnet_exhausted,
            spec_writes,
            spec_write_failures,
            scale_latency,
            state_transitions,
        })
    }

    pub fn observe_pool(
        &self,
        counts: &PoolCounts,
        requested: i64,
        batch: i64,
        max: i64,
        exhausted: bool,
    ) {
        self.pool_total.set(counts.total);
        self.pool_assigned.set(counts.assigned);
        self.pool_available.set(counts.available);
        self.pool_pending_programming.set(counts.pending_programming);
        self.pool_pending_release.set(counts.pending_release);
        self.pool_requested.set(requested);
        self.batch_size.set(batch);
        self.max_ips.set(max);
        self.subnet_exhausted.set(exhausted as i64);
    }

    pub fn spec_write_inc(&self) {
        self.spec_writes.inc();
    }

    pub fn spec_write_failure_inc(&self) {
        self.spec_write_failures.inc();
    }

    pub fn scale_latency_observe(&self, seconds: f64) {
        self.scale_latency.observe(seconds);
    }
}

/// Reconciler-side counters and timings.
pub struct ReconcileMetrics {
    operations: Counter,
    failures: Counter,
    duration: Histogram,
}

impl ReconcileMetrics {
    pub fn new(registry: &mut Registry) -> Arc<Self> {
        let registry = registry.sub_registry_with_prefix("cnsd");
        let operations = Counter::default();
        registry.register(
            "reconcile_operations",
            "Total number of reconcile operations",
            operations.clone(),
        );
        let failures = Counter::default();
        registry.register(
            "reconcile_failures",
            "Number of errors that occurred during reconcile operations",
            failures.clone(),
        );
        let duration = Histogram::new(exponential_buckets(0.05, 2.0, 8));
        registry.register(
            "reconcile_duration_seconds",
            "Histogram of reconcile operations",
            duration.clone(),
        );
        Arc::new(Self {
            operations,
            failures,
            duration,
        })
    }

    pub fn failure_inc(&self) {
        self.failures.inc();
    }

    /// Count one reconcile and time it until the returned measurer drops.
    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.operations.inc();
        ReconcileMeasurer {
            start: std::time::Instant::now(),
            metric: self.duration.clone(),
        }
    }
}

/// Relies on Drop to register the observed duration in the histogram.
pub struct ReconcileMeasurer {
    start: std::time::Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Store middleware that counts transitions; register at store construction.
pub struct MetricsTransitionHook {
    metrics: Arc<PoolMetrics>,
}

impl MetricsTransitionHook {
    pub fn new(metrics: Arc<PoolMetrics>) -> Arc<Self> {
        Arc::new(Self { metrics })
    }
}

impl TransitionHook for MetricsTransitionHook {
    fn on_transition(
        &self,
        _record: &IpConfigurationStatus,
        prev: IpConfigState,
        next: IpConfigState,
    ) {
        self.metrics
            .state_transitions
            .get_or_create(&TransitionLabels {
                from: prev.as_str().to_string(),
                to: next.as_str().to_string(),
            })
            .inc();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use prometheus_client::encoding::text;

    #[test]
    fn test_pool_gauges_encode() {
        let mut registry = Registry::default();
        let metrics = PoolMetrics::new(&mut registry);
        metrics.observe_pool(
            &PoolCounts {
                total: 16,
                assigned: 9,
                available: 7,
                pending_programming: 0,
                pending_release: 0,
            },
            16,
            16,
            250,
            false,
        );

        let mut out = String::new();
        text::encode(&mut out, &registry).unwrap();
        assert!(out.contains("cnsd_ip_pool_size 16"));
        assert!(out.contains("cnsd_ips_assigned 9"));
        assert!(out.contains("cnsd_ips_available 7"));
        assert!(out.contains("cnsd_scaler_max_ips 250"));
        assert!(out.contains("cnsd_subnet_exhausted 0"));
    }

    #[test]
    fn test_transition_hook_counts_by_label() {
        let mut registry = Registry::default();
        let metrics = PoolMetrics::new(&mut registry);
        let hook = MetricsTransitionHook::new(metrics);
        let record =
            IpConfigurationStatus::new("id-1", "nc-1", "10.0.0.1", IpConfigState::Assigned);
        hook.on_transition(&record, IpConfigState::Available, IpConfigState::Assigned);
        hook.on_transition(&record, IpConfigState::Available, IpConfigState::Assigned);
        hook.on_transition(&record, IpConfigState::Assigned, IpConfigState::Available);

        let mut out = String::new();
        text::encode(&mut out, &registry).unwrap();
        assert!(out.contains(r#"from="Available",to="Assigned"} 2"#));
        assert!(out.contains(r#"from="Assigned",to="Available"} 1"#));
    }
}
