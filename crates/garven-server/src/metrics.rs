//! Prometheus-compatible hub metrics.
//!
//! Counters are lock-free `AtomicU64` fields. The `/metrics` endpoint calls
//! [`HubMetrics::to_prometheus`] to emit Prometheus text exposition format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use garven_cluster::{ConnectionRegistry, Outcome, Outcomes};

/// Lock-free counters for the hub.
pub struct HubMetrics {
    // ── Connections ──
    pub identify_ok_count:        AtomicU64,
    pub identify_failed_count:    AtomicU64,
    pub connections_closed_count: AtomicU64,

    // ── Requests ──
    pub request_all_count:        AtomicU64,
    pub request_all_latency_us:   AtomicU64,
    pub request_count:            AtomicU64,
    pub request_latency_us:       AtomicU64,

    // ── Per-peer outcomes ──
    pub outcome_success_count:    AtomicU64,
    pub outcome_failure_count:    AtomicU64,
    pub outcome_timeout_count:    AtomicU64,
    pub outcome_disconnect_count: AtomicU64,

    // ── HTTP ──
    pub auth_rejected_count:      AtomicU64,
    pub partial_response_count:   AtomicU64,

    // ── Startup ──
    pub start_time:               Instant,
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            identify_ok_count:        AtomicU64::new(0),
            identify_failed_count:    AtomicU64::new(0),
            connections_closed_count: AtomicU64::new(0),
            request_all_count:        AtomicU64::new(0),
            request_all_latency_us:   AtomicU64::new(0),
            request_count:            AtomicU64::new(0),
            request_latency_us:       AtomicU64::new(0),
            outcome_success_count:    AtomicU64::new(0),
            outcome_failure_count:    AtomicU64::new(0),
            outcome_timeout_count:    AtomicU64::new(0),
            outcome_disconnect_count: AtomicU64::new(0),
            auth_rejected_count:      AtomicU64::new(0),
            partial_response_count:   AtomicU64::new(0),
            start_time:               Instant::now(),
        }
    }

    /// Increment a counter by 1.
    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter and accumulate latency.
    #[inline]
    pub fn record(&self, counter: &AtomicU64, latency: &AtomicU64, elapsed_us: u64) {
        counter.fetch_add(1, Ordering::Relaxed);
        latency.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    /// Count one outcome per cluster.
    pub fn record_outcomes(&self, outcomes: &Outcomes) {
        for outcome in outcomes.values() {
            self.record_outcome(outcome);
        }
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Success(_)       => &self.outcome_success_count,
            Outcome::RemoteFailure(_) => &self.outcome_failure_count,
            Outcome::Timeout          => &self.outcome_timeout_count,
            Outcome::Disconnected     => &self.outcome_disconnect_count,
        };
        self.inc(counter);
    }

    /// Format all metrics as Prometheus text exposition.
    pub fn to_prometheus(&self, registry: &ConnectionRegistry) -> String {
        let avg = |sum: u64, count: u64| -> f64 {
            if count == 0 { 0.0 } else { sum as f64 / count as f64 }
        };

        let all_n = self.request_all_count.load(Ordering::Relaxed);
        let all_lat = self.request_all_latency_us.load(Ordering::Relaxed);
        let one_n = self.request_count.load(Ordering::Relaxed);
        let one_lat = self.request_latency_us.load(Ordering::Relaxed);

        format!(
            "\
# HELP garven_connected_clusters Clusters currently identified
# TYPE garven_connected_clusters gauge
garven_connected_clusters {connected}
# HELP garven_uptime_seconds Hub uptime in seconds
# TYPE garven_uptime_seconds gauge
garven_uptime_seconds {uptime}
# HELP garven_identify_total Identify handshakes by result
# TYPE garven_identify_total counter
garven_identify_total{{result=\"ok\"}} {identify_ok}
garven_identify_total{{result=\"failed\"}} {identify_failed}
# HELP garven_connections_closed_total Identified connections that closed
# TYPE garven_connections_closed_total counter
garven_connections_closed_total {closed}
# HELP garven_request_all_total Scatter/gather calls
# TYPE garven_request_all_total counter
garven_request_all_total {all_n}
# HELP garven_request_all_latency_avg_us Average scatter/gather latency in microseconds
# TYPE garven_request_all_latency_avg_us gauge
garven_request_all_latency_avg_us {avg_all}
# HELP garven_request_total Targeted request calls
# TYPE garven_request_total counter
garven_request_total {one_n}
# HELP garven_request_latency_avg_us Average targeted request latency in microseconds
# TYPE garven_request_latency_avg_us gauge
garven_request_latency_avg_us {avg_one}
# HELP garven_outcome_total Per-cluster request outcomes
# TYPE garven_outcome_total counter
garven_outcome_total{{outcome=\"success\"}} {success}
garven_outcome_total{{outcome=\"remote_failure\"}} {failure}
garven_outcome_total{{outcome=\"timeout\"}} {timeout}
garven_outcome_total{{outcome=\"disconnected\"}} {disconnect}
# HELP garven_partial_response_total Aggregates returned with partial_response=true
# TYPE garven_partial_response_total counter
garven_partial_response_total {partial}
# HELP garven_auth_rejected_total HTTP requests rejected for a bad API key
# TYPE garven_auth_rejected_total counter
garven_auth_rejected_total {auth_rejected}
",
            connected = registry.len(),
            uptime = self.start_time.elapsed().as_secs(),
            identify_ok = self.identify_ok_count.load(Ordering::Relaxed),
            identify_failed = self.identify_failed_count.load(Ordering::Relaxed),
            closed = self.connections_closed_count.load(Ordering::Relaxed),
            all_n = all_n,
            avg_all = format!("{:.1}", avg(all_lat, all_n)),
            one_n = one_n,
            avg_one = format!("{:.1}", avg(one_lat, one_n)),
            success = self.outcome_success_count.load(Ordering::Relaxed),
            failure = self.outcome_failure_count.load(Ordering::Relaxed),
            timeout = self.outcome_timeout_count.load(Ordering::Relaxed),
            disconnect = self.outcome_disconnect_count.load(Ordering::Relaxed),
            partial = self.partial_response_count.load(Ordering::Relaxed),
            auth_rejected = self.auth_rejected_count.load(Ordering::Relaxed),
        )
    }
}
