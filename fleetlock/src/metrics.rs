//! Prometheus metrics for the coordinator.

use std::sync::OnceLock;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder on first call and returns the handle used to render
/// `/metrics`. Safe to call more than once (e.g. once per test) — later calls just return
/// the handle from the first.
pub fn install_recorder() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install global metrics recorder")
        })
        .clone()
}

/// Sets `fleetlock_lock_state{group}`: 1 while the group's slot is held, 0 while free.
pub fn set_lock_state(group: &str, held: bool) {
    gauge!("fleetlock_lock_state", "group" => group.to_string()).set(if held { 1.0 } else { 0.0 });
}

/// Mirrors the slot's stored transition counter; see the coordinator's gauge-not-counter
/// rationale for `fleetlock_lock_transition_count`.
pub fn set_lock_transition_count(group: &str, transitions: i32) {
    gauge!("fleetlock_lock_transition_count", "group" => group.to_string()).set(transitions as f64);
}

/// Unlabeled, matching the original's plain `prometheus.Counter` for this metric.
pub fn record_lock_request() {
    counter!("fleetlock_lock_request_count").increment(1);
}

/// Unlabeled, matching the original's plain `prometheus.Counter` for this metric.
pub fn record_unlock_request() {
    counter!("fleetlock_unlock_request_count").increment(1);
}
