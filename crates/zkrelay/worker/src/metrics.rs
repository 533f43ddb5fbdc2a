//! Prometheus metrics for the relay worker.
//!
//! Provides metric initialization and helper functions for recording task
//! pipeline outcomes. Rendered by the health listener's `/metrics` route.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics exporter and register metric
/// descriptions.
///
/// Returns a handle used to render metrics for the `/metrics` endpoint.
pub(crate) fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!(
        "zkrelay_claims_total",
        "Task claim attempts, labeled by outcome"
    );
    describe_counter!(
        "zkrelay_tasks_total",
        "Finished task pipelines, labeled by result"
    );
    describe_histogram!(
        "zkrelay_task_duration_seconds",
        "Wall time from claim to submitted outcome"
    );
    describe_counter!(
        "zkrelay_proof_submit_lost_total",
        "Completed proofs whose submission exhausted all retries"
    );
    describe_gauge!("zkrelay_slots_busy", "Worker slots currently proving");
    describe_gauge!("zkrelay_keys_loaded", "Proving keys cached in memory");

    handle
}

/// Records one claim round trip.
pub(crate) fn record_claim(outcome: &'static str) {
    counter!("zkrelay_claims_total", "outcome" => outcome).increment(1);
}

/// Records a finished task pipeline and its duration.
pub(crate) fn record_task(result: &'static str, duration: Duration) {
    counter!("zkrelay_tasks_total", "result" => result).increment(1);
    histogram!("zkrelay_task_duration_seconds").record(duration.as_secs_f64());
}

/// Records a completed proof that could not be reported to the coordinator.
pub(crate) fn record_proof_submit_lost() {
    counter!("zkrelay_proof_submit_lost_total").increment(1);
}

/// Updates the busy-slot gauge.
pub(crate) fn set_busy_slots(count: usize) {
    gauge!("zkrelay_slots_busy").set(count as f64);
}

/// Counts one proving key load into the cache.
pub(crate) fn key_loaded() {
    gauge!("zkrelay_keys_loaded").increment(1.0);
}
