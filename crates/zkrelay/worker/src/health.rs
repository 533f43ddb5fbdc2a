//! Liveness and readiness probes for orchestrated deployment.
//!
//! The listener serves `GET /` as the readiness probe (200 = healthy, the
//! path the deployment's probe is pointed at), `GET /live` as the liveness
//! probe, and `GET /metrics` for Prometheus. Probes are computed on request
//! from the pool's utilization and both sessions' connectivity records;
//! nothing is persisted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use zkrelay_client::SessionHealth;
use zkrelay_types::unix_ms;

use crate::pool::PoolStatus;

/// Window within which an exhausted retry budget keeps a session degraded.
const DEGRADED_WINDOW: Duration = Duration::from_secs(300);

/// Heartbeat staleness beyond which the process counts as wedged.
const LIVENESS_STALE: Duration = Duration::from_secs(30);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Inputs the probes are derived from.
pub(crate) struct HealthState {
    pool: Arc<PoolStatus>,
    coordinator: Arc<SessionHealth>,
    prover: Arc<SessionHealth>,
    heartbeat: AtomicU64,
}

impl HealthState {
    /// Wires the probe inputs together.
    pub(crate) fn new(
        pool: Arc<PoolStatus>,
        coordinator: Arc<SessionHealth>,
        prover: Arc<SessionHealth>,
    ) -> Self {
        Self {
            pool,
            coordinator,
            prover,
            heartbeat: AtomicU64::new(unix_ms()),
        }
    }

    fn beat(&self) {
        self.heartbeat.store(unix_ms(), Ordering::Relaxed);
    }

    /// Ready iff at least one slot can take work and the endpoints are not
    /// both degraded.
    ///
    /// One session burning its retry budget does not flip readiness; both
    /// doing so within the window does, until either endpoint answers
    /// successfully again.
    pub(crate) fn ready(&self) -> bool {
        let both_degraded = self.coordinator.degraded(DEGRADED_WINDOW)
            && self.prover.degraded(DEGRADED_WINDOW);
        self.pool.idle_slots() > 0 && !both_degraded
    }

    /// Live iff the runtime heartbeat is fresh.
    pub(crate) fn live(&self) -> bool {
        let age = unix_ms().saturating_sub(self.heartbeat.load(Ordering::Relaxed));
        age <= LIVENESS_STALE.as_millis() as u64
    }

    #[cfg(test)]
    fn force_heartbeat(&self, ms: u64) {
        self.heartbeat.store(ms, Ordering::Relaxed);
    }
}

/// Periodically refreshes the liveness heartbeat.
///
/// The tick only stops firing if the runtime itself is wedged, which is
/// exactly what the liveness probe is meant to detect.
pub(crate) fn spawn_heartbeat(state: Arc<HealthState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            state.beat();
        }
    })
}

#[derive(Clone)]
struct HealthApp {
    state: Arc<HealthState>,
    metrics: PrometheusHandle,
}

/// Builds the probe router.
pub(crate) fn app(state: Arc<HealthState>, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/", get(readiness))
        .route("/live", get(liveness))
        .route("/metrics", get(get_metrics))
        .with_state(HealthApp { state, metrics })
        .layer(TraceLayer::new_for_http())
}

async fn readiness(State(app): State<HealthApp>) -> StatusCode {
    if app.state.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness(State(app): State<HealthApp>) -> StatusCode {
    if app.state.live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(app): State<HealthApp>) -> String {
    app.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n_workers: usize) -> HealthState {
        HealthState::new(
            Arc::new(PoolStatus::new(n_workers)),
            Arc::new(SessionHealth::new()),
            Arc::new(SessionHealth::new()),
        )
    }

    #[test]
    fn fresh_process_is_ready_and_live() {
        let state = state(4);
        assert!(state.ready());
        assert!(state.live());
    }

    #[test]
    fn one_degraded_session_keeps_readiness() {
        let state = state(4);
        state.coordinator.record_exhausted();
        assert!(state.ready());
    }

    #[test]
    fn both_degraded_sessions_flip_readiness() {
        let state = state(4);
        state.coordinator.record_exhausted();
        state.prover.record_exhausted();
        assert!(!state.ready());
    }

    #[test]
    fn one_successful_contact_restores_readiness() {
        let state = state(4);
        state.coordinator.record_exhausted();
        state.prover.record_exhausted();
        assert!(!state.ready());

        state.prover.record_success();
        assert!(state.ready());
    }

    #[test]
    fn saturated_pool_is_not_ready() {
        let state = state(2);
        let pool = state.pool.clone();
        let _a = pool.enter();
        let _b = pool.enter();
        assert!(!state.ready());
        drop(_a);
        assert!(state.ready());
    }

    #[test]
    fn stale_heartbeat_fails_liveness() {
        let state = state(1);
        state.force_heartbeat(unix_ms().saturating_sub(60_000));
        assert!(!state.live());
    }

    #[tokio::test]
    async fn probe_handlers_map_state_to_status_codes() {
        let state = Arc::new(state(1));
        state.coordinator.record_exhausted();
        state.prover.record_exhausted();
        let app = HealthApp {
            state: state.clone(),
            metrics: metrics_exporter_prometheus::PrometheusBuilder::new()
                .build_recorder()
                .handle(),
        };

        assert_eq!(readiness(State(app.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(liveness(State(app.clone())).await, StatusCode::OK);

        state.coordinator.record_success();
        assert_eq!(readiness(State(app)).await, StatusCode::OK);
    }
}
