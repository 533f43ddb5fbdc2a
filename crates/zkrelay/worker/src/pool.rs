//! Worker pool driving the claim → key resolve → prove → submit pipeline.
//!
//! A fixed set of `n_workers` independent pipelines, one tokio task each.
//! Every pipeline owns its claimed task exclusively until it reaches a
//! terminal state; a slow or failing pipeline never blocks its siblings.
//! Failures local to one pipeline are reported to the coordinator
//! best-effort and the pipeline moves on to the next claim.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use zkrelay_client::{CoordinatorClient, Error, ProvingServiceClient};
use zkrelay_types::{
    CircuitType, FailureReport, KeyHandle, ProofArtifact, Task, TaskOutcome, TaskState,
};

use crate::keys::KeyManager;
use crate::metrics;

/// Delay before re-polling after the coordinator reports an empty queue.
const IDLE_POLL_DELAY: Duration = Duration::from_secs(2);

/// Delay before re-polling after a claim failure (including exhausted
/// retries), so a degraded coordinator is not hammered.
const CLAIM_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Coordinator endpoint, either the live HTTP client or a scripted test
/// double.
#[derive(Clone)]
pub(crate) enum Coordinator {
    /// Live coordinator client.
    Http(Arc<CoordinatorClient>),
    /// Scripted mock.
    #[cfg(test)]
    Mock(crate::mock::MockCoordinator),
}

impl Coordinator {
    async fn claim_task(&self) -> Result<Option<Task>, Error> {
        match self {
            Self::Http(client) => client.claim_task().await,
            #[cfg(test)]
            Self::Mock(mock) => mock.claim_task().await,
        }
    }

    async fn submit_result(&self, outcome: &TaskOutcome) -> Result<(), Error> {
        match self {
            Self::Http(client) => client.submit_result(outcome).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.submit_result(outcome).await,
        }
    }
}

/// Proving service endpoint, either the live HTTP client or a scripted test
/// double.
#[derive(Clone)]
pub(crate) enum Prover {
    /// Live proving service client.
    Http(Arc<ProvingServiceClient>),
    /// Scripted mock.
    #[cfg(test)]
    Mock(crate::mock::MockProver),
}

impl Prover {
    async fn prove(&self, task: &mut Task, key: &KeyHandle) -> Result<ProofArtifact, Error> {
        match self {
            Self::Http(client) => client.prove(task, key).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.prove(task, key).await,
        }
    }
}

/// Pool utilization, observed by the health listener.
///
/// Invariant: `busy` never exceeds `n_workers`. A slot enters busy only
/// from its own pipeline, and there are exactly `n_workers` pipelines.
pub(crate) struct PoolStatus {
    n_workers: usize,
    busy: AtomicUsize,
}

impl PoolStatus {
    /// Creates the status record for a pool of `n_workers` slots.
    pub(crate) fn new(n_workers: usize) -> Self {
        Self {
            n_workers,
            busy: AtomicUsize::new(0),
        }
    }

    /// Configured pool size.
    pub(crate) fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Slots currently working a task.
    pub(crate) fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Slots currently idle.
    pub(crate) fn idle_slots(&self) -> usize {
        self.n_workers.saturating_sub(self.busy())
    }

    pub(crate) fn enter(self: &Arc<Self>) -> BusyGuard {
        let busy = self.busy.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_busy_slots(busy);
        BusyGuard(self.clone())
    }
}

/// Marks one slot busy for as long as it is held.
pub(crate) struct BusyGuard(Arc<PoolStatus>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let busy = self.0.busy.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_busy_slots(busy);
    }
}

/// Everything a pipeline needs, shared by all slots.
pub(crate) struct WorkerContext {
    /// Coordinator endpoint.
    pub(crate) coordinator: Coordinator,
    /// Proving service endpoint.
    pub(crate) prover: Prover,
    /// Proving key cache.
    pub(crate) keys: Arc<KeyManager>,
    /// Pool utilization record.
    pub(crate) pool: Arc<PoolStatus>,
    /// Circuit families this worker accepts.
    pub(crate) circuit_types: Vec<CircuitType>,
    /// Pinned circuit version.
    pub(crate) circuit_version: String,
}

/// Spawns the pool's pipelines.
///
/// Each pipeline subscribes to the shutdown broadcast: after a signal it
/// issues no new claims and finishes the task it is working on, so a
/// computed proof is still submitted.
pub(crate) fn start_workers(
    ctx: Arc<WorkerContext>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    (0..ctx.pool.n_workers())
        .map(|slot| {
            let ctx = ctx.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(worker_loop(slot, ctx, shutdown))
        })
        .collect()
}

async fn worker_loop(slot: usize, ctx: Arc<WorkerContext>, mut shutdown: broadcast::Receiver<()>) {
    info!(slot, "worker started");
    loop {
        match shutdown.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            _ => break,
        }

        let task = match ctx.coordinator.claim_task().await {
            Ok(Some(task)) => {
                metrics::record_claim("task");
                task
            }
            Ok(None) => {
                // Empty queue is a normal outcome, not a failure: back off
                // briefly and poll again.
                metrics::record_claim("empty");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(IDLE_POLL_DELAY) => {}
                }
                continue;
            }
            Err(err) => {
                metrics::record_claim("error");
                warn!(slot, error = %err, "task claim failed");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(CLAIM_ERROR_DELAY) => {}
                }
                continue;
            }
        };

        let _busy = ctx.pool.enter();
        process_task(&ctx, task).await;
    }
    info!(slot, "worker stopped");
}

#[instrument(skip_all, fields(task_id = %task.task_id, circuit_type = %task.circuit_type))]
async fn process_task(ctx: &WorkerContext, mut task: Task) {
    let started = Instant::now();

    if !ctx.circuit_types.contains(&task.circuit_type) {
        let reason = format!("unsupported circuit type {}", task.circuit_type);
        report_failure(ctx, &mut task, reason).await;
        metrics::record_task("rejected", started.elapsed());
        return;
    }
    if task.circuit_version != ctx.circuit_version {
        let reason = format!(
            "circuit version mismatch: task wants {}, worker pins {}",
            task.circuit_version, ctx.circuit_version
        );
        report_failure(ctx, &mut task, reason).await;
        metrics::record_task("rejected", started.elapsed());
        return;
    }

    let key = match ctx
        .keys
        .resolve(task.circuit_type, &task.circuit_version)
        .await
    {
        Ok(key) => key,
        Err(err) => {
            report_failure(ctx, &mut task, format!("proving key unavailable: {err}")).await;
            metrics::record_task("key_load_failed", started.elapsed());
            return;
        }
    };

    task.state = TaskState::Submitted;
    let artifact = match ctx.prover.prove(&mut task, &key).await {
        Ok(artifact) => artifact,
        Err(err @ Error::Computation(_)) => {
            // Deterministic prover: never retry the same witness, just tell
            // the coordinator so it can reassign or park the task.
            report_failure(ctx, &mut task, err.to_string()).await;
            metrics::record_task("computation_failed", started.elapsed());
            return;
        }
        Err(err) => {
            let reason = format!("proving service unavailable: {err}");
            report_failure(ctx, &mut task, reason).await;
            metrics::record_task("prove_failed", started.elapsed());
            return;
        }
    };

    match ctx
        .coordinator
        .submit_result(&TaskOutcome::Proof(artifact))
        .await
    {
        Ok(()) => {
            task.state = TaskState::Completed;
            info!(
                state = %task.state,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "task completed"
            );
            metrics::record_task("completed", started.elapsed());
        }
        Err(err) => {
            // The costliest failure: the proof exists but the coordinator
            // does not know about it. Escalate instead of dropping silently.
            error!(error = %err, "completed proof could not be submitted");
            metrics::record_proof_submit_lost();
            metrics::record_task("submit_lost", started.elapsed());
        }
    }
}

/// Reports a terminal task failure, best-effort.
async fn report_failure(ctx: &WorkerContext, task: &mut Task, error: String) {
    task.state = TaskState::Failed;
    warn!(state = %task.state, reason = %error, "task failed");

    let outcome = TaskOutcome::Failure(FailureReport {
        task_id: task.task_id.clone(),
        error,
    });
    if let Err(err) = ctx.coordinator.submit_result(&outcome).await {
        warn!(error = %err, "failure report could not be delivered");
    }
}
