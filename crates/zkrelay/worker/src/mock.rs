// Lightweight mock coordinator and proving service for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zkrelay_client::Error;
use zkrelay_types::{CircuitType, KeyHandle, ProofArtifact, Task, TaskOutcome, TaskState, unix_ms};

use crate::keys::KeyManager;
use crate::pool::{Coordinator, PoolStatus, Prover, WorkerContext};

/// Scripted coordinator: serves a queue of tasks, optionally preceded by a
/// number of empty polls, and records every submitted outcome.
#[derive(Clone, Default)]
pub(crate) struct MockCoordinator {
    tasks: Arc<Mutex<VecDeque<Task>>>,
    empty_polls: Arc<AtomicUsize>,
    claim_calls: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<TaskOutcome>>>,
}

impl MockCoordinator {
    pub(crate) fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(tasks.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Makes the next `count` claims come back empty before any task is
    /// served.
    pub(crate) fn empty_polls(self, count: usize) -> Self {
        self.empty_polls.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) async fn claim_task(&self) -> Result<Option<Task>, Error> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .empty_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(None);
        }
        Ok(self.tasks.lock().unwrap().pop_front())
    }

    pub(crate) async fn submit_result(&self, outcome: &TaskOutcome) -> Result<(), Error> {
        self.submitted.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    pub(crate) fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<TaskOutcome> {
        self.submitted.lock().unwrap().clone()
    }
}

/// Scripted proving service: records which tasks were dispatched, samples
/// pool utilization while proving, and serves per-task scripted outcomes.
#[derive(Clone, Default)]
pub(crate) struct MockProver {
    outcomes: Arc<Mutex<HashMap<String, Result<Vec<u8>, String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    dispatch_states: Arc<Mutex<Vec<TaskState>>>,
    delay: Duration,
    observed_pool: Option<Arc<PoolStatus>>,
    max_busy: Arc<AtomicUsize>,
}

impl MockProver {
    /// Scripts the proof bytes returned for a task.
    pub(crate) fn proof_for(self, task_id: &str, proof: Vec<u8>) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(task_id.to_string(), Ok(proof));
        self
    }

    /// Scripts a computation failure for a task.
    pub(crate) fn failure_for(self, task_id: &str, error: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(task_id.to_string(), Err(error.to_string()));
        self
    }

    /// Simulates proving time.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Samples the pool's busy count at every prove call.
    fn observing(mut self, pool: Arc<PoolStatus>) -> Self {
        self.observed_pool = Some(pool);
        self
    }

    pub(crate) async fn prove(
        &self,
        task: &mut Task,
        _key: &KeyHandle,
    ) -> Result<ProofArtifact, Error> {
        self.calls.lock().unwrap().push(task.task_id.clone());
        self.dispatch_states.lock().unwrap().push(task.state);
        task.state = TaskState::Proving;
        if let Some(pool) = &self.observed_pool {
            self.max_busy.fetch_max(pool.busy(), Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;

        let scripted = self.outcomes.lock().unwrap().get(&task.task_id).cloned();
        match scripted {
            Some(Err(error)) => Err(Error::Computation(error)),
            Some(Ok(proof)) => Ok(ProofArtifact {
                task_id: task.task_id.clone(),
                proof,
                produced_at: unix_ms(),
            }),
            None => {
                let mut proof = vec![0u8; 32];
                rand::fill(proof.as_mut_slice());
                Ok(ProofArtifact {
                    task_id: task.task_id.clone(),
                    proof,
                    produced_at: unix_ms(),
                })
            }
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Task states observed at dispatch, in call order.
    pub(crate) fn dispatch_states(&self) -> Vec<TaskState> {
        self.dispatch_states.lock().unwrap().clone()
    }

    pub(crate) fn max_busy(&self) -> usize {
        self.max_busy.load(Ordering::SeqCst)
    }
}

/// A wired-up worker context over mock collaborators and a real key volume.
pub(crate) struct MockHarness {
    pub(crate) ctx: Arc<WorkerContext>,
    pub(crate) coordinator: MockCoordinator,
    pub(crate) prover: MockProver,
    pub(crate) pool: Arc<PoolStatus>,
    _keys_dir: tempfile::TempDir,
}

pub(crate) const MOCK_CIRCUIT_VERSION: &str = "v0.13.1";

/// Builds a context with keys provisioned for the given circuit set.
pub(crate) fn mock_harness(
    n_workers: usize,
    circuit_types: Vec<CircuitType>,
    coordinator: MockCoordinator,
    prover: MockProver,
) -> MockHarness {
    let keys_dir = tempfile::tempdir().unwrap();
    for circuit_type in &circuit_types {
        let type_dir = keys_dir.path().join(circuit_type.to_string());
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(
            type_dir.join(format!("{MOCK_CIRCUIT_VERSION}.vkey")),
            b"mock key",
        )
        .unwrap();
    }

    let pool = Arc::new(PoolStatus::new(n_workers));
    let prover = prover.observing(pool.clone());
    let ctx = Arc::new(WorkerContext {
        coordinator: Coordinator::Mock(coordinator.clone()),
        prover: Prover::Mock(prover.clone()),
        keys: Arc::new(KeyManager::new(keys_dir.path().to_path_buf())),
        pool: pool.clone(),
        circuit_types,
        circuit_version: MOCK_CIRCUIT_VERSION.to_string(),
    });

    MockHarness {
        ctx,
        coordinator,
        prover,
        pool,
        _keys_dir: keys_dir,
    }
}

/// A coordinator task for the pinned mock version.
pub(crate) fn mock_task(task_id: &str, circuit_type: CircuitType) -> Task {
    Task {
        task_id: task_id.to_string(),
        circuit_type,
        circuit_version: MOCK_CIRCUIT_VERSION.to_string(),
        input: "{\"witness\":\"0x00\"}".to_string(),
        created_at: unix_ms(),
        state: Default::default(),
    }
}
