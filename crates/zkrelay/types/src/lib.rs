//! Shared type definitions for the zkrelay proving relay.
//!
//! This crate provides the task and proof data model owned by the worker
//! pipelines, plus the request and response types spoken on the two wire
//! protocols:
//!
//! - the **coordinator** protocol (login, task claim, result submission), and
//! - the **proving service** protocol (proof submission, status polling,
//!   verification-key retrieval).
//!
//! All binary data (proof bytes, key bytes) is serialized as base64 when
//! transmitted over HTTP.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The proving circuit family a task targets.
///
/// The set accepted by a deployment is configured; a claimed task whose
/// circuit type is not in the configured set is rejected locally and never
/// dispatched to the proving service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitType {
    /// Proves a single chunk of L2 blocks.
    Chunk,
    /// Aggregates chunk proofs into a batch proof.
    Batch,
    /// Aggregates batch proofs into a bundle proof.
    Bundle,
}

/// Lifecycle state of a claimed task, tracked by the owning worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    /// Claimed from the coordinator, not yet dispatched.
    #[default]
    Claimed,
    /// Submitted to the proving service.
    Submitted,
    /// The proving service reported the proof is being computed.
    Proving,
    /// Terminal: proof computed and reported to the coordinator.
    Completed,
    /// Terminal: the task failed and a failure report was issued.
    Failed,
}

/// A proof-generation task claimed from the coordinator.
///
/// A task is owned exclusively by the worker slot that claimed it until it
/// reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier assigned by the coordinator.
    pub task_id: String,
    /// Circuit family this task must be proved with.
    pub circuit_type: CircuitType,
    /// Circuit revision this task was generated for.
    pub circuit_version: String,
    /// Witness payload the circuit is proved against.
    pub input: String,
    /// Claim timestamp in milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
    /// Pipeline state, local to the owning slot.
    #[serde(default, skip_serializing)]
    pub state: TaskState,
}

/// A completed proof, immutable once created.
///
/// Ownership transfers from the proving service client to the owning worker
/// slot, and from there to the coordinator on submission.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    /// The task this proof belongs to.
    pub task_id: String,
    /// Raw proof bytes, encoded as base64 when serialized.
    #[serde_as(as = "Base64")]
    pub proof: Vec<u8>,
    /// Completion timestamp in milliseconds since the Unix epoch.
    pub produced_at: u64,
}

/// A terminal task failure reported to the coordinator so it can reassign
/// the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// The task that failed.
    pub task_id: String,
    /// Human-readable failure description.
    pub error: String,
}

/// Outcome of a task pipeline, submitted to the coordinator exactly once per
/// claimed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The proof was computed successfully.
    Proof(ProofArtifact),
    /// The task terminally failed; the coordinator should reassign it.
    Failure(FailureReport),
}

impl TaskOutcome {
    /// The task this outcome belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::Proof(artifact) => &artifact.task_id,
            Self::Failure(report) => &report.task_id,
        }
    }
}

/// An in-memory proving key, loaded once from the key volume and shared
/// read-only across all worker slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    /// Circuit family this key proves.
    pub circuit_type: CircuitType,
    /// Circuit revision this key was generated for.
    pub circuit_version: String,
    /// Raw key bytes.
    pub bytes: Vec<u8>,
    /// Load timestamp in milliseconds since the Unix epoch.
    pub loaded_at: u64,
}

// --- Coordinator wire protocol ---

/// Registration request sent to the coordinator at startup.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Worker identity, built from the configured prover name prefix.
    pub prover_name: String,
    /// Circuit families this worker accepts.
    pub circuit_types: Vec<CircuitType>,
    /// Pinned circuit revision this worker proves.
    pub circuit_version: String,
    /// Verification keys for the accepted circuits, base64-encoded.
    #[serde_as(as = "Vec<Base64>")]
    pub vks: Vec<Vec<u8>>,
}

/// Coordinator login response carrying the session bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent claim and submit calls.
    pub token: String,
}

/// Task claim request, restricting assignment to the locally accepted
/// circuit set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    /// Worker identity.
    pub prover_name: String,
    /// Circuit families this worker accepts.
    pub circuit_types: Vec<CircuitType>,
    /// Pinned circuit revision this worker proves.
    pub circuit_version: String,
}

/// Task claim response. `task: None` means the queue is empty, a normal
/// outcome distinct from any error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTaskResponse {
    /// The assigned task, if any was available.
    pub task: Option<Task>,
}

// --- Proving service wire protocol ---

/// Remote proof task status, in the proving service's own naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvingTaskStatus {
    /// Accepted, waiting for a prover machine.
    #[serde(rename = "Queued")]
    Queued,
    /// Proof computation in progress.
    #[serde(rename = "In Progress")]
    Proving,
    /// Proof computed and retrievable.
    #[serde(rename = "Ready")]
    Ready,
    /// The service could not prove the submitted witness.
    #[serde(rename = "Failed")]
    Failed,
}

/// Proof computation request sent to the remote proving service.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveRequest {
    /// Circuit family to prove with.
    pub circuit_type: CircuitType,
    /// Circuit revision to prove with.
    pub circuit_version: String,
    /// Verification key for the circuit, base64-encoded.
    #[serde_as(as = "Base64")]
    pub vk: Vec<u8>,
    /// Witness payload to prove.
    pub witness: String,
}

/// Acknowledgement of a proof computation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveSubmitResponse {
    /// Identifier the service assigned to the computation.
    pub proof_id: String,
    /// Initial status, usually [`ProvingTaskStatus::Queued`].
    pub status: ProvingTaskStatus,
}

/// Status poll response for an in-flight proof computation.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStatusResponse {
    /// Identifier the service assigned to the computation.
    pub proof_id: String,
    /// Current computation status.
    pub status: ProvingTaskStatus,
    /// Proof bytes, present once the status is `Ready`.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default)]
    pub proof: Option<Vec<u8>>,
    /// Failure description, present once the status is `Failed`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Verification-key retrieval response.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkResponse {
    /// Verification key bytes, base64-encoded.
    #[serde_as(as = "Base64")]
    pub vk: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_type_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&CircuitType::Chunk).unwrap(), "\"chunk\"");
        let parsed: CircuitType = serde_json::from_str("\"bundle\"").unwrap();
        assert_eq!(parsed, CircuitType::Bundle);
    }

    #[test]
    fn proof_artifact_proof_bytes_travel_as_base64() {
        let artifact = ProofArtifact {
            task_id: "T1".to_string(),
            proof: vec![0xAB, 0xCD],
            produced_at: 1,
        };
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains("\"q80=\""));
        let back: ProofArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn empty_claim_response_decodes_to_no_task() {
        let resp: ClaimTaskResponse = serde_json::from_str("{\"task\":null}").unwrap();
        assert!(resp.task.is_none());
    }

    #[test]
    fn remote_status_uses_the_service_naming() {
        let status: ProvingTaskStatus = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(status, ProvingTaskStatus::Proving);
    }

    #[test]
    fn claimed_task_defaults_to_claimed_state() {
        let task: Task = serde_json::from_str(
            r#"{"task_id":"T1","circuit_type":"chunk","circuit_version":"v0.13.1","input":"{}"}"#,
        )
        .unwrap();
        assert_eq!(task.state, TaskState::Claimed);
    }
}
