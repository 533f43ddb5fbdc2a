use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;
use zkrelay_types::{
    CircuitType, KeyHandle, ProofArtifact, ProofStatusResponse, ProveRequest, ProveSubmitResponse,
    ProvingTaskStatus, Task, TaskState, VkResponse, unix_ms,
};

use crate::{Error, RetryPolicy, SessionHealth};

/// Base path of the remote proving API, joined onto the configured endpoint.
const API_PATH: &str = "/api/v1/";

/// Delay between status polls while a proof is being computed remotely.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Overall deadline for one proof computation, submit included. A task the
/// service leaves queued past this point is given up on, freeing the slot.
const PROVING_DEADLINE: Duration = Duration::from_secs(3600);

/// Client for the remote proof-computation API.
///
/// Authenticated by a bearer `api_key`. Shared by all worker slots; its
/// [`RetryPolicy`] instance is independent of the coordinator's so the two
/// failure domains never share a budget.
#[derive(Debug)]
pub struct ProvingServiceClient {
    api_url: Url,
    api_key: String,
    http: Client,
    retry: RetryPolicy,
    poll_interval: Duration,
    proving_deadline: Duration,
    health: Arc<SessionHealth>,
}

impl ProvingServiceClient {
    /// Creates a client against the proving service endpoint.
    pub fn new(
        base_url: &str,
        api_key: String,
        retry: RetryPolicy,
        http: Client,
    ) -> Result<Self, Error> {
        let api_url = Url::parse(base_url)
            .and_then(|base| base.join(API_PATH))
            .map_err(|e| Error::malformed("proving service url", e))?;
        Ok(Self {
            api_url,
            api_key,
            http,
            retry,
            poll_interval: POLL_INTERVAL,
            proving_deadline: PROVING_DEADLINE,
            health: Arc::new(SessionHealth::new()),
        })
    }

    /// Overrides the per-proof deadline.
    pub fn with_proving_deadline(mut self, deadline: Duration) -> Self {
        self.proving_deadline = deadline;
        self
    }

    /// Connectivity record observed by the health listener.
    pub fn health(&self) -> Arc<SessionHealth> {
        self.health.clone()
    }

    /// Fetches the verification key for a circuit, used when registering
    /// with the coordinator.
    #[instrument(skip_all, fields(%circuit_type, circuit_version))]
    pub async fn get_vk(
        &self,
        circuit_type: CircuitType,
        circuit_version: &str,
    ) -> Result<Vec<u8>, Error> {
        let url = self.url(&format!("circuit/{circuit_type}/{circuit_version}/vk"))?;
        let result = self
            .retry
            .execute("get_vk", || self.get_json::<VkResponse>(url.clone(), "get_vk"))
            .await;
        Ok(self.health.track(result)?.vk)
    }

    /// Computes a proof for `task` with the resolved proving key.
    ///
    /// Internally a submit-plus-poll cycle against the remote API, but
    /// externally one suspension point per task. Each wire call runs under
    /// this client's retry policy, and the whole cycle under the proving
    /// deadline so a task the service never resolves cannot wedge its slot.
    /// A remote computation failure is returned as [`Error::Computation`]
    /// and is not retried here: the prover is deterministic, an identical
    /// witness cannot produce a different outcome.
    #[instrument(skip_all, fields(task_id = %task.task_id, circuit_type = %task.circuit_type))]
    pub async fn prove(&self, task: &mut Task, key: &KeyHandle) -> Result<ProofArtifact, Error> {
        let submitted = self.health.track(self.submit(task, key).await)?;
        debug!(proof_id = %submitted.proof_id, "proof request accepted");
        task.state = TaskState::Proving;

        tokio::time::timeout(
            self.proving_deadline,
            self.await_proof(&task.task_id, &submitted.proof_id),
        )
        .await
        .map_err(|_| Error::Timeout(self.proving_deadline))?
    }

    async fn await_proof(&self, task_id: &str, proof_id: &str) -> Result<ProofArtifact, Error> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let status = self.health.track(self.poll_status(proof_id).await)?;
            match status.status {
                ProvingTaskStatus::Queued | ProvingTaskStatus::Proving => continue,
                ProvingTaskStatus::Failed => {
                    return Err(Error::Computation(
                        status
                            .error
                            .unwrap_or_else(|| "proving service reported failure".to_string()),
                    ));
                }
                ProvingTaskStatus::Ready => {
                    let proof = status.proof.ok_or_else(|| {
                        Error::malformed("poll_status", "status Ready without proof bytes")
                    })?;
                    info!(proof_id, proof_bytes = proof.len(), "proof ready");
                    return Ok(ProofArtifact {
                        task_id: task_id.to_string(),
                        proof,
                        produced_at: unix_ms(),
                    });
                }
            }
        }
    }

    async fn submit(&self, task: &Task, key: &KeyHandle) -> Result<ProveSubmitResponse, Error> {
        let url = self.url(&format!(
            "circuit/{}/{}/prove",
            task.circuit_type, task.circuit_version
        ))?;
        let request = ProveRequest {
            circuit_type: task.circuit_type,
            circuit_version: task.circuit_version.clone(),
            vk: key.bytes.clone(),
            witness: task.input.clone(),
        };

        self.retry
            .execute("prove", || self.post_json(url.clone(), &request, "prove"))
            .await
    }

    async fn poll_status(&self, proof_id: &str) -> Result<ProofStatusResponse, Error> {
        let url = self.url(&format!("proof/{proof_id}"))?;
        self.retry
            .execute("poll_status", || {
                self.get_json::<ProofStatusResponse>(url.clone(), "poll_status")
            })
            .await
    }

    async fn get_json<Resp>(&self, url: Url, context: &'static str) -> Result<Resp, Error>
    where
        Resp: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(context, status, body));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::malformed(context, e))
    }

    async fn post_json<Req, Resp>(
        &self,
        url: Url,
        request: &Req,
        context: &'static str,
    ) -> Result<Resp, Error>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(context, status, body));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::malformed(context, e))
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.api_url
            .join(path)
            .map_err(|e| Error::malformed("proving service url", e))
    }
}
