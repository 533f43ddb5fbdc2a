use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use url::Url;
use zkrelay_types::{
    ClaimTaskRequest, ClaimTaskResponse, LoginRequest, LoginResponse, Task, TaskOutcome,
};

use crate::{Error, RetryPolicy, SessionHealth};

const LOGIN_PATH: &str = "v1/login";
const CLAIM_PATH: &str = "v1/get_task";
const SUBMIT_PATH: &str = "v1/submit_proof";

/// Client for the rollup coordinator.
///
/// One long-lived instance is shared by all worker slots; calls are
/// independent and safe to issue concurrently, the underlying
/// [`reqwest::Client`] pools connections. Every wire call runs under this
/// client's own [`RetryPolicy`].
#[derive(Debug)]
pub struct CoordinatorClient {
    base_url: Url,
    prover_name: String,
    circuit_types: Vec<zkrelay_types::CircuitType>,
    circuit_version: String,
    http: Client,
    retry: RetryPolicy,
    token: RwLock<Option<String>>,
    health: Arc<SessionHealth>,
}

impl CoordinatorClient {
    /// Creates a client against the coordinator endpoint.
    ///
    /// `prover_name` is this worker's identity when claiming; the circuit
    /// set and version restrict which tasks the coordinator may assign.
    pub fn new(
        base_url: &str,
        prover_name: String,
        circuit_types: Vec<zkrelay_types::CircuitType>,
        circuit_version: String,
        retry: RetryPolicy,
        http: Client,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(base_url).map_err(|e| Error::malformed("coordinator url", e))?;
        Ok(Self {
            base_url,
            prover_name,
            circuit_types,
            circuit_version,
            http,
            retry,
            token: RwLock::new(None),
            health: Arc::new(SessionHealth::new()),
        })
    }

    /// Connectivity record observed by the health listener.
    pub fn health(&self) -> Arc<SessionHealth> {
        self.health.clone()
    }

    /// Registers this worker with the coordinator and stores the session
    /// token.
    ///
    /// `vks` are the verification keys of the accepted circuits, fetched
    /// from the proving service beforehand. An auth rejection here is a
    /// permanent misconfiguration and is not retried.
    #[instrument(skip_all, fields(prover_name = %self.prover_name))]
    pub async fn login(&self, vks: Vec<Vec<u8>>) -> Result<(), Error> {
        let request = LoginRequest {
            prover_name: self.prover_name.clone(),
            circuit_types: self.circuit_types.clone(),
            circuit_version: self.circuit_version.clone(),
            vks,
        };

        let result = self
            .retry
            .execute("login", || self.login_once(&request))
            .await;
        let response = self.health.track(result)?;

        *self.token.write().await = Some(response.token);
        info!("registered with coordinator");
        Ok(())
    }

    async fn login_once(&self, request: &LoginRequest) -> Result<LoginResponse, Error> {
        let url = self.url(LOGIN_PATH)?;
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("login", status, body));
        }
        response
            .json::<LoginResponse>()
            .await
            .map_err(|e| Error::malformed("login", e))
    }

    /// Polls the coordinator for an assignable task.
    ///
    /// `Ok(None)` means the queue is empty. It is a normal outcome, not a
    /// failure: it never consumes retry budget, the caller simply backs off
    /// and polls again after its idle interval.
    #[instrument(skip_all)]
    pub async fn claim_task(&self) -> Result<Option<Task>, Error> {
        let result = self
            .retry
            .execute("claim_task", || self.claim_once())
            .await;
        self.health.track(result)
    }

    async fn claim_once(&self) -> Result<Option<Task>, Error> {
        let url = self.url(CLAIM_PATH)?;
        let request = ClaimTaskRequest {
            prover_name: self.prover_name.clone(),
            circuit_types: self.circuit_types.clone(),
            circuit_version: self.circuit_version.clone(),
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(self.token().await?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("claim_task", status, body));
        }

        let claimed = response
            .json::<ClaimTaskResponse>()
            .await
            .map_err(|e| Error::malformed("claim_task", e))?;
        if let Some(task) = &claimed.task {
            debug!(task_id = %task.task_id, circuit_type = %task.circuit_type, "claimed task");
        }
        Ok(claimed.task)
    }

    /// Reports a task outcome, either a computed proof or a terminal
    /// failure, so the coordinator can close or reassign the task.
    ///
    /// Exhausted retries are returned to the caller; for a completed proof
    /// the worker escalates them to the process error surface, an
    /// un-reported proof must never be dropped silently.
    #[instrument(skip_all, fields(task_id = %outcome.task_id()))]
    pub async fn submit_result(&self, outcome: &TaskOutcome) -> Result<(), Error> {
        let result = self
            .retry
            .execute("submit_result", || self.submit_once(outcome))
            .await;
        self.health.track(result)
    }

    async fn submit_once(&self, outcome: &TaskOutcome) -> Result<(), Error> {
        let url = self.url(SUBMIT_PATH)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token().await?)
            .json(outcome)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("submit_result", status, body));
        }
        Ok(())
    }

    async fn token(&self) -> Result<String, Error> {
        self.token.read().await.clone().ok_or(Error::Auth {
            context: "coordinator",
            body: "not logged in".to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::malformed("coordinator url", e))
    }
}
