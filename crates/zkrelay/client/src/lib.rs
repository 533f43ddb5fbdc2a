//! HTTP clients for the two endpoints the relay talks to.
//!
//! [`CoordinatorClient`] speaks the coordinator protocol (login, task claim,
//! result submission); [`ProvingServiceClient`] speaks the remote proving
//! API (proof submission, status polling, verification-key retrieval).
//!
//! Both clients wrap every wire call in their own [`RetryPolicy`] instance.
//! The two policies are deliberately independent: a proving-service hiccup
//! must not exhaust the coordinator's retry budget, and vice versa. Clients
//! record outcomes into a shared [`SessionHealth`] so the health listener can
//! derive readiness without touching the network.

mod coordinator;
mod error;
mod proving;
mod retry;
mod session;

pub use coordinator::CoordinatorClient;
pub use error::Error;
pub use proving::ProvingServiceClient;
pub use retry::RetryPolicy;
pub use session::SessionHealth;
