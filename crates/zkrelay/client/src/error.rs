use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Error type for coordinator and proving-service client operations.
///
/// The retry loop consults only [`Error::is_transient`]: transient failures
/// consume retry budget, everything else is surfaced immediately.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure (refused, reset, DNS). Transient.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// A single attempt exceeded the configured connection timeout. Transient.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The endpoint answered with a non-success status.
    ///
    /// Server-side statuses (5xx, 429) are transient; the remaining client
    /// errors are permanent rejections.
    #[error("{context} failed with status {status}: {body}")]
    Status {
        /// The operation that failed.
        context: &'static str,
        /// HTTP status returned by the endpoint.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The endpoint rejected our credentials. Permanent; signals
    /// misconfiguration, retrying cannot help.
    #[error("authentication rejected by {context}: {body}")]
    Auth {
        /// The operation that was rejected.
        context: &'static str,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The endpoint answered with a body we could not decode. Permanent.
    #[error("malformed response from {context}: {reason}")]
    Malformed {
        /// The operation whose response was undecodable.
        context: &'static str,
        /// Decode failure description.
        reason: String,
    },
    /// The proving service reported it could not prove the witness.
    ///
    /// Not retried by the client: resubmitting an identical witness to a
    /// deterministic prover cannot change the outcome. The caller reports
    /// this to the coordinator as a task failure.
    #[error("proof computation failed: {0}")]
    Computation(String),
    /// The retry budget was consumed by transient failures.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure, for diagnostics.
        last: Box<Error>,
    },
}

impl Error {
    /// Whether a retry with the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Auth { .. }
            | Self::Malformed { .. }
            | Self::Computation(_)
            | Self::Exhausted { .. } => false,
        }
    }

    /// Classifies a non-success HTTP status, pulling auth rejections out of
    /// the generic status bucket.
    pub(crate) fn from_status(context: &'static str, status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth { context, body },
            _ => Self::Status {
                context,
                status,
                body,
            },
        }
    }

    /// Wraps a response-decoding failure.
    pub(crate) fn malformed(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            context,
            reason: err.to_string(),
        }
    }
}
