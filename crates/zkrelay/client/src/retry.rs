use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::Error;

/// Bounded retry with a fixed wait between attempts and a per-attempt
/// timeout.
///
/// Stateless and reentrant: one instance may be driven concurrently from
/// every worker slot. Each of the two network sessions owns its own instance
/// so their failure domains stay isolated.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    wait_interval: Duration,
    connection_timeout: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the configuration triple of an endpoint.
    ///
    /// A `retry_count` of zero is clamped to a single attempt.
    pub fn new(retry_count: u32, retry_wait_time_sec: u64, connection_timeout_sec: u64) -> Self {
        Self {
            max_attempts: retry_count.max(1),
            wait_interval: Duration::from_secs(retry_wait_time_sec),
            connection_timeout: Duration::from_secs(connection_timeout_sec),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is exhausted.
    ///
    /// Each attempt runs under the per-attempt connection timeout; an elapsed
    /// deadline counts as a transient failure. Permanent failures are
    /// returned immediately without consuming the remaining budget. After
    /// `max_attempts` transient failures the last underlying failure is
    /// returned inside [`Error::Exhausted`].
    pub async fn execute<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1u32;
        loop {
            let result = match tokio::time::timeout(self.connection_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.connection_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= self.max_attempts {
                        return Err(Error::Exhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    warn!(what, attempt, error = %err, "transient failure, retrying");
                    tokio::time::sleep(self.wait_interval).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
