use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use zkrelay_types::unix_ms;

use crate::Error;

/// Last-known connectivity of one network session, recorded by its client
/// and read by the health listener.
///
/// A value of `0` means "never happened". All fields are epoch milliseconds.
#[derive(Debug, Default)]
pub struct SessionHealth {
    last_success: AtomicU64,
    last_exhausted: AtomicU64,
}

impl SessionHealth {
    /// Creates a fresh record with no contact history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful wire exchange.
    pub fn record_success(&self) {
        self.last_success.store(unix_ms(), Ordering::Relaxed);
    }

    /// Records an exhausted retry budget.
    pub fn record_exhausted(&self) {
        self.last_exhausted.store(unix_ms(), Ordering::Relaxed);
    }

    /// Timestamp of the last successful exchange, if any.
    pub fn last_success(&self) -> Option<u64> {
        match self.last_success.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Whether this session recently burned through its retry budget with no
    /// successful contact since.
    ///
    /// A session that has never been exercised is not degraded: at startup
    /// the clients have not yet had the opportunity to fail. Ties resolve in
    /// favor of the success; a contact recorded in the same millisecond as
    /// the exhaustion still clears the degradation.
    pub fn degraded(&self, window: Duration) -> bool {
        let exhausted = self.last_exhausted.load(Ordering::Relaxed);
        if exhausted == 0 {
            return false;
        }
        let success = self.last_success.load(Ordering::Relaxed);
        exhausted > success && unix_ms().saturating_sub(exhausted) <= window.as_millis() as u64
    }

    /// Updates this record from an operation result and passes it through.
    pub(crate) fn track<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        match &result {
            Ok(_) => self.record_success(),
            Err(Error::Exhausted { .. }) => self.record_exhausted(),
            Err(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn fresh_session_is_not_degraded() {
        assert!(!SessionHealth::new().degraded(WINDOW));
    }

    #[test]
    fn exhaustion_degrades_until_the_next_success() {
        let health = SessionHealth::new();
        health.record_exhausted();
        assert!(health.degraded(WINDOW));

        health.record_success();
        assert!(!health.degraded(WINDOW));
    }

    #[test]
    fn a_success_in_the_same_millisecond_clears_degradation() {
        let health = SessionHealth::new();
        let now = unix_ms();
        health.last_exhausted.store(now, Ordering::Relaxed);
        health.last_success.store(now, Ordering::Relaxed);
        assert!(!health.degraded(WINDOW));
    }

    #[test]
    fn track_records_success_and_exhaustion() {
        let health = SessionHealth::new();
        assert!(health.track(Ok(())).is_ok());
        assert!(health.last_success().is_some());

        // the exhaustion must be strictly later than the success to count
        std::thread::sleep(Duration::from_millis(5));
        let exhausted = Error::Exhausted {
            attempts: 3,
            last: Box::new(Error::Timeout(Duration::from_secs(1))),
        };
        assert!(health.track::<()>(Err(exhausted)).is_err());
        assert!(health.degraded(WINDOW));
    }
}
