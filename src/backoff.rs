//! A single reusable back-off policy object (§9 "Retry with exponential
//! back-off"). Every retriable operation in the crate — catalog `Busy`
//! responses, the CDC applier's sentinel sync — is wrapped by
//! [`Backoff::retry`] rather than hand-rolling its own loop.

use std::time::{Duration, Instant};

use crate::constants::{BACKOFF_BASE, BACKOFF_CAP, BACKOFF_TOTAL};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    total: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: BACKOFF_BASE,
            cap: BACKOFF_CAP,
            total: BACKOFF_TOTAL,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, total: Duration) -> Self {
        Self { base, cap, total }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.cap)
    }

    /// Run `op` until it stops reporting itself as retriable, the total
    /// time budget expires (returns `Busy`), or it returns a terminal
    /// error. `op` returns `Ok(Some(value))` on success, `Ok(None)` to
    /// request a retry, or `Err` for a non-retriable failure.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Option<T>>>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            match op().await? {
                Some(value) => return Ok(value),
                None => {
                    if start.elapsed() >= self.total {
                        return Err(EngineError::Busy(format!(
                            "{label}: still locked after {:?}",
                            self.total
                        ))
                        .into());
                    }
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Synchronous variant for use inside the catalog store, which is
    /// driven by blocking `rusqlite` calls from synchronous worker code
    /// paths.
    pub fn retry_blocking<T, F>(&self, label: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> anyhow::Result<Option<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            match op()? {
                Some(value) => return Ok(value),
                None => {
                    if start.elapsed() >= self.total {
                        return Err(EngineError::Busy(format!(
                            "{label}: still locked after {:?}",
                            self.total
                        ))
                        .into());
                    }
                    std::thread::sleep(self.delay_for_attempt(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let b = Backoff::new(
            Duration::from_millis(10),
            Duration::from_millis(350),
            Duration::from_secs(5),
        );
        assert_eq!(b.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(b.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(b.delay_for_attempt(5), Duration::from_millis(320));
        assert_eq!(b.delay_for_attempt(10), Duration::from_millis(350));
    }

    #[test]
    fn retry_blocking_succeeds_eventually() {
        let b = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(1),
        );
        let mut calls = 0;
        let result = b.retry_blocking("test", || {
            calls += 1;
            if calls < 3 {
                Ok(None)
            } else {
                Ok(Some(calls))
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_blocking_gives_up_after_total() {
        let b = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        let result: anyhow::Result<()> = b.retry_blocking("test", || Ok(None));
        assert!(result.is_err());
    }
}
