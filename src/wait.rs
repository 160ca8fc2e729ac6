//! Bounded waiting
//!
//! Exponential backoff capped at a maximum delay, always under a hard
//! deadline. Exceeding the deadline is a `DeadlineExceeded` error.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::errors::{CdcError, CdcResult};
use crate::observability::Event;
use crate::transport::ClusterClient;

/// Exponential backoff: `initial`, `2*initial`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            current: initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    /// Delay before the next attempt; grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2))
    }
}

/// Poll `probe` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(
    what: &str,
    timeout: Duration,
    mut backoff: Backoff,
    mut probe: F,
) -> CdcResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        if probe().await {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(CdcError::DeadlineExceeded {
                what: what.to_string(),
                waited_ms: (now - started).as_millis() as u64,
            });
        }
        sleep(backoff.next_delay().min(deadline - now)).await;
    }
}

/// Wait until a cluster's health probe answers healthy.
pub async fn wait_healthy(
    cluster_id: &str,
    client: &dyn ClusterClient,
    timeout: Duration,
) -> CdcResult<()> {
    debug!(event = %Event::HealthWait, cluster_id, timeout_ms = timeout.as_millis() as u64, "waiting for health");
    wait_until(
        &format!("cluster '{}' to become healthy", cluster_id),
        timeout,
        Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
        move || async move { matches!(client.healthz().await, Ok(true)) },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(35));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(35));
        assert_eq!(backoff.next_delay(), Duration::from_millis(35));
        assert_eq!(backoff.attempts(), 4);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_wait_until_succeeds_eventually() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        wait_until(
            "third call",
            Duration::from_secs(5),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
            move || async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_deadline() {
        let err = wait_until(
            "never",
            Duration::from_millis(30),
            Backoff::new(Duration::from_millis(5), Duration::from_millis(10)),
            || async { false },
        )
        .await
        .unwrap_err();
        match err {
            CdcError::DeadlineExceeded { what, waited_ms } => {
                assert_eq!(what, "never");
                assert!(waited_ms >= 30);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
