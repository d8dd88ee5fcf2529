//! Bounded retries for single store calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tracing::warn;

use fundgraph_common::PipelineSettings;

/// Every attempt runs under `timeout`; attempts are spaced by
/// `backoff * 2^(attempt - 1)`.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            attempts: settings.upsert_retries.max(1),
            backoff: settings.retry_backoff,
            timeout: settings.upsert_timeout,
        }
    }

    /// Returns the last attempt's error once every attempt has failed.
    pub async fn run<T, W, F, Fut>(&self, what: W, entity: &str, op: F) -> anyhow::Result<T>
    where
        W: fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => e,
                Err(_) => anyhow!("timed out after {:?}", self.timeout),
            };
            warn!(step = %what, entity, attempt, max_attempts = self.attempts, error = %err, "Upsert attempt failed");
            last_err = Some(err);
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * 2u32.pow(attempt - 1)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no attempts made")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::from_settings(&PipelineSettings {
            upsert_retries: attempts,
            retry_backoff: Duration::from_millis(1),
            upsert_timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = policy(3, 1_000)
            .run("company", "Acme", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("flaky"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hung_call_times_out_on_every_attempt() {
        let calls = AtomicU32::new(0);
        let err = policy(2, 20)
            .run("investor", "Bar Capital", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<anyhow::Result<()>>().await
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(policy(0, 10).attempts, 1);
    }
}
