//! Bounded exponential backoff for storage calls made on the vote path.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    config::AppConfig,
    dao::storage::{StorageError, StorageResult},
};

/// Retry budget shared by every storage step of a single vote.
///
/// Only transient failures are retried. Retrying stops after `max_attempts` per step or
/// once the next sleep would cross the deadline measured from when the policy was built.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    started: Instant,
    budget: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            started: Instant::now(),
            budget,
        }
    }

    /// Policy for one vote submission, bounded so the reconciler never races the live path.
    pub fn for_vote(config: &AppConfig) -> Self {
        let retry = &config.vote_retry;
        Self::new(
            retry.max_attempts,
            retry.initial_delay,
            retry.max_delay,
            config.live_retry_deadline(),
        )
    }

    /// Run `operation` until it succeeds, fails permanently or the budget is spent.
    pub async fn run<T, F, Fut>(&self, step: &'static str, mut operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        let mut delay = self.initial_delay;

        loop {
            let err: StorageError = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }

            let pause = jittered(delay);
            if self.started.elapsed() + pause > self.budget {
                warn!(step, attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }

            warn!(step, attempt, error = %err, "storage call failed; retrying");
            sleep(pause).await;
            attempt += 1;
            delay = (delay * 2).min(self.max_delay);
        }
    }
}

/// Half the delay plus a random share of the other half.
fn jittered(delay: Duration) -> Duration {
    let half = delay / 2;
    half + half.mul_f64(rand::rng().random::<f64>())
}
