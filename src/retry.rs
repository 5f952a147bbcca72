use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{info, warn};

pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Wall-clock budget shared by all attempts.
    pub total_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub stable: bool,
    pub attempts: u32,
    pub deadline_exhausted: bool,
}

/// Runs a health-check attempt up to `retries + 1` times within one overall deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `attempt` until it reports `true`, attempts run out, or the deadline passes.
    ///
    /// Each attempt is spawned as its own task and given only the budget that remains. An attempt
    /// that overruns is aborted; dropping its future releases whatever it owns, including any
    /// probe process.
    pub async fn run<F, Fut>(&self, label: &str, mut attempt: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let started = Instant::now();
        let mut attempts = 0;

        for n in 0..=self.policy.retries {
            let elapsed = started.elapsed();
            if elapsed >= self.policy.total_timeout {
                warn!(%label, "total time exceeded {:?}, giving up", self.policy.total_timeout);
                return RetryOutcome {
                    stable: false,
                    attempts,
                    deadline_exhausted: true,
                };
            }
            let remaining = self.policy.total_timeout - elapsed;
            if n > 0 {
                info!(%label, "retry {n}");
            }

            attempts += 1;
            let mut task = tokio::spawn(attempt(n));
            match time::timeout(remaining, &mut task).await {
                Ok(Ok(true)) => {
                    return RetryOutcome {
                        stable: true,
                        attempts,
                        deadline_exhausted: false,
                    }
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(%label, "attempt {n} failed: {e}"),
                Err(_) => {
                    warn!(%label, "attempt {n} timed out, abandoning");
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        RetryOutcome {
            stable: false,
            attempts,
            deadline_exhausted: started.elapsed() >= self.policy.total_timeout,
        }
    }
}
