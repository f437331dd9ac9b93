//! Scheduled jobs and the retry/lease contract they share.

pub mod ingest;
pub mod rebuild;

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::JobError;

/// Lease key held for the whole of an ingest cycle.
pub const INGEST_LEASE: &str = "lease:ingest";
/// Lease key held for the whole of a static rebuild cycle.
pub const REBUILD_LEASE: &str = "lease:rebuild";

const LEASE_SLACK: Duration = Duration::from_secs(30);

/// How one triggered cycle ended. Scheduling treats all three as final;
/// only the next trigger runs the job again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { attempts: u32 },
    /// Another run of the same job held the lease; nothing was attempted.
    Skipped,
    /// Retries were exhausted, the budget overran, or the lease failed.
    Abandoned { attempts: u32 },
}

/// Lease TTL long enough to outlive every attempt of one cycle, so a
/// crashed holder cannot block the job forever.
fn lease_ttl(max_attempts: u32, run_budget: Duration, retry_delay: Duration) -> Duration {
    (run_budget + retry_delay) * max_attempts.max(1) + LEASE_SLACK
}

/// Run one cycle of a job under its lease.
///
/// The lease is taken before the first attempt and released at the end
/// whatever the outcome. Attempts are budget-bounded; a budget overrun
/// abandons the cycle outright instead of burning the remaining retries,
/// the normal schedule picks the job up again. Retryable failures re-run
/// the whole attempt after `retry_delay`.
pub(crate) async fn run_cycle<T, F, Fut>(
    cache: &dyn Cache,
    job: &'static str,
    lease_key: &'static str,
    max_attempts: u32,
    retry_delay: Duration,
    run_budget: Duration,
    attempt_fn: F,
) -> CycleOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let token = Uuid::new_v4().to_string();
    let ttl = lease_ttl(max_attempts, run_budget, retry_delay);

    match cache.try_lock(lease_key, &token, ttl).await {
        Ok(true) => {}
        Ok(false) => {
            info!(job, "previous run still holds the lease, skipping trigger");
            return CycleOutcome::Skipped;
        }
        Err(error) => {
            error!(job, %error, "could not acquire run lease");
            return CycleOutcome::Abandoned { attempts: 0 };
        }
    }

    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        match timeout(run_budget, attempt_fn()).await {
            Ok(Ok(_)) => {
                info!(job, attempt, "cycle completed");
                break CycleOutcome::Completed { attempts: attempt };
            }
            Ok(Err(e)) if e.retryable() && attempt < max_attempts => {
                warn!(
                    job,
                    attempt,
                    stage = e.stage(),
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(retry_delay).await;
            }
            Ok(Err(e)) => {
                error!(
                    job,
                    attempt,
                    stage = e.stage(),
                    error = %e,
                    "cycle abandoned"
                );
                break CycleOutcome::Abandoned { attempts: attempt };
            }
            Err(_) => {
                error!(
                    job,
                    attempt,
                    budget_secs = run_budget.as_secs(),
                    "attempt exceeded execution budget, abandoning cycle"
                );
                break CycleOutcome::Abandoned { attempts: attempt };
            }
        }
    };

    if let Err(error) = cache.unlock(lease_key, &token).await {
        warn!(job, %error, "failed to release run lease, it will expire on its own");
    }

    outcome
}
