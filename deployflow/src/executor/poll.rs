//! Bounded polling of cluster resources.
//!
//! Waiting for a job or a deployment is an explicit state machine: a fixed
//! number of checks spaced `interval` apart, ending in `Ready`, `TimedOut`
//! or `Cancelled`. Errors from individual checks are logged and count as a
//! check, since the cluster API is eventually consistent.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::cluster::ClusterError;

/// How often and for how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between checks.
    pub interval: Duration,
    /// Overall time budget.
    pub timeout: Duration,
}

impl PollSchedule {
    /// Creates a new schedule.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Maximum number of checks the schedule allows (at least one).
    #[must_use]
    pub fn max_checks(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let checks = self.timeout.as_nanos() / self.interval.as_nanos();
        u32::try_from(checks).unwrap_or(u32::MAX).saturating_add(1)
    }
}

/// Progress of a poll loop that has not yet observed its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Checks made so far; more remain.
    Pending {
        /// Checks made so far.
        checks: u32,
    },
    /// The check budget ran out.
    TimedOut,
    /// The run was cancelled.
    Cancelled,
}

/// Terminal result of a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check returned a value.
    Ready(T),
    /// The budget ran out.
    TimedOut {
        /// The last check error, if the final checks failed.
        last_error: Option<ClusterError>,
    },
    /// The run was cancelled.
    Cancelled,
}

/// Calls `check` until it yields `Some`, the schedule runs out, or the run
/// is cancelled.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    schedule: PollSchedule,
    cancel: &CancellationToken,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ClusterError>>,
{
    let max_checks = schedule.max_checks();
    let mut state = PollState::Pending { checks: 0 };
    let mut last_error = None;

    loop {
        state = match state {
            PollState::Pending { checks } if checks >= max_checks => PollState::TimedOut,
            PollState::Pending { checks } => {
                if cancel.is_cancelled() {
                    PollState::Cancelled
                } else {
                    if checks > 0 {
                        tokio::select! {
                            () = tokio::time::sleep(schedule.interval) => {}
                            () = cancel.cancelled() => {}
                        }
                        if cancel.is_cancelled() {
                            return PollOutcome::Cancelled;
                        }
                    }
                    match check().await {
                        Ok(Some(value)) => {
                            debug!(what, checks = checks + 1, "poll condition met");
                            return PollOutcome::Ready(value);
                        }
                        Ok(None) => {
                            last_error = None;
                        }
                        Err(e) => {
                            warn!(what, error = %e, "status check failed");
                            last_error = Some(e);
                        }
                    }
                    PollState::Pending { checks: checks + 1 }
                }
            }
            PollState::TimedOut => {
                debug!(what, max_checks, "poll timed out");
                return PollOutcome::TimedOut { last_error };
            }
            PollState::Cancelled => return PollOutcome::Cancelled,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(timeout_ms: u64) -> PollSchedule {
        PollSchedule::new(Duration::from_millis(1), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_max_checks() {
        let schedule = PollSchedule::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(schedule.max_checks(), 11);

        let zero = PollSchedule::new(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(zero.max_checks(), 1);
    }

    #[tokio::test]
    async fn test_ready_after_some_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let outcome = poll_until("job", fast(100), &token, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n >= 3).then_some(n))
            }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test]
    async fn test_times_out_with_bounded_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let schedule = fast(5);

        let outcome: PollOutcome<()> = poll_until("deployment", schedule, &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut { last_error: None });
        assert_eq!(calls.load(Ordering::SeqCst), schedule.max_checks());
    }

    #[tokio::test]
    async fn test_errors_are_kept_until_timeout() {
        let token = CancellationToken::new();
        let outcome: PollOutcome<()> = poll_until("job", fast(2), &token, || async {
            Err(ClusterError::new("job_status", "unavailable"))
        })
        .await;

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                last_error: Some(ClusterError::new("job_status", "unavailable"))
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_check() {
        let token = CancellationToken::new();
        token.cancel("interrupt");

        let outcome: PollOutcome<()> =
            poll_until("job", fast(100), &token, || async { Ok(None) }).await;
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = Arc::new(CancellationToken::new());
        let schedule = PollSchedule::new(Duration::from_secs(60), Duration::from_secs(600));

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel("interrupt");
            })
        };

        let outcome: PollOutcome<()> = tokio::time::timeout(
            Duration::from_secs(5),
            poll_until("deployment", schedule, &token, || async { Ok(None) }),
        )
        .await
        .unwrap();

        canceller.await.unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }
}
