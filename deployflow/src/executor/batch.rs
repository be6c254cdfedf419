//! Batch stages: jobs with bounded attempts.

use std::sync::Arc;
use tracing::{info, warn};

use super::outcome::StageOutcome;
use super::poll::{poll_until, PollOutcome, PollSchedule};
use super::retry::{should_retry, RetryDecision, RetryState};
use super::{StageExecutor, StepContext};
use crate::cluster::{JobHandle, JobRequest};
use crate::core::{BatchConfig, EnvVars, JobStatus, StageSpec};
use crate::errors::StageFailureReason;

/// How a single job attempt ended.
enum AttemptResult {
    Succeeded,
    Failed,
    Cancelled,
}

impl StageExecutor {
    pub(super) async fn run_batch(
        &self,
        ctx: &StepContext,
        stage: &StageSpec,
        batch: &BatchConfig,
        name: &str,
        env: EnvVars,
    ) -> StageOutcome {
        let mut retry = RetryState::new(batch.max_attempts());
        let schedule = PollSchedule::new(self.config.poll_interval(), batch.completion_timeout());
        let env = env.into_vec();
        let mut last_job: Option<JobHandle> = None;

        loop {
            let attempt = retry.begin_attempt();
            let request = JobRequest {
                namespace: ctx.namespace.clone(),
                name: name.to_string(),
                image: ctx.image.to_string(),
                command: stage.command.clone(),
                args: stage.args.clone(),
                env: env.clone(),
                resources: stage.resources.clone(),
                attempt,
            };
            info!(stage = %stage.name, attempt, max_attempts = retry.max_attempts, "submitting job");

            let job = match self.cluster.create_or_replace_job(&request).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(stage = %stage.name, attempt, error = %e, "job submission failed");
                    return StageOutcome::failed(
                        stage,
                        name,
                        StageFailureReason::Cluster {
                            message: e.to_string(),
                        },
                    )
                    .with_job(last_job)
                    .with_attempts(attempt);
                }
            };
            last_job = Some(job.clone());

            match self.await_job(&job, schedule).await {
                AttemptResult::Succeeded => {
                    info!(stage = %stage.name, attempt, "job succeeded");
                    return StageOutcome::succeeded(stage, name)
                        .with_job(last_job)
                        .with_attempts(attempt);
                }
                AttemptResult::Cancelled => {
                    return StageOutcome::failed(stage, name, StageFailureReason::Cancelled)
                        .with_job(last_job)
                        .with_attempts(attempt);
                }
                AttemptResult::Failed => {
                    self.logs.print_logs(&job.namespace, &job.name).await;
                }
            }

            match should_retry(&retry, &self.config.retry) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        stage = %stage.name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "job attempt failed, retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.cancel.cancelled() => {
                            return StageOutcome::failed(stage, name, StageFailureReason::Cancelled)
                                .with_job(last_job)
                                .with_attempts(attempt);
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(stage = %stage.name, attempts = attempt, "job retries exhausted");
                    return StageOutcome::failed(
                        stage,
                        name,
                        StageFailureReason::RetriesExhausted { attempts: attempt },
                    )
                    .with_job(last_job)
                    .with_attempts(attempt);
                }
            }
        }
    }

    async fn await_job(&self, job: &JobHandle, schedule: PollSchedule) -> AttemptResult {
        let cluster = Arc::clone(&self.cluster);
        let polled = poll_until("job", schedule, &self.cancel, move || {
            let cluster = Arc::clone(&cluster);
            let job = job.clone();
            async move {
                let status = cluster.job_status(&job).await?;
                Ok(status.is_terminal().then_some(status))
            }
        })
        .await;

        match polled {
            PollOutcome::Ready(JobStatus::Succeeded) => AttemptResult::Succeeded,
            PollOutcome::Ready(_) => AttemptResult::Failed,
            PollOutcome::TimedOut { last_error } => {
                warn!(
                    job = %job.name,
                    timeout_s = schedule.timeout.as_secs(),
                    last_error = ?last_error.map(|e| e.to_string()),
                    "job did not complete in time"
                );
                AttemptResult::Failed
            }
            PollOutcome::Cancelled => AttemptResult::Cancelled,
        }
    }
}
