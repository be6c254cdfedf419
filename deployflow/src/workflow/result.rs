//! The value a workflow run hands back to its caller.

use serde::{Deserialize, Serialize};

use crate::core::RunStatus;
use crate::errors::{RollbackFailure, StageFailure};
use crate::executor::StageOutcome;

use super::rollback::CleanupReport;

/// Outcome of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Run identifier.
    pub run_id: String,
    /// Overall status.
    pub status: RunStatus,
    /// Stages that succeeded, in execution order.
    pub succeeded_stages: Vec<String>,
    /// Stages that failed.
    pub failed_stages: Vec<StageFailure>,
    /// Deployments reverted to their previous revision.
    pub rolled_back_deployments: Vec<String>,
    /// Deployments removed because they were new in this run.
    pub deleted_deployments: Vec<String>,
    /// Jobs removed during the run.
    pub deleted_jobs: Vec<String>,
    /// Cleanup actions that did not succeed.
    pub rollback_failures: Vec<RollbackFailure>,
    /// Outcome of the failure stage, if one ran.
    pub failure_stage: Option<StageOutcome>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Description of the failure.
    pub error: Option<String>,
    /// Wall-clock duration.
    pub duration_ms: f64,
}

impl ExecutionResult {
    /// Creates an empty successful result.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Succeeded,
            succeeded_stages: Vec::new(),
            failed_stages: Vec::new(),
            rolled_back_deployments: Vec::new(),
            deleted_deployments: Vec::new(),
            deleted_jobs: Vec::new(),
            rollback_failures: Vec::new(),
            failure_stage: None,
            cancelled: false,
            error: None,
            duration_ms: 0.0,
        }
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Process exit code: 0 on success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Returns true if some cleanup action failed, leaving resources behind.
    #[must_use]
    pub fn is_partial_rollback(&self) -> bool {
        !self.rollback_failures.is_empty()
    }

    /// Records stage outcomes.
    pub fn record_stages<'a>(&mut self, outcomes: impl IntoIterator<Item = &'a StageOutcome>) {
        for outcome in outcomes {
            match &outcome.failure {
                None => self.succeeded_stages.push(outcome.stage.clone()),
                Some(failure) => self.failed_stages.push(failure.clone()),
            }
        }
    }

    /// Records what a rollback pass achieved.
    pub fn absorb_rollback(&mut self, report: CleanupReport) {
        self.deleted_jobs.extend(report.deleted_jobs);
        self.rolled_back_deployments
            .extend(report.rolled_back_deployments);
        self.deleted_deployments.extend(report.deleted_deployments);
        self.rollback_failures.extend(report.failures);
    }

    /// Marks the run failed with `error`.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
    }

    /// Serializes the result as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
