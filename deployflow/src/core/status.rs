//! Status enums for stages, jobs and workflow runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the cluster for a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The job has active pods.
    Running,
    /// The job completed successfully.
    Succeeded,
    /// The job failed.
    Failed,
}

impl JobStatus {
    /// Returns true if the job will not change status again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Overall outcome of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded.
    Succeeded,
    /// A step failed or the run was cancelled.
    Failed,
}

impl RunStatus {
    /// Process exit code for this status.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed => 1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Checking the namespace and materializing the project.
    #[default]
    Initializing,
    /// Checking the runtime image.
    Validating,
    /// Running steps.
    Executing,
    /// All steps succeeded.
    Succeeded,
    /// Reverting resources after a failed step.
    RollingBack,
    /// The run failed.
    Failed,
    /// Running the configured failure-stage.
    RunningFailureStage,
}

impl WorkflowState {
    /// Returns true if moving to `next` is a legal transition.
    ///
    /// `Initializing` and `Validating` may jump straight to `Failed` when a
    /// pre-flight check aborts the run.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Validating | Self::Failed)
                | (Self::Validating, Self::Executing | Self::Failed)
                | (Self::Executing, Self::Succeeded | Self::RollingBack)
                | (Self::RollingBack, Self::Failed)
                | (Self::Failed, Self::RunningFailureStage)
                | (Self::RunningFailureStage, Self::Failed)
        )
    }

    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Validating => write!(f, "validating"),
            Self::Executing => write!(f, "executing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::RollingBack => write!(f, "rolling_back"),
            Self::Failed => write!(f, "failed"),
            Self::RunningFailureStage => write!(f, "running_failure_stage"),
        }
    }
}
