//! Error types for the deployflow engine.
//!
//! Errors are split into a small tagged taxonomy. Each value can be asked
//! whether it is retryable, whether it should trigger a rollback and whether
//! it is fatal to the run, so callers never need to match on the variant to
//! decide what to do next.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::cluster::ClusterError;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// Malformed configuration (image string, namespace, stage graph).
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The image registry could not be reached.
    #[error("cannot connect to {registry} to check image {image}: {message}")]
    RegistryUnreachable {
        /// Registry base URL.
        registry: String,
        /// The image being checked.
        image: String,
        /// Underlying failure.
        message: String,
    },

    /// A stage exhausted its retries or failed to become ready.
    #[error("{0}")]
    StageFailure(#[from] StageFailure),

    /// Reverting a cluster resource failed.
    #[error("{0}")]
    RollbackFailure(#[from] RollbackFailure),

    /// Pod logs could not be fetched.
    #[error("cannot get logs for {name}: {message}")]
    LogRetrieval {
        /// The stage or pod name.
        name: String,
        /// Underlying failure.
        message: String,
    },

    /// A run precondition was violated.
    #[error("{0}")]
    WorkflowExecution(String),

    /// A raw cluster API call failed.
    #[error("{0}")]
    Cluster(#[from] ClusterError),

    /// The run was cancelled by the caller.
    #[error("workflow cancelled: {0}")]
    Cancelled(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployflowError {
    /// Creates a workflow execution error.
    #[must_use]
    pub fn workflow(message: impl Into<String>) -> Self {
        Self::WorkflowExecution(message.into())
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::RegistryUnreachable { .. } => "registry_unreachable",
            Self::StageFailure(_) => "stage_failure",
            Self::RollbackFailure(_) => "rollback_failure",
            Self::LogRetrieval { .. } => "log_retrieval_failure",
            Self::WorkflowExecution(_) => "workflow_execution_error",
            Self::Cluster(_) => "cluster_error",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }

    /// Whether this error, raised while executing steps, requires rollback.
    #[must_use]
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            Self::StageFailure(_) | Self::Cluster(_) | Self::Cancelled(_)
        )
    }

    /// Whether the run must abort immediately without touching the cluster.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::RegistryUnreachable { .. }
                | Self::WorkflowExecution(_)
                | Self::Io(_)
        )
    }

    /// Process exit code for a run that ended with this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Extra diagnostics attached to configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-IMAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised when project or engine configuration is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error, if any.
    pub stages: Vec<String>,
    /// Optional diagnostics.
    pub info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the diagnostics.
    #[must_use]
    pub fn with_info(mut self, info: ErrorInfo) -> Self {
        self.info = Some(info);
        self
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StageFailureReason {
    /// Every batch attempt failed.
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// A service deployment did not become ready in time.
    ReadinessTimeout {
        /// The timeout that elapsed.
        timeout_seconds: u64,
    },
    /// The run was cancelled while the stage was in flight.
    Cancelled,
    /// A cluster API call needed by the stage failed.
    Cluster {
        /// Underlying failure.
        message: String,
    },
    /// The stage task itself did not complete.
    Internal {
        /// Underlying failure.
        message: String,
    },
}

/// A stage that did not reach a successful terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("stage={stage} failed: {}", describe_reason(.reason))]
pub struct StageFailure {
    /// The stage name.
    pub stage: String,
    /// Failure reason.
    pub reason: StageFailureReason,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, reason: StageFailureReason) -> Self {
        Self {
            stage: stage.into(),
            reason,
        }
    }

    /// Whether the failure came from cancellation rather than the stage itself.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.reason == StageFailureReason::Cancelled
    }
}

fn describe_reason(reason: &StageFailureReason) -> String {
    match reason {
        StageFailureReason::RetriesExhausted { attempts } => {
            format!("job failed after {attempts} attempt(s)")
        }
        StageFailureReason::ReadinessTimeout { timeout_seconds } => {
            format!("deployment not ready within {timeout_seconds}s")
        }
        StageFailureReason::Cancelled => "cancelled".to_string(),
        StageFailureReason::Cluster { message } => format!("cluster error: {message}"),
        StageFailureReason::Internal { message } => format!("internal error: {message}"),
    }
}

/// A cleanup action that failed during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("failed to {action} {resource}: {message}")]
pub struct RollbackFailure {
    /// The resource name.
    pub resource: String,
    /// The attempted action (e.g. "roll back deployment").
    pub action: String,
    /// Underlying failure.
    pub message: String,
}

impl RollbackFailure {
    /// Creates a new rollback failure.
    #[must_use]
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}
