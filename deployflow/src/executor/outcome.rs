//! Results of running stages and steps.

use serde::{Deserialize, Serialize};

use crate::cluster::{DeploymentHandle, JobHandle};
use crate::core::{StageSpec, StageStatus};
use crate::errors::{StageFailure, StageFailureReason};

/// Result of running a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: String,
    /// `batch` or `service`.
    pub kind: String,
    /// Name of the cluster resource backing the stage.
    pub resource_name: String,
    /// Terminal status.
    pub status: StageStatus,
    /// Batch attempts made (one for services).
    pub attempts: u32,
    /// The last job submitted, for batch stages.
    pub job: Option<JobHandle>,
    /// The deployment touched, for service stages.
    pub deployment: Option<DeploymentHandle>,
    /// Cluster-internal URL of a service stage.
    pub service_url: Option<String>,
    /// External route of a service stage with ingress.
    pub ingress_route: Option<String>,
    /// Why the stage failed.
    pub failure: Option<StageFailure>,
    /// Wall-clock duration.
    pub duration_ms: f64,
}

impl StageOutcome {
    /// Creates a successful outcome with no cluster handles yet.
    #[must_use]
    pub fn succeeded(stage: &StageSpec, resource_name: impl Into<String>) -> Self {
        Self {
            stage: stage.name.clone(),
            kind: stage.kind.to_string(),
            resource_name: resource_name.into(),
            status: StageStatus::Succeeded,
            attempts: 1,
            job: None,
            deployment: None,
            service_url: None,
            ingress_route: None,
            failure: None,
            duration_ms: 0.0,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(
        stage: &StageSpec,
        resource_name: impl Into<String>,
        reason: StageFailureReason,
    ) -> Self {
        Self {
            status: StageStatus::Failed,
            failure: Some(StageFailure::new(stage.name.clone(), reason)),
            ..Self::succeeded(stage, resource_name)
        }
    }

    /// Sets the job handle.
    #[must_use]
    pub fn with_job(mut self, job: Option<JobHandle>) -> Self {
        self.job = job;
        self
    }

    /// Sets the deployment handle.
    #[must_use]
    pub fn with_deployment(mut self, deployment: DeploymentHandle) -> Self {
        self.deployment = Some(deployment);
        self
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// Result of running every stage in a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Index of the step.
    pub index: usize,
    /// One outcome per stage, in step order.
    pub outcomes: Vec<StageOutcome>,
}

impl StepOutcome {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(StageOutcome::is_success)
    }

    /// Outcomes of failed stages.
    pub fn failed(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Outcomes of successful stages.
    pub fn succeeded(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Every job submitted during the step.
    pub fn jobs(&self) -> impl Iterator<Item = &JobHandle> {
        self.outcomes.iter().filter_map(|o| o.job.as_ref())
    }

    /// Every deployment touched during the step.
    pub fn deployments(&self) -> impl Iterator<Item = &DeploymentHandle> {
        self.outcomes.iter().filter_map(|o| o.deployment.as_ref())
    }

    /// Returns true if a service stage failed.
    #[must_use]
    pub fn has_service_failure(&self) -> bool {
        self.failed().any(|o| o.kind == "service")
    }

    /// Returns true if a stage failed only because the run was cancelled.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.failed()
            .filter_map(|o| o.failure.as_ref())
            .any(StageFailure::is_cancellation)
    }

    /// One line per failed stage.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.failed()
            .filter_map(|o| o.failure.as_ref())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobHandle {
        JobHandle {
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_step_outcome_queries() {
        let batch = StageSpec::batch("stage_1");
        let service = StageSpec::service("stage_2", 5000);
        let step = StepOutcome {
            index: 0,
            outcomes: vec![
                StageOutcome::succeeded(&batch, "p--stage-1").with_job(Some(job("p--stage-1"))),
                StageOutcome::failed(
                    &service,
                    "p--stage-2",
                    StageFailureReason::ReadinessTimeout { timeout_seconds: 5 },
                ),
            ],
        };

        assert!(!step.is_success());
        assert!(step.has_service_failure());
        assert!(!step.was_cancelled());
        assert_eq!(step.jobs().count(), 1);
        assert_eq!(step.succeeded().count(), 1);
        assert_eq!(
            step.failure_summary(),
            "stage=stage_2 failed: deployment not ready within 5s"
        );
    }

    #[test]
    fn test_failed_outcome_keeps_stage_identity() {
        let stage = StageSpec::batch("train");
        let outcome = StageOutcome::failed(&stage, "p--train", StageFailureReason::Cancelled)
            .with_attempts(2);

        assert_eq!(outcome.kind, "batch");
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.failure.as_ref().is_some_and(StageFailure::is_cancellation));
    }
}
