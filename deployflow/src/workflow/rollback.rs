//! Rollback and cleanup of cluster resources.
//!
//! Deployments touched during a run are recorded in a ledger. When a step
//! fails, the ledger is turned into a plan of cleanup actions that run in
//! LIFO order. Every action gets its own timeout and a failing action never
//! stops the ones after it.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cluster::{ClusterApi, ClusterError, DeploymentHandle, JobHandle};
use crate::errors::RollbackFailure;
use crate::events::ProgressSink;

/// A single cleanup call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// Delete a job and its pods.
    DeleteJob(JobHandle),
    /// Revert a deployment that existed before the run.
    RollbackDeployment(DeploymentHandle),
    /// Remove a deployment the run created.
    DeleteDeployment(DeploymentHandle),
}

impl CleanupAction {
    /// Name of the resource the action targets.
    #[must_use]
    pub fn resource(&self) -> &str {
        match self {
            Self::DeleteJob(job) => &job.name,
            Self::RollbackDeployment(d) | Self::DeleteDeployment(d) => &d.name,
        }
    }

    /// What the action does, for messages.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::DeleteJob(_) => "delete job",
            Self::RollbackDeployment(_) => "roll back deployment",
            Self::DeleteDeployment(_) => "delete deployment",
        }
    }

    fn done_line(&self) -> String {
        match self {
            Self::DeleteJob(job) => format!("deleted job={}", job.name),
            Self::RollbackDeployment(d) => format!("rolled back deployment={}", d.name),
            Self::DeleteDeployment(d) => format!("deleted deployment={}", d.name),
        }
    }
}

/// Deployments touched during a run, in the order they were touched.
#[derive(Debug, Default)]
pub struct RollbackLedger {
    deployments: Vec<DeploymentHandle>,
}

impl RollbackLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a touched deployment.
    pub fn record_deployment(&mut self, deployment: DeploymentHandle) {
        self.deployments.push(deployment);
    }

    /// Deployments recorded so far.
    #[must_use]
    pub fn deployments(&self) -> &[DeploymentHandle] {
        &self.deployments
    }

    /// Cleanup plan after a failure: the failed step's jobs first, then every
    /// recorded deployment, most recent first.
    #[must_use]
    pub fn plan<'a>(&self, jobs: impl IntoIterator<Item = &'a JobHandle>) -> Vec<CleanupAction> {
        let jobs = jobs.into_iter().cloned().map(CleanupAction::DeleteJob);
        let deployments = self.deployments.iter().rev().map(|d| {
            if d.is_new() {
                CleanupAction::DeleteDeployment(d.clone())
            } else {
                CleanupAction::RollbackDeployment(d.clone())
            }
        });
        jobs.chain(deployments).collect()
    }
}

/// What a cleanup pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Jobs deleted.
    pub deleted_jobs: Vec<String>,
    /// Deployments reverted.
    pub rolled_back_deployments: Vec<String>,
    /// Deployments deleted.
    pub deleted_deployments: Vec<String>,
    /// Actions that failed or timed out.
    pub failures: Vec<RollbackFailure>,
}

/// Executes cleanup actions against the cluster.
#[derive(Clone)]
pub struct Cleaner {
    cluster: Arc<dyn ClusterApi>,
    progress: Arc<dyn ProgressSink>,
    timeout: Duration,
}

impl Cleaner {
    /// Creates a cleaner allowing `timeout` per action.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        progress: Arc<dyn ProgressSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            progress,
            timeout,
        }
    }

    /// Runs every action in order.
    pub async fn run(&self, actions: Vec<CleanupAction>) -> CleanupReport {
        let mut report = CleanupReport::default();

        for action in actions {
            match tokio::time::timeout(self.timeout, self.apply(&action)).await {
                Ok(Ok(())) => {
                    info!(resource = action.resource(), action = action.description(), "cleanup done");
                    self.progress.line(&action.done_line());
                    let name = action.resource().to_string();
                    match action {
                        CleanupAction::DeleteJob(_) => report.deleted_jobs.push(name),
                        CleanupAction::RollbackDeployment(_) => {
                            report.rolled_back_deployments.push(name);
                        }
                        CleanupAction::DeleteDeployment(_) => report.deleted_deployments.push(name),
                    }
                }
                Ok(Err(e)) => {
                    report.failures.push(self.failed(&action, e.to_string()));
                }
                Err(_) => {
                    let message = format!("timed out after {:.1}s", self.timeout.as_secs_f64());
                    report.failures.push(self.failed(&action, message));
                }
            }
        }

        report
    }

    async fn apply(&self, action: &CleanupAction) -> Result<(), ClusterError> {
        match action {
            CleanupAction::DeleteJob(job) => self.cluster.delete_job(job).await,
            CleanupAction::RollbackDeployment(d) => self.cluster.rollback_deployment(d).await,
            CleanupAction::DeleteDeployment(d) => self.cluster.delete_deployment(d).await,
        }
    }

    fn failed(&self, action: &CleanupAction, message: String) -> RollbackFailure {
        let failure = RollbackFailure::new(action.resource(), action.description(), message);
        warn!(error = %failure, "cleanup action failed");
        self.progress.line(&failure.to_string());
        failure
    }
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::events::CollectingSink;
    use pretty_assertions::assert_eq;

    fn deployment(name: &str, previous: Option<u64>) -> DeploymentHandle {
        DeploymentHandle {
            namespace: "ns".to_string(),
            name: name.to_string(),
            revision: previous.map_or(1, |p| p + 1),
            previous_revision: previous,
        }
    }

    fn job(name: &str) -> JobHandle {
        JobHandle {
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_plan_is_jobs_then_lifo_deployments() {
        let mut ledger = RollbackLedger::new();
        ledger.record_deployment(deployment("first", Some(2)));
        ledger.record_deployment(deployment("second", None));

        let plan = ledger.plan(&[job("j")]);

        assert_eq!(
            plan,
            vec![
                CleanupAction::DeleteJob(job("j")),
                CleanupAction::DeleteDeployment(deployment("second", None)),
                CleanupAction::RollbackDeployment(deployment("first", Some(2))),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_actions() {
        let mut mock = MockClusterApi::new();
        mock.expect_rollback_deployment()
            .times(1)
            .returning(|_| Err(ClusterError::new("rollback", "conflict")));
        mock.expect_delete_deployment().times(1).returning(|_| Ok(()));

        let sink = Arc::new(CollectingSink::new());
        let cleaner = Cleaner::new(Arc::new(mock), sink.clone(), Duration::from_secs(1));

        let report = cleaner
            .run(vec![
                CleanupAction::RollbackDeployment(deployment("a", Some(1))),
                CleanupAction::DeleteDeployment(deployment("b", None)),
            ])
            .await;

        assert_eq!(report.deleted_deployments, vec!["b".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].action, "roll back deployment");
        assert!(sink.contains("failed to roll back deployment a"));
        assert!(sink.contains("deleted deployment=b"));
    }

    #[tokio::test]
    async fn test_hanging_action_times_out() {
        struct Hanging;

        #[async_trait::async_trait]
        impl ClusterApi for Hanging {
            async fn namespace_exists(&self, _: &str) -> Result<bool, ClusterError> {
                Ok(true)
            }
            async fn create_or_replace_job(
                &self,
                _: &crate::cluster::JobRequest,
            ) -> Result<JobHandle, ClusterError> {
                unimplemented!()
            }
            async fn job_status(&self, _: &JobHandle) -> Result<crate::core::JobStatus, ClusterError> {
                unimplemented!()
            }
            async fn delete_job(&self, _: &JobHandle) -> Result<(), ClusterError> {
                std::future::pending().await
            }
            async fn create_or_update_deployment(
                &self,
                _: &crate::cluster::DeploymentRequest,
            ) -> Result<DeploymentHandle, ClusterError> {
                unimplemented!()
            }
            async fn deployment_ready(&self, _: &DeploymentHandle) -> Result<bool, ClusterError> {
                unimplemented!()
            }
            async fn rollback_deployment(&self, _: &DeploymentHandle) -> Result<(), ClusterError> {
                unimplemented!()
            }
            async fn delete_deployment(&self, _: &DeploymentHandle) -> Result<(), ClusterError> {
                unimplemented!()
            }
            async fn expose_deployment_as_service(
                &self,
                _: &DeploymentHandle,
                _: u16,
            ) -> Result<(), ClusterError> {
                unimplemented!()
            }
            async fn create_ingress(&self, _: &DeploymentHandle, _: &str) -> Result<(), ClusterError> {
                unimplemented!()
            }
            async fn latest_pod_name(&self, _: &str, _: &str) -> Result<Option<String>, ClusterError> {
                unimplemented!()
            }
            async fn pod_logs(&self, _: &str, _: &str) -> Result<String, ClusterError> {
                unimplemented!()
            }
            async fn env_vars_from_secrets(
                &self,
                _: &crate::cluster::SecretsRequest,
            ) -> Result<Vec<crate::core::EnvVar>, ClusterError> {
                unimplemented!()
            }
        }

        let cleaner = Cleaner::new(
            Arc::new(Hanging),
            Arc::new(CollectingSink::new()),
            Duration::from_millis(10),
        );
        let report = cleaner.run(vec![CleanupAction::DeleteJob(job("stuck"))]).await;

        assert!(report.deleted_jobs.is_empty());
        assert!(report.failures[0].message.starts_with("timed out"));
    }
}
