//! In-memory cluster for scenario tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::cluster::{
    ClusterApi, ClusterError, DeploymentHandle, DeploymentRequest, JobHandle, JobRequest,
    SecretsRequest,
};
use crate::core::{EnvVar, JobStatus};

/// A call received by [`FakeCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    /// `namespace_exists`
    NamespaceExists(String),
    /// `create_or_replace_job`
    CreateJob {
        /// Job name.
        name: String,
        /// Attempt number.
        attempt: u32,
    },
    /// `job_status`
    JobStatus(String),
    /// `delete_job`
    DeleteJob(String),
    /// `create_or_update_deployment`
    ApplyDeployment(String),
    /// `deployment_ready`
    DeploymentReady(String),
    /// `rollback_deployment`
    RollbackDeployment(String),
    /// `delete_deployment`
    DeleteDeployment(String),
    /// `expose_deployment_as_service`
    ExposeService {
        /// Deployment name.
        name: String,
        /// Service port.
        port: u16,
    },
    /// `create_ingress`
    CreateIngress {
        /// Deployment name.
        name: String,
        /// Route path.
        route: String,
    },
    /// `latest_pod_name`
    LatestPodName(String),
    /// `pod_logs`
    PodLogs(String),
    /// `env_vars_from_secrets`
    SecretsLookup(String),
}

impl ClusterCall {
    /// Returns true for calls that change cluster state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateJob { .. }
                | Self::DeleteJob(_)
                | Self::ApplyDeployment(_)
                | Self::RollbackDeployment(_)
                | Self::DeleteDeployment(_)
                | Self::ExposeService { .. }
                | Self::CreateIngress { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct FakeJob {
    outcome: JobStatus,
    running_checks: u32,
}

#[derive(Debug, Clone)]
struct FakeDeployment {
    revision: u64,
    previous_revision: Option<u64>,
}

#[derive(Debug, Default)]
struct FakeState {
    namespaces: HashSet<String>,
    job_scripts: HashMap<String, VecDeque<JobStatus>>,
    hanging_jobs: HashSet<String>,
    jobs: HashMap<String, FakeJob>,
    deployments: HashMap<String, FakeDeployment>,
    never_ready: HashSet<String>,
    failing_cleanup: HashSet<String>,
    services: HashSet<String>,
    ingresses: HashMap<String, String>,
    secrets: HashMap<(String, String), Vec<EnvVar>>,
    pod_logs: HashMap<String, String>,
    calls: Vec<ClusterCall>,
    job_requests: Vec<JobRequest>,
    deployment_requests: Vec<DeploymentRequest>,
}

/// A scripted, in-memory [`ClusterApi`].
///
/// Jobs succeed unless an outcome script says otherwise and report
/// `Running` once before their terminal status. Deployments become ready
/// immediately unless marked never-ready. Every call is recorded.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// Creates an empty cluster with no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a namespace.
    #[must_use]
    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.state.lock().namespaces.insert(namespace.into());
        self
    }

    /// Scripts the terminal status of successive attempts of a job.
    #[must_use]
    pub fn with_job_outcomes(self, name: impl Into<String>, outcomes: Vec<JobStatus>) -> Self {
        self.state
            .lock()
            .job_scripts
            .insert(name.into(), outcomes.into());
        self
    }

    /// Makes a job run forever.
    #[must_use]
    pub fn with_hanging_job(self, name: impl Into<String>) -> Self {
        self.state.lock().hanging_jobs.insert(name.into());
        self
    }

    /// Makes a deployment never report ready.
    #[must_use]
    pub fn with_never_ready(self, name: impl Into<String>) -> Self {
        self.state.lock().never_ready.insert(name.into());
        self
    }

    /// Seeds a deployment that existed before the run.
    #[must_use]
    pub fn with_existing_deployment(self, name: impl Into<String>, revision: u64) -> Self {
        self.state.lock().deployments.insert(
            name.into(),
            FakeDeployment {
                revision,
                previous_revision: None,
            },
        );
        self
    }

    /// Makes rollback and delete calls for `name` fail.
    #[must_use]
    pub fn with_failing_cleanup(self, name: impl Into<String>) -> Self {
        self.state.lock().failing_cleanup.insert(name.into());
        self
    }

    /// Stores a secret key in a group.
    #[must_use]
    pub fn with_secret(
        self,
        group: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.state
            .lock()
            .secrets
            .entry((group.into(), secret.into()))
            .or_default()
            .push(EnvVar::new(key, value));
        self
    }

    /// Sets the logs returned for pods of `name`.
    #[must_use]
    pub fn with_pod_logs(self, name: impl Into<String>, logs: impl Into<String>) -> Self {
        self.state.lock().pod_logs.insert(name.into(), logs.into());
        self
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().calls.clone()
    }

    /// Every state-changing call received, in order.
    #[must_use]
    pub fn mutations(&self) -> Vec<ClusterCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&ClusterCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Every job request received.
    #[must_use]
    pub fn job_requests(&self) -> Vec<JobRequest> {
        self.state.lock().job_requests.clone()
    }

    /// Every deployment request received.
    #[must_use]
    pub fn deployment_requests(&self) -> Vec<DeploymentRequest> {
        self.state.lock().deployment_requests.clone()
    }

    /// Returns true if a job with this name currently exists.
    #[must_use]
    pub fn has_job(&self, name: &str) -> bool {
        self.state.lock().jobs.contains_key(name)
    }

    /// Current revision of a deployment, if it exists.
    #[must_use]
    pub fn deployment_revision(&self, name: &str) -> Option<u64> {
        self.state.lock().deployments.get(name).map(|d| d.revision)
    }

    /// Returns true if a service fronts this deployment.
    #[must_use]
    pub fn has_service(&self, name: &str) -> bool {
        self.state.lock().services.contains(name)
    }

    /// Ingress route of a deployment, if one was created.
    #[must_use]
    pub fn ingress_route(&self, name: &str) -> Option<String> {
        self.state.lock().ingresses.get(name).cloned()
    }

    fn record(&self, call: ClusterCall) {
        self.state.lock().calls.push(call);
    }
}

/// The error a client library reports when the API server refuses a call.
fn rejected(operation: &str, kind: &str, name: &str) -> ClusterError {
    let source = anyhow::anyhow!("403 Forbidden").context(format!("{kind} \"{name}\" is protected"));
    ClusterError::from_anyhow(operation, &source)
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        self.record(ClusterCall::NamespaceExists(namespace.to_string()));
        Ok(self.state.lock().namespaces.contains(namespace))
    }

    async fn create_or_replace_job(&self, request: &JobRequest) -> Result<JobHandle, ClusterError> {
        self.record(ClusterCall::CreateJob {
            name: request.name.clone(),
            attempt: request.attempt,
        });
        let mut state = self.state.lock();
        let outcome = state
            .job_scripts
            .get_mut(&request.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(JobStatus::Succeeded);
        state.jobs.insert(
            request.name.clone(),
            FakeJob {
                outcome,
                running_checks: 1,
            },
        );
        state.job_requests.push(request.clone());
        Ok(JobHandle {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
        })
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClusterError> {
        self.record(ClusterCall::JobStatus(job.name.clone()));
        let mut state = self.state.lock();
        if state.hanging_jobs.contains(&job.name) {
            return Ok(JobStatus::Running);
        }
        let fake = state
            .jobs
            .get_mut(&job.name)
            .ok_or_else(|| ClusterError::new("job_status", format!("job {} not found", job.name)))?;
        if fake.running_checks > 0 {
            fake.running_checks -= 1;
            return Ok(JobStatus::Running);
        }
        Ok(fake.outcome)
    }

    async fn delete_job(&self, job: &JobHandle) -> Result<(), ClusterError> {
        self.record(ClusterCall::DeleteJob(job.name.clone()));
        let mut state = self.state.lock();
        if state.failing_cleanup.contains(&job.name) {
            return Err(rejected("delete_job", "jobs", &job.name));
        }
        state.jobs.remove(&job.name);
        Ok(())
    }

    async fn create_or_update_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentHandle, ClusterError> {
        self.record(ClusterCall::ApplyDeployment(request.name.clone()));
        let mut state = self.state.lock();
        state.deployment_requests.push(request.clone());

        let previous_revision = state.deployments.get(&request.name).map(|d| d.revision);
        let revision = previous_revision.map_or(1, |r| r + 1);
        state.deployments.insert(
            request.name.clone(),
            FakeDeployment {
                revision,
                previous_revision,
            },
        );

        Ok(DeploymentHandle {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            revision,
            previous_revision,
        })
    }

    async fn deployment_ready(&self, deployment: &DeploymentHandle) -> Result<bool, ClusterError> {
        self.record(ClusterCall::DeploymentReady(deployment.name.clone()));
        Ok(!self.state.lock().never_ready.contains(&deployment.name))
    }

    async fn rollback_deployment(&self, deployment: &DeploymentHandle) -> Result<(), ClusterError> {
        self.record(ClusterCall::RollbackDeployment(deployment.name.clone()));
        let mut state = self.state.lock();
        if state.failing_cleanup.contains(&deployment.name) {
            return Err(rejected("rollback_deployment", "deployments", &deployment.name));
        }
        let current = state.deployments.get_mut(&deployment.name).ok_or_else(|| {
            ClusterError::new(
                "rollback_deployment",
                format!("deployment {} not found", deployment.name),
            )
        })?;
        let previous = current.previous_revision.ok_or_else(|| {
            ClusterError::new("rollback_deployment", "no previous revision to roll back to")
        })?;
        current.revision = previous;
        current.previous_revision = None;
        Ok(())
    }

    async fn delete_deployment(&self, deployment: &DeploymentHandle) -> Result<(), ClusterError> {
        self.record(ClusterCall::DeleteDeployment(deployment.name.clone()));
        let mut state = self.state.lock();
        if state.failing_cleanup.contains(&deployment.name) {
            return Err(rejected("delete_deployment", "deployments", &deployment.name));
        }
        state.deployments.remove(&deployment.name);
        state.services.remove(&deployment.name);
        state.ingresses.remove(&deployment.name);
        Ok(())
    }

    async fn expose_deployment_as_service(
        &self,
        deployment: &DeploymentHandle,
        port: u16,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::ExposeService {
            name: deployment.name.clone(),
            port,
        });
        self.state.lock().services.insert(deployment.name.clone());
        Ok(())
    }

    async fn create_ingress(
        &self,
        deployment: &DeploymentHandle,
        route: &str,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::CreateIngress {
            name: deployment.name.clone(),
            route: route.to_string(),
        });
        self.state
            .lock()
            .ingresses
            .insert(deployment.name.clone(), route.to_string());
        Ok(())
    }

    async fn latest_pod_name(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ClusterError> {
        self.record(ClusterCall::LatestPodName(name.to_string()));
        let state = self.state.lock();
        let exists = state.jobs.contains_key(name) || state.deployments.contains_key(name);
        Ok(exists.then(|| format!("{name}-pod")))
    }

    async fn pod_logs(&self, _namespace: &str, pod: &str) -> Result<String, ClusterError> {
        self.record(ClusterCall::PodLogs(pod.to_string()));
        let owner = pod.strip_suffix("-pod").unwrap_or(pod);
        Ok(self
            .state
            .lock()
            .pod_logs
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn env_vars_from_secrets(
        &self,
        request: &SecretsRequest,
    ) -> Result<Vec<EnvVar>, ClusterError> {
        self.record(ClusterCall::SecretsLookup(request.group.clone()));
        let state = self.state.lock();
        request
            .secrets
            .iter()
            .map(|secret| {
                state
                    .secrets
                    .get(&(request.group.clone(), secret.secret.clone()))
                    .and_then(|keys| keys.iter().find(|k| k.name == secret.env_var))
                    .cloned()
                    .ok_or_else(|| {
                        ClusterError::new(
                            "env_vars_from_secrets",
                            format!(
                                "key {} not found in secret {} of group {}",
                                secret.env_var, secret.secret, request.group
                            ),
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResourceRequests, SecretRef};

    fn job_request(name: &str, attempt: u32) -> JobRequest {
        JobRequest {
            namespace: "ns".to_string(),
            name: name.to_string(),
            image: "acme/model:latest".to_string(),
            command: Vec::new(),
            args: Vec::new(),
            env: Vec::new(),
            resources: ResourceRequests::default(),
            attempt,
        }
    }

    fn deployment_request(name: &str) -> DeploymentRequest {
        DeploymentRequest {
            namespace: "ns".to_string(),
            name: name.to_string(),
            image: "acme/model:latest".to_string(),
            command: Vec::new(),
            args: Vec::new(),
            env: Vec::new(),
            resources: ResourceRequests::default(),
            replicas: 1,
            port: 5000,
        }
    }

    #[tokio::test]
    async fn test_job_script() {
        let cluster = FakeCluster::new().with_job_outcomes("j", vec![JobStatus::Failed]);

        let job = cluster.create_or_replace_job(&job_request("j", 1)).await.unwrap();
        assert_eq!(cluster.job_status(&job).await.unwrap(), JobStatus::Running);
        assert_eq!(cluster.job_status(&job).await.unwrap(), JobStatus::Failed);

        let job = cluster.create_or_replace_job(&job_request("j", 2)).await.unwrap();
        cluster.job_status(&job).await.unwrap();
        assert_eq!(cluster.job_status(&job).await.unwrap(), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_deployment_revisions_and_rollback() {
        let cluster = FakeCluster::new().with_existing_deployment("d", 3);

        let handle = cluster
            .create_or_update_deployment(&deployment_request("d"))
            .await
            .unwrap();
        assert_eq!(handle.revision, 4);
        assert_eq!(handle.previous_revision, Some(3));

        cluster.rollback_deployment(&handle).await.unwrap();
        assert_eq!(cluster.deployment_revision("d"), Some(3));
    }

    #[tokio::test]
    async fn test_secrets_lookup() {
        let cluster = FakeCluster::new().with_secret("prod", "db", "PASSWORD", "hunter2");
        let request = SecretsRequest {
            namespace: "ns".to_string(),
            group: "prod".to_string(),
            secrets: vec![SecretRef::new("PASSWORD", "db")],
        };
        let vars = cluster.env_vars_from_secrets(&request).await.unwrap();
        assert_eq!(vars, vec![EnvVar::new("PASSWORD", "hunter2")]);

        let missing = SecretsRequest {
            group: "dev".to_string(),
            ..request
        };
        assert!(cluster.env_vars_from_secrets(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_cleanup_reports_client_error_chain() {
        let cluster = FakeCluster::new().with_failing_cleanup("p--stage-1");
        let job = cluster.create_or_replace_job(&job_request("p--stage-1", 1)).await.unwrap();

        let err = cluster.delete_job(&job).await.unwrap_err();

        assert_eq!(err.operation, "delete_job");
        assert_eq!(err.message, "jobs \"p--stage-1\" is protected: 403 Forbidden");
        assert!(cluster.has_job("p--stage-1"));
    }

    #[tokio::test]
    async fn test_mutations_filter() {
        let cluster = FakeCluster::new().with_namespace("ns");
        cluster.namespace_exists("ns").await.unwrap();
        cluster.create_or_replace_job(&job_request("j", 1)).await.unwrap();

        assert_eq!(cluster.calls().len(), 2);
        assert_eq!(
            cluster.mutations(),
            vec![ClusterCall::CreateJob {
                name: "j".to_string(),
                attempt: 1
            }]
        );
    }
}
