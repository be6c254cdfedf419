//! Boundary to the container-orchestration cluster.
//!
//! The engine never talks to the cluster directly. Every create, query and
//! delete goes through [`ClusterApi`], which is injected into each component
//! at construction. Implementations are expected to be idempotent where the
//! method name says so (`create_or_replace_job`, `create_or_update_deployment`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{EnvVar, JobStatus, ResourceRequests, SecretRef};

/// A failed cluster API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cluster call {operation} failed: {message}")]
pub struct ClusterError {
    /// The API operation that failed.
    pub operation: String,
    /// Underlying failure.
    pub message: String,
}

impl ClusterError {
    /// Creates a new cluster error.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wraps an error from a client library.
    #[must_use]
    pub fn from_anyhow(operation: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::new(operation, format!("{err:#}"))
    }
}

/// Everything needed to submit a batch job.
///
/// A request is exactly one attempt. Clients must create the job with a
/// backoff limit of 0; retries are resubmissions made by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Target namespace.
    pub namespace: String,
    /// Job name.
    pub name: String,
    /// Container image (`repository:tag`).
    pub image: String,
    /// Container command.
    pub command: Vec<String>,
    /// Container arguments.
    pub args: Vec<String>,
    /// Fully merged environment.
    pub env: Vec<EnvVar>,
    /// Resource requests.
    pub resources: ResourceRequests,
    /// One-based attempt number of this submission.
    pub attempt: u32,
}

/// Everything needed to submit a service deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Target namespace.
    pub namespace: String,
    /// Deployment name.
    pub name: String,
    /// Container image (`repository:tag`).
    pub image: String,
    /// Container command.
    pub command: Vec<String>,
    /// Container arguments.
    pub args: Vec<String>,
    /// Fully merged environment.
    pub env: Vec<EnvVar>,
    /// Resource requests.
    pub resources: ResourceRequests,
    /// Replica count.
    pub replicas: u32,
    /// Container port.
    pub port: u16,
}

/// Secrets to resolve into environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsRequest {
    /// Namespace the stage runs in.
    pub namespace: String,
    /// Group the secrets belong to.
    pub group: String,
    /// Secret references declared by the stage.
    pub secrets: Vec<SecretRef>,
}

/// A submitted batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Namespace of the job.
    pub namespace: String,
    /// Job name.
    pub name: String,
}

/// A created or updated deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentHandle {
    /// Namespace of the deployment.
    pub namespace: String,
    /// Deployment name.
    pub name: String,
    /// Revision produced by this run.
    pub revision: u64,
    /// Revision live before this run touched it; `None` if newly created.
    pub previous_revision: Option<u64>,
}

impl DeploymentHandle {
    /// Returns true if the deployment did not exist before this run.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.previous_revision.is_none()
    }
}

/// Operations the engine consumes from the cluster client layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Returns true if the namespace exists.
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError>;

    /// Creates a job, deleting any existing job with the same name first.
    async fn create_or_replace_job(&self, request: &JobRequest) -> Result<JobHandle, ClusterError>;

    /// Returns the current status of a job.
    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClusterError>;

    /// Deletes a job and its pods.
    async fn delete_job(&self, job: &JobHandle) -> Result<(), ClusterError>;

    /// Creates a deployment, or patches it in place if it already exists.
    async fn create_or_update_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentHandle, ClusterError>;

    /// Returns true once every replica of the deployment reports ready.
    async fn deployment_ready(&self, deployment: &DeploymentHandle) -> Result<bool, ClusterError>;

    /// Reverts a deployment to its previous revision.
    async fn rollback_deployment(&self, deployment: &DeploymentHandle) -> Result<(), ClusterError>;

    /// Deletes a deployment together with its service and ingress.
    async fn delete_deployment(&self, deployment: &DeploymentHandle) -> Result<(), ClusterError>;

    /// Creates the cluster-internal service fronting a deployment, if missing.
    async fn expose_deployment_as_service(
        &self,
        deployment: &DeploymentHandle,
        port: u16,
    ) -> Result<(), ClusterError>;

    /// Routes external traffic on `route` to the deployment's service.
    async fn create_ingress(
        &self,
        deployment: &DeploymentHandle,
        route: &str,
    ) -> Result<(), ClusterError>;

    /// Returns the most recently created pod backing `name`.
    async fn latest_pod_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ClusterError>;

    /// Returns the logs of a pod.
    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError>;

    /// Resolves secret references into environment variables.
    async fn env_vars_from_secrets(
        &self,
        request: &SecretsRequest,
    ) -> Result<Vec<EnvVar>, ClusterError>;
}
