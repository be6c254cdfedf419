//! Stage and step descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::env::EnvVar;

/// CPU and memory requested for each container of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequests {
    /// CPU request in cores (e.g. `0.5`).
    pub cpu: f64,
    /// Memory request in MiB.
    pub memory_mb: u64,
}

impl Default for ResourceRequests {
    fn default() -> Self {
        Self {
            cpu: 0.25,
            memory_mb: 100,
        }
    }
}

/// Reference to a key in a cluster secret, exposed as an env var.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Name of the variable (and of the key inside the secret).
    pub env_var: String,
    /// Name of the secret holding the key.
    pub secret: String,
}

impl SecretRef {
    /// Creates a new secret reference.
    #[must_use]
    pub fn new(env_var: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            secret: secret.into(),
        }
    }
}

fn default_retries() -> u32 {
    0
}

fn default_max_completion_time() -> u64 {
    60
}

/// Batch-specific stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Attempts made after the first one fails.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Time allowed for a single attempt to finish.
    #[serde(default = "default_max_completion_time")]
    pub max_completion_time_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            max_completion_time_seconds: default_max_completion_time(),
        }
    }
}

impl BatchConfig {
    /// Total number of attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.max_completion_time_seconds)
    }
}

fn default_replicas() -> u32 {
    1
}

fn default_max_startup_time() -> u64 {
    60
}

/// Service-specific stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of pods to keep running.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Container port to expose.
    pub port: u16,
    /// Time allowed for every replica to report ready.
    #[serde(default = "default_max_startup_time")]
    pub max_startup_time_seconds: u64,
    /// Whether to route external traffic to the service.
    #[serde(default)]
    pub ingress: bool,
}

impl ServiceConfig {
    /// Creates a service config with defaults for the given port.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            replicas: default_replicas(),
            port,
            max_startup_time_seconds: default_max_startup_time(),
            ingress: false,
        }
    }

    /// Readiness timeout.
    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.max_startup_time_seconds)
    }
}

/// What kind of cluster resource a stage becomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    /// A run-to-completion job.
    Batch(BatchConfig),
    /// A long-running deployment.
    Service(ServiceConfig),
}

impl StageKind {
    /// Returns true for batch stages.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Returns true for service stages.
    #[must_use]
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch(_) => write!(f, "batch"),
            Self::Service(_) => write!(f, "service"),
        }
    }
}

/// A named unit of work: one job or one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The stage name, unique within a project.
    pub name: String,
    /// Batch or service settings.
    #[serde(flatten)]
    pub kind: StageKind,
    /// Container command.
    #[serde(default)]
    pub command: Vec<String>,
    /// Container arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Resource requests.
    #[serde(default)]
    pub resources: ResourceRequests,
    /// Stage-declared variables.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Secret-derived variables.
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
}

impl StageSpec {
    /// Creates a batch stage with default settings.
    #[must_use]
    pub fn batch(name: impl Into<String>) -> Self {
        Self::new(name, StageKind::Batch(BatchConfig::default()))
    }

    /// Creates a service stage exposing `port`.
    #[must_use]
    pub fn service(name: impl Into<String>, port: u16) -> Self {
        Self::new(name, StageKind::Service(ServiceConfig::new(port)))
    }

    /// Creates a stage of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            command: Vec::new(),
            args: Vec::new(),
            resources: ResourceRequests::default(),
            env: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Sets the container command.
    #[must_use]
    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the container arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the resource requests.
    #[must_use]
    pub fn with_resources(mut self, cpu: f64, memory_mb: u64) -> Self {
        self.resources = ResourceRequests { cpu, memory_mb };
        self
    }

    /// Adds a stage-declared variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    /// Adds a secret-derived variable.
    #[must_use]
    pub fn with_secret(mut self, env_var: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.push(SecretRef::new(env_var, secret));
        self
    }

    /// Sets the batch retry count. No-op for service stages.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        if let StageKind::Batch(ref mut batch) = self.kind {
            batch.retries = retries;
        }
        self
    }

    /// Sets the batch completion or service startup timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        match self.kind {
            StageKind::Batch(ref mut batch) => batch.max_completion_time_seconds = seconds,
            StageKind::Service(ref mut service) => service.max_startup_time_seconds = seconds,
        }
        self
    }

    /// Sets the service replica count. No-op for batch stages.
    #[must_use]
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        if let StageKind::Service(ref mut service) = self.kind {
            service.replicas = replicas;
        }
        self
    }

    /// Enables ingress for a service stage. No-op for batch stages.
    #[must_use]
    pub fn with_ingress(mut self) -> Self {
        if let StageKind::Service(ref mut service) = self.kind {
            service.ingress = true;
        }
        self
    }
}

/// A set of stages with no dependency among them.
#[derive(Debug, Clone)]
pub struct Step {
    /// Zero-based position in the graph.
    pub index: usize,
    /// The stages to run together.
    pub stages: Vec<Arc<StageSpec>>,
}

impl Step {
    /// Creates a new step.
    #[must_use]
    pub fn new(index: usize, stages: Vec<Arc<StageSpec>>) -> Self {
        Self { index, stages }
    }

    /// Names of the stages in this step.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}
