//! Project materialization boundary.
//!
//! Cloning the repository and parsing its configuration file happen outside
//! the engine. A [`ProjectSource`] hands back the parsed [`ProjectConfig`]
//! together with the commit hash that was checked out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::core::{EnvVar, StageSpec};
use crate::errors::{ConfigurationError, DeployflowError, ErrorInfo};

/// The repository and branch a run deploys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    /// HTTPS or SSH remote.
    pub url: String,
    /// Branch to check out.
    pub branch: String,
}

impl ProjectRef {
    /// Creates a new project reference.
    #[must_use]
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.branch)
    }
}

/// Project-level deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, used as the prefix of every resource name.
    pub name: String,
    /// Runtime image, `namespace/repository[:tag]`.
    pub docker_image: String,
    /// Stage ordering, e.g. `prepare >> train,score >> serve`.
    pub dag: String,
    /// Every stage the project declares.
    pub stages: Vec<StageSpec>,
    /// Group that secret references are resolved in.
    #[serde(default)]
    pub secrets_group: Option<String>,
    /// Batch stage to run when the workflow fails.
    #[serde(default)]
    pub run_on_failure: Option<String>,
    /// Variables shared by every stage.
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl ProjectConfig {
    /// Creates a configuration with no stages.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        docker_image: impl Into<String>,
        dag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            docker_image: docker_image.into(),
            dag: dag.into(),
            stages: Vec::new(),
            secrets_group: None,
            run_on_failure: None,
            env: Vec::new(),
        }
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid field.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::new(format!("invalid project config: {e}")).with_info(
                ErrorInfo::new("CONFIG-PARSE", "project config could not be parsed")
                    .with_context_entry("line", e.line().to_string()),
            )
        })
    }

    /// Adds a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the secrets group.
    #[must_use]
    pub fn with_secrets_group(mut self, group: impl Into<String>) -> Self {
        self.secrets_group = Some(group.into());
        self
    }

    /// Sets the failure stage.
    #[must_use]
    pub fn with_failure_stage(mut self, stage: impl Into<String>) -> Self {
        self.run_on_failure = Some(stage.into());
        self
    }

    /// Adds a shared variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

/// What a [`ProjectSource`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedProject {
    /// Commit that was checked out.
    pub commit_hash: String,
    /// Parsed configuration.
    pub config: ProjectConfig,
}

/// Materializes a project repository on local disk.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Checks out `project` into `dest` and returns its configuration.
    async fn fetch(&self, project: &ProjectRef, dest: &Path)
        -> Result<FetchedProject, DeployflowError>;
}
