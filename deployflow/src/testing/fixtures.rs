//! Project sources, registries and configs for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::EngineConfig;
use crate::core::StageSpec;
use crate::errors::DeployflowError;
use crate::executor::RetryConfig;
use crate::image::{ImageRef, ImageRegistry};
use crate::project::{FetchedProject, ProjectConfig, ProjectRef, ProjectSource};

/// Namespace used by scenario tests.
pub const TEST_NAMESPACE: &str = "bodywork-dev";

/// Image used by scenario tests.
pub const TEST_IMAGE: &str = "bodyworkml/bodywork-core:latest";

/// Commit hash reported by [`StaticProjectSource`].
pub const TEST_COMMIT: &str = "e9df4b7b2c6a";

/// Engine settings with millisecond polling and no backoff.
#[must_use]
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_poll_interval_ms(1)
        .with_retry(RetryConfig::immediate())
        .with_cleanup_timeout(5.0)
}

/// A project reference pointing nowhere in particular.
#[must_use]
pub fn test_project_ref() -> ProjectRef {
    ProjectRef::new("https://github.com/bodywork-ml/bodywork-test-project", "master")
}

/// `stage_1 >> stage_2,stage_3` with two batch stages and one service.
#[must_use]
pub fn test_project_config() -> ProjectConfig {
    ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "stage_1 >> stage_2,stage_3")
        .with_stage(StageSpec::batch("stage_1").with_command(["python", "stage_1.py"]))
        .with_stage(StageSpec::batch("stage_2").with_command(["python", "stage_2.py"]))
        .with_stage(
            StageSpec::service("stage_3", 5000)
                .with_command(["python", "serve.py"])
                .with_timeout_seconds(1),
        )
}

/// Returns a fixed configuration for every fetch.
#[derive(Debug)]
pub struct StaticProjectSource {
    config: ProjectConfig,
    commit_hash: String,
    fetched_into: Mutex<Vec<PathBuf>>,
}

impl StaticProjectSource {
    /// Creates a source for `config` at [`TEST_COMMIT`].
    #[must_use]
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            config,
            commit_hash: TEST_COMMIT.to_string(),
            fetched_into: Mutex::new(Vec::new()),
        }
    }

    /// Sets the reported commit hash.
    #[must_use]
    pub fn with_commit(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = commit_hash.into();
        self
    }

    /// Directories the project was materialized into.
    #[must_use]
    pub fn fetched_into(&self) -> Vec<PathBuf> {
        self.fetched_into.lock().clone()
    }
}

#[async_trait]
impl ProjectSource for StaticProjectSource {
    async fn fetch(
        &self,
        _project: &ProjectRef,
        dest: &Path,
    ) -> Result<FetchedProject, DeployflowError> {
        tokio::fs::create_dir_all(dest).await?;
        let config = serde_json::to_vec_pretty(&self.config)
            .map_err(|e| DeployflowError::workflow(format!("cannot write project config: {e}")))?;
        tokio::fs::write(dest.join("deployflow.json"), config).await?;
        self.fetched_into.lock().push(dest.to_path_buf());

        Ok(FetchedProject {
            commit_hash: self.commit_hash.clone(),
            config: self.config.clone(),
        })
    }
}

/// An [`ImageRegistry`] answering from a fixed set of images.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    images: HashSet<String>,
    unreachable: bool,
    checks: AtomicUsize,
}

impl StaticRegistry {
    /// Creates a registry containing `images` (`repository:tag`).
    #[must_use]
    pub fn with_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            images: images.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Creates a registry that cannot be reached.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Number of existence checks performed.
    #[must_use]
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRegistry for StaticRegistry {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool, DeployflowError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(DeployflowError::RegistryUnreachable {
                registry: self.location().to_string(),
                image: image.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.images.contains(&image.to_string()))
    }

    fn location(&self) -> &str {
        "static-registry"
    }
}
