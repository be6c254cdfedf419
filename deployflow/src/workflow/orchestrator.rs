//! Workflow orchestration.
//!
//! A run moves through `Initializing → Validating → Executing` and ends in
//! `Succeeded` or, via `RollingBack`, in `Failed`. A failed run may then
//! pass through `RunningFailureStage` once before settling in `Failed`.
//! Nothing is created on the cluster before `Executing`.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use super::result::ExecutionResult;
use super::rollback::{Cleaner, CleanupAction, RollbackLedger};
use super::run::WorkflowRun;
use crate::cancellation::CancellationToken;
use crate::cluster::{ClusterApi, JobHandle};
use crate::config::EngineConfig;
use crate::core::{EnvVars, WorkflowState, FAILURE_MESSAGE_ENV_VAR, GIT_COMMIT_HASH_ENV_VAR};
use crate::errors::DeployflowError;
use crate::events::ProgressSink;
use crate::executor::{StageExecutor, StepContext, StepOutcome};
use crate::graph::StageGraph;
use crate::image::{validate_image, ImageRegistry};
use crate::observability::{run_span, SpanTimer};
use crate::project::{ProjectRef, ProjectSource};

/// Input of a single workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Namespace to deploy into. Must already exist.
    pub namespace: String,
    /// Repository and branch to deploy.
    pub project: ProjectRef,
    /// Image to use instead of the one in the project config.
    pub docker_image_override: Option<String>,
    /// Where to materialize the repository. When unset, a temporary
    /// directory is created and removed after the run.
    pub cloned_repo_dir: Option<PathBuf>,
}

impl RunRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(namespace: impl Into<String>, project: ProjectRef) -> Self {
        Self {
            namespace: namespace.into(),
            project,
            docker_image_override: None,
            cloned_repo_dir: None,
        }
    }

    /// Overrides the runtime image.
    #[must_use]
    pub fn with_image_override(mut self, image: impl Into<String>) -> Self {
        self.docker_image_override = Some(image.into());
        self
    }

    /// Materializes the repository into `dir` and keeps it afterwards.
    #[must_use]
    pub fn with_cloned_repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cloned_repo_dir = Some(dir.into());
        self
    }
}

/// Everything the executing phase needs.
struct PreparedRun {
    graph: StageGraph,
    ctx: Arc<StepContext>,
}

/// Why execution stopped early.
struct Halt {
    step: Option<StepOutcome>,
    cancelled: bool,
}

/// Drives workflow runs from start to finish.
pub struct WorkflowOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    source: Arc<dyn ProjectSource>,
    registry: Arc<dyn ImageRegistry>,
    progress: Arc<dyn ProgressSink>,
    config: Arc<EngineConfig>,
    cancel: Arc<CancellationToken>,
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator with its own cancellation token.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        source: Arc<dyn ProjectSource>,
        registry: Arc<dyn ImageRegistry>,
        progress: Arc<dyn ProgressSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cluster,
            source,
            registry,
            progress,
            config: Arc::new(config),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Uses a caller-provided cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that cancels runs of this orchestrator.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// Runs the workflow described by `request`.
    ///
    /// Execution failures are reported through the returned result, with
    /// status `Failed`, after rollback.
    ///
    /// # Errors
    ///
    /// Returns an error without touching the cluster when the namespace does
    /// not exist, the project cannot be materialized, the stage graph is
    /// invalid, or the runtime image is malformed, absent or unverifiable.
    pub async fn run(&self, request: &RunRequest) -> Result<ExecutionResult, DeployflowError> {
        let mut run = WorkflowRun::new(request.namespace.clone(), request.project.clone());
        let owns_clone_dir = request.cloned_repo_dir.is_none();
        if let Some(dir) = &request.cloned_repo_dir {
            run = run.with_cloned_repo_dir(dir.clone());
        }

        let project = &request.project;
        self.progress.line(&format!(
            "attempting to run workflow for project={} on branch={} in namespace={}",
            project.url, project.branch, request.namespace
        ));

        let span = run_span(&run.id.to_string(), &request.namespace, &project.url);
        let outcome = self.execute(&mut run, request).instrument(span).await;

        if owns_clone_dir && !self.config.keep_cloned_repo {
            remove_clone_dir(&run).await;
        }

        match &outcome {
            Ok(result) if result.is_success() => {
                info!(run_id = %run.id, duration_ms = result.duration_ms, "workflow succeeded");
                self.progress.line(&format!(
                    "successfully ran workflow for project={} on branch={}",
                    project.url, project.branch
                ));
            }
            Ok(result) => {
                error!(
                    run_id = %run.id,
                    error = result.error.as_deref().unwrap_or_default(),
                    "workflow failed"
                );
                self.progress.line(&format!(
                    "failed to run workflow for project={} on branch={}",
                    project.url, project.branch
                ));
            }
            Err(e) => {
                error!(run_id = %run.id, kind = e.kind(), error = %e, "workflow aborted");
                self.progress.line(&e.to_string());
                self.progress.line(&format!(
                    "failed to run workflow for project={} on branch={}",
                    project.url, project.branch
                ));
            }
        }

        outcome
    }

    async fn execute(
        &self,
        run: &mut WorkflowRun,
        request: &RunRequest,
    ) -> Result<ExecutionResult, DeployflowError> {
        let timer = SpanTimer::start();

        let prepared = match self.prepare(run, request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                run.transition(WorkflowState::Failed)?;
                return Err(e);
            }
        };

        run.transition(WorkflowState::Executing)?;
        let mut result = ExecutionResult::new(run.id.to_string());
        let executor = StageExecutor::new(
            self.cluster.clone(),
            self.progress.clone(),
            self.config.clone(),
            self.cancel.clone(),
        );
        let cleaner = Cleaner::new(
            self.cluster.clone(),
            self.progress.clone(),
            self.config.cleanup_timeout(),
        );
        let mut ledger = RollbackLedger::new();

        let halt = self
            .execute_steps(&executor, &cleaner, &prepared, &mut ledger, &mut result)
            .await;

        match halt {
            None => run.transition(WorkflowState::Succeeded)?,
            Some(halt) => {
                run.transition(WorkflowState::RollingBack)?;
                self.roll_back(&cleaner, &ledger, &halt, &mut result).await;
                run.transition(WorkflowState::Failed)?;

                if let Some(stage) = prepared.graph.failure_stage() {
                    if result.cancelled {
                        info!(stage = %stage.name, "run cancelled, skipping failure stage");
                    } else {
                        run.transition(WorkflowState::RunningFailureStage)?;
                        let message = result.error.clone().unwrap_or_default();
                        let ctx = Arc::new(StepContext {
                            shared_env: Arc::new(
                                prepared
                                    .ctx
                                    .shared_env
                                    .as_ref()
                                    .clone()
                                    .with(FAILURE_MESSAGE_ENV_VAR, message),
                            ),
                            ..prepared.ctx.as_ref().clone()
                        });
                        let outcome = executor.run_isolated(&ctx, stage).await;
                        delete_finished_jobs(&cleaner, outcome.job.iter(), &mut result).await;
                        result.failure_stage = Some(outcome);
                        run.transition(WorkflowState::Failed)?;
                    }
                }
            }
        }

        result.duration_ms = timer.elapsed_ms();
        Ok(result)
    }

    /// `Initializing` and `Validating`: everything that must hold before the
    /// cluster is touched.
    async fn prepare(
        &self,
        run: &mut WorkflowRun,
        request: &RunRequest,
    ) -> Result<PreparedRun, DeployflowError> {
        if self.cancel.is_cancelled() {
            return Err(DeployflowError::Cancelled(
                self.cancel.reason().unwrap_or_default(),
            ));
        }

        if !self.cluster.namespace_exists(&run.namespace).await? {
            return Err(DeployflowError::workflow(format!(
                "{} is not a valid namespace",
                run.namespace
            )));
        }

        let fetched = self
            .source
            .fetch(&run.project, &run.cloned_repo_dir)
            .await?;
        info!(commit = %fetched.commit_hash, dir = %run.cloned_repo_dir.display(), "project materialized");
        run.commit_hash = Some(fetched.commit_hash.clone());
        let config = fetched.config;

        let graph = StageGraph::from_config(&config)?;

        run.transition(WorkflowState::Validating)?;
        let image = request
            .docker_image_override
            .as_deref()
            .unwrap_or(&config.docker_image);
        let image = validate_image(self.registry.as_ref(), image).await?;

        let mut shared_env: EnvVars = config.env.iter().cloned().collect();
        shared_env.set(GIT_COMMIT_HASH_ENV_VAR, fetched.commit_hash);

        let secrets_group = config
            .secrets_group
            .clone()
            .unwrap_or_else(|| self.config.default_secrets_group.clone());

        Ok(PreparedRun {
            graph,
            ctx: Arc::new(StepContext {
                namespace: run.namespace.clone(),
                project_name: config.name,
                image,
                shared_env: Arc::new(shared_env),
                secrets_group,
            }),
        })
    }

    /// Runs steps in order. Returns `None` when every step succeeded.
    async fn execute_steps(
        &self,
        executor: &StageExecutor,
        cleaner: &Cleaner,
        prepared: &PreparedRun,
        ledger: &mut RollbackLedger,
        result: &mut ExecutionResult,
    ) -> Option<Halt> {
        for step in prepared.graph.steps() {
            if self.cancel.is_cancelled() {
                warn!(step = step.index, "run cancelled before step");
                return Some(Halt {
                    step: None,
                    cancelled: true,
                });
            }

            let outcome = executor.run_step(&prepared.ctx, step).await;
            result.record_stages(&outcome.outcomes);
            for deployment in outcome.deployments() {
                ledger.record_deployment(deployment.clone());
            }

            if !outcome.is_success() {
                let cancelled = outcome.was_cancelled() || self.cancel.is_cancelled();
                return Some(Halt {
                    step: Some(outcome),
                    cancelled,
                });
            }

            delete_finished_jobs(cleaner, outcome.jobs(), result).await;
        }
        None
    }

    /// `RollingBack`: remove the failed step's jobs and revert deployments.
    async fn roll_back(
        &self,
        cleaner: &Cleaner,
        ledger: &RollbackLedger,
        halt: &Halt,
        result: &mut ExecutionResult,
    ) {
        let message = match &halt.step {
            Some(step) if !halt.cancelled => step.failure_summary(),
            _ => format!(
                "workflow cancelled: {}",
                self.cancel.reason().unwrap_or_default()
            ),
        };
        result.cancelled = halt.cancelled;
        result.fail(message);

        if halt.step.as_ref().is_some_and(StepOutcome::has_service_failure) {
            self.progress
                .line("deployments failed to roll-out successfully");
        }

        let jobs = halt.step.iter().flat_map(StepOutcome::jobs);
        let plan = ledger.plan(jobs);
        info!(actions = plan.len(), "rolling back");
        let report = cleaner.run(plan).await;
        result.absorb_rollback(report);

        if result.is_partial_rollback() {
            warn!(
                failures = result.rollback_failures.len(),
                "rollback incomplete, some resources were left in place"
            );
        }
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Deletes jobs that already reached a terminal state. Failures leave the
/// job in place and are not rollback failures.
async fn delete_finished_jobs<'a>(
    cleaner: &Cleaner,
    jobs: impl IntoIterator<Item = &'a JobHandle>,
    result: &mut ExecutionResult,
) {
    let actions = jobs.into_iter().cloned().map(CleanupAction::DeleteJob).collect();
    let report = cleaner.run(actions).await;
    for failure in &report.failures {
        warn!(error = %failure, "completed job left in place");
    }
    result.deleted_jobs.extend(report.deleted_jobs);
}

async fn remove_clone_dir(run: &WorkflowRun) {
    match tokio::fs::remove_dir_all(&run.cloned_repo_dir).await {
        Ok(()) => {
            info!(dir = %run.cloned_repo_dir.display(), "removed cloned repository");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(dir = %run.cloned_repo_dir.display(), error = %e, "cannot remove cloned repository");
        }
    }
}
