//! Stage execution.
//!
//! The executor turns stages into cluster resources and waits for them:
//! batch stages become jobs retried up to `retries + 1` times, service
//! stages become deployments that must report ready within their startup
//! budget. Stages of one step run as concurrent tokio tasks.

mod batch;
mod outcome;
mod poll;
mod retry;
mod service;

pub use outcome::{StageOutcome, StepOutcome};
pub use poll::{poll_until, PollOutcome, PollSchedule, PollState};
pub use retry::{should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::cancellation::CancellationToken;
use crate::cluster::{ClusterApi, ClusterError, SecretsRequest};
use crate::config::EngineConfig;
use crate::core::naming::resource_name;
use crate::core::{EnvVars, StageKind, StageSpec, Step};
use crate::errors::StageFailureReason;
use crate::events::ProgressSink;
use crate::image::ImageRef;
use crate::logs::LogStreamer;
use crate::observability::{stage_span, SpanTimer};

/// Everything the stages of a run share.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Namespace to deploy into.
    pub namespace: String,
    /// Project name, the prefix of every resource name.
    pub project_name: String,
    /// Validated runtime image.
    pub image: ImageRef,
    /// Variables every stage receives. Never mutated by the executor.
    pub shared_env: Arc<EnvVars>,
    /// Group that secret references are resolved in.
    pub secrets_group: String,
}

impl StepContext {
    /// Name of the cluster resource backing `stage`.
    #[must_use]
    pub fn resource_name(&self, stage: &StageSpec) -> String {
        resource_name(&self.project_name, &stage.name)
    }
}

/// Runs stages against the cluster.
#[derive(Clone)]
pub struct StageExecutor {
    cluster: Arc<dyn ClusterApi>,
    logs: LogStreamer,
    progress: Arc<dyn ProgressSink>,
    config: Arc<EngineConfig>,
    cancel: Arc<CancellationToken>,
}

impl StageExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        progress: Arc<dyn ProgressSink>,
        config: Arc<EngineConfig>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            logs: LogStreamer::new(cluster.clone(), progress.clone()),
            cluster,
            progress,
            config,
            cancel,
        }
    }

    /// Runs every stage of `step` concurrently and waits for all of them.
    ///
    /// A failing stage does not stop its siblings; the outcome lists every
    /// stage in step order.
    pub async fn run_step(&self, ctx: &Arc<StepContext>, step: &Step) -> StepOutcome {
        info!(step = step.index, stages = ?step.stage_names(), "running step");

        let mut tasks = FuturesUnordered::new();
        for stage in &step.stages {
            let executor = self.clone();
            let task_ctx = ctx.clone();
            let task_stage = stage.clone();
            let index = step.index;
            let span = stage_span(&stage.name, &stage.kind.to_string(), index);

            let handle = tokio::spawn(
                async move { executor.run_stage(&task_ctx, &task_stage).await }.instrument(span),
            );
            let stage = stage.clone();
            tasks.push(async move { (stage, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(step.stages.len());
        while let Some((stage, joined)) = tasks.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                warn!(stage = %stage.name, error = %e, "stage task did not complete");
                self.progress
                    .line(&format!("failed to run stage={}", stage.name));
                StageOutcome::failed(
                    &stage,
                    ctx.resource_name(&stage),
                    StageFailureReason::Internal {
                        message: format!("task join error: {e}"),
                    },
                )
            });
            outcomes.push(outcome);
        }

        let position = |name: &str| step.stages.iter().position(|s| s.name == name);
        outcomes.sort_by_key(|o| position(&o.stage));

        StepOutcome {
            index: step.index,
            outcomes,
        }
    }

    /// Runs a single stage outside of any step, such as the failure stage.
    pub async fn run_isolated(&self, ctx: &Arc<StepContext>, stage: &Arc<StageSpec>) -> StageOutcome {
        let span = stage_span(&stage.name, &stage.kind.to_string(), usize::MAX);
        self.run_stage(ctx, stage).instrument(span).await
    }

    async fn run_stage(&self, ctx: &StepContext, stage: &StageSpec) -> StageOutcome {
        let timer = SpanTimer::start();
        let name = ctx.resource_name(stage);
        self.progress
            .line(&format!("attempting to run stage={}", stage.name));

        let outcome = match self.stage_env(ctx, stage).await {
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "cannot resolve stage secrets");
                StageOutcome::failed(
                    stage,
                    &name,
                    StageFailureReason::Cluster {
                        message: e.to_string(),
                    },
                )
            }
            Ok(env) => match &stage.kind {
                StageKind::Batch(batch) => self.run_batch(ctx, stage, batch, &name, env).await,
                StageKind::Service(service) => {
                    self.run_service(ctx, stage, service, &name, env).await
                }
            },
        };

        if outcome.is_success() {
            self.progress
                .line(&format!("successfully ran stage={}", stage.name));
        } else {
            self.progress
                .line(&format!("failed to run stage={}", stage.name));
        }

        outcome.with_duration_ms(timer.elapsed_ms())
    }

    /// Shared variables, then stage variables, then secret-derived ones.
    async fn stage_env(&self, ctx: &StepContext, stage: &StageSpec) -> Result<EnvVars, ClusterError> {
        let env = ctx.shared_env.merged(&stage.env);
        if stage.secrets.is_empty() {
            return Ok(env);
        }

        let request = SecretsRequest {
            namespace: ctx.namespace.clone(),
            group: ctx.secrets_group.clone(),
            secrets: stage.secrets.clone(),
        };
        let secret_vars = self.cluster.env_vars_from_secrets(&request).await?;
        Ok(env.merged(&secret_vars))
    }
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
