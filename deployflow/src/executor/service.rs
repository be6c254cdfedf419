//! Service stages: deployments that must become ready.

use std::sync::Arc;
use tracing::{info, warn};

use super::outcome::StageOutcome;
use super::poll::{poll_until, PollOutcome, PollSchedule};
use super::{StageExecutor, StepContext};
use crate::cluster::{DeploymentHandle, DeploymentRequest};
use crate::core::naming::{cluster_service_url, ingress_route};
use crate::core::{EnvVars, ServiceConfig, StageSpec};
use crate::errors::StageFailureReason;

impl StageExecutor {
    pub(super) async fn run_service(
        &self,
        ctx: &StepContext,
        stage: &StageSpec,
        service: &ServiceConfig,
        name: &str,
        env: EnvVars,
    ) -> StageOutcome {
        let request = DeploymentRequest {
            namespace: ctx.namespace.clone(),
            name: name.to_string(),
            image: ctx.image.to_string(),
            command: stage.command.clone(),
            args: stage.args.clone(),
            env: env.into_vec(),
            resources: stage.resources.clone(),
            replicas: service.replicas,
            port: service.port,
        };

        let deployment = match self.cluster.create_or_update_deployment(&request).await {
            Ok(deployment) => deployment,
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "deployment submission failed");
                return StageOutcome::failed(
                    stage,
                    name,
                    StageFailureReason::Cluster {
                        message: e.to_string(),
                    },
                );
            }
        };
        info!(
            stage = %stage.name,
            revision = deployment.revision,
            previous_revision = ?deployment.previous_revision,
            "deployment applied"
        );

        let schedule = PollSchedule::new(self.config.poll_interval(), service.readiness_timeout());
        match self.await_ready(&deployment, schedule).await {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { .. } => {
                warn!(stage = %stage.name, replicas = service.replicas, "deployment not ready in time");
                self.logs.print_logs(&deployment.namespace, &deployment.name).await;
                return StageOutcome::failed(
                    stage,
                    name,
                    StageFailureReason::ReadinessTimeout {
                        timeout_seconds: service.max_startup_time_seconds,
                    },
                )
                .with_deployment(deployment);
            }
            PollOutcome::Cancelled => {
                return StageOutcome::failed(stage, name, StageFailureReason::Cancelled)
                    .with_deployment(deployment);
            }
        }

        if let Err(e) = self
            .cluster
            .expose_deployment_as_service(&deployment, service.port)
            .await
        {
            warn!(stage = %stage.name, error = %e, "cannot expose deployment");
            return StageOutcome::failed(
                stage,
                name,
                StageFailureReason::Cluster {
                    message: e.to_string(),
                },
            )
            .with_deployment(deployment);
        }

        let mut outcome = StageOutcome::succeeded(stage, name);
        let url = cluster_service_url(&ctx.namespace, name);
        self.progress.line(&format!(
            "stage={} available at {url}:{}",
            stage.name, service.port
        ));
        outcome.service_url = Some(url);

        if service.ingress {
            let route = ingress_route(&ctx.namespace, name);
            if let Err(e) = self.cluster.create_ingress(&deployment, &route).await {
                warn!(stage = %stage.name, error = %e, "cannot create ingress");
                return StageOutcome::failed(
                    stage,
                    name,
                    StageFailureReason::Cluster {
                        message: e.to_string(),
                    },
                )
                .with_deployment(deployment);
            }
            self.progress
                .line(&format!("stage={} exposed on ingress route {route}", stage.name));
            outcome.ingress_route = Some(route);
        }

        outcome.with_deployment(deployment)
    }

    async fn await_ready(
        &self,
        deployment: &DeploymentHandle,
        schedule: PollSchedule,
    ) -> PollOutcome<()> {
        let cluster = Arc::clone(&self.cluster);
        poll_until("deployment", schedule, &self.cancel, move || {
            let cluster = Arc::clone(&cluster);
            let deployment = deployment.clone();
            async move {
                let ready = cluster.deployment_ready(&deployment).await?;
                Ok(ready.then_some(()))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::core::StageSpec;
    use crate::errors::StageFailureReason;
    use crate::executor::tests_support::harness;
    use crate::testing::{ClusterCall, FakeCluster};
    use pretty_assertions::assert_eq;

    const DEPLOYMENT: &str = "bodywork-test-project--stage-3";

    #[tokio::test]
    async fn test_new_deployment_is_exposed() {
        let h = harness(FakeCluster::new());
        let outcome = h.run(StageSpec::service("stage_3", 5000)).await;

        assert!(outcome.is_success());
        let deployment = outcome.deployment.unwrap();
        assert!(deployment.is_new());
        assert!(h.cluster.has_service(DEPLOYMENT));
        assert_eq!(h.cluster.ingress_route(DEPLOYMENT), None);
        assert_eq!(
            outcome.service_url.as_deref(),
            Some("http://bodywork-test-project--stage-3.bodywork-dev.svc.cluster.local")
        );
    }

    #[tokio::test]
    async fn test_existing_deployment_updated_in_place_with_ingress() {
        let h = harness(FakeCluster::new().with_existing_deployment(DEPLOYMENT, 4));
        let outcome = h
            .run(StageSpec::service("stage_3", 5000).with_replicas(2).with_ingress())
            .await;

        let deployment = outcome.deployment.unwrap();
        assert_eq!(deployment.previous_revision, Some(4));
        assert_eq!(deployment.revision, 5);
        assert_eq!(
            h.cluster.ingress_route(DEPLOYMENT).as_deref(),
            Some("/bodywork-dev/bodywork-test-project--stage-3")
        );
        assert_eq!(h.cluster.deployment_requests()[0].replicas, 2);
        assert!(h
            .sink
            .contains("exposed on ingress route /bodywork-dev/bodywork-test-project--stage-3"));
    }

    #[tokio::test]
    async fn test_readiness_timeout_keeps_handle() {
        let h = harness(FakeCluster::new().with_never_ready(DEPLOYMENT));
        let outcome = h
            .run(StageSpec::service("stage_3", 5000).with_timeout_seconds(0))
            .await;

        assert_eq!(
            outcome.failure.as_ref().unwrap().reason,
            StageFailureReason::ReadinessTimeout { timeout_seconds: 0 }
        );
        assert!(outcome.deployment.is_some());
        assert_eq!(
            h.cluster
                .count(|c| matches!(c, ClusterCall::ExposeService { .. })),
            0
        );
    }
}
