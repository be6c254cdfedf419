//! End-to-end workflow scenarios against the in-memory cluster.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{JobStatus, RunStatus, StageSpec, FAILURE_MESSAGE_ENV_VAR, GIT_COMMIT_HASH_ENV_VAR};
    use crate::errors::{DeployflowError, StageFailureReason};
    use crate::project::ProjectConfig;
    use crate::testing::{
        fast_config, test_project_config, test_project_ref, ClusterCall, CollectingSink,
        FakeCluster, StaticProjectSource, StaticRegistry, TEST_COMMIT, TEST_IMAGE, TEST_NAMESPACE,
    };
    use crate::workflow::{RunRequest, WorkflowOrchestrator};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const STAGE_1: &str = "bodywork-test-project--stage-1";
    const STAGE_2: &str = "bodywork-test-project--stage-2";
    const STAGE_3: &str = "bodywork-test-project--stage-3";
    const SERVE_A: &str = "bodywork-test-project--serve-a";
    const SERVE_B: &str = "bodywork-test-project--serve-b";
    const TRAIN: &str = "bodywork-test-project--train";
    const ON_FAIL: &str = "bodywork-test-project--on-fail";

    struct Scenario {
        cluster: Arc<FakeCluster>,
        source: Arc<StaticProjectSource>,
        registry: Arc<StaticRegistry>,
        sink: Arc<CollectingSink>,
        orchestrator: WorkflowOrchestrator,
    }

    impl Scenario {
        fn new(cluster: FakeCluster, config: ProjectConfig) -> Self {
            Self::with_registry(cluster, config, StaticRegistry::with_images([TEST_IMAGE]))
        }

        fn with_registry(cluster: FakeCluster, config: ProjectConfig, registry: StaticRegistry) -> Self {
            let cluster = Arc::new(cluster);
            let source = Arc::new(StaticProjectSource::new(config));
            let registry = Arc::new(registry);
            let sink = Arc::new(CollectingSink::new());
            let orchestrator = WorkflowOrchestrator::new(
                cluster.clone(),
                source.clone(),
                registry.clone(),
                sink.clone(),
                fast_config(),
            );
            Self {
                cluster,
                source,
                registry,
                sink,
                orchestrator,
            }
        }

        fn request() -> RunRequest {
            RunRequest::new(TEST_NAMESPACE, test_project_ref())
        }
    }

    fn cluster() -> FakeCluster {
        FakeCluster::new().with_namespace(TEST_NAMESPACE)
    }

    /// `serve_a,serve_b >> train`, where `serve_a` already runs at revision 3.
    fn rollback_project() -> ProjectConfig {
        ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "serve_a,serve_b >> train")
            .with_stage(StageSpec::service("serve_a", 8000).with_timeout_seconds(1))
            .with_stage(StageSpec::service("serve_b", 8001).with_timeout_seconds(1))
            .with_stage(StageSpec::batch("train"))
    }

    fn env_value<'a>(env: &'a [crate::core::EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    #[tokio::test]
    async fn test_happy_path_runs_every_step_and_cleans_up_jobs() {
        let s = Scenario::new(cluster(), test_project_config());

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.succeeded_stages, vec!["stage_1", "stage_2", "stage_3"]);
        assert!(result.failed_stages.is_empty());
        assert_eq!(result.deleted_jobs, vec![STAGE_1, STAGE_2]);
        assert!(!s.cluster.has_job(STAGE_1));
        assert!(!s.cluster.has_job(STAGE_2));
        assert!(s.cluster.has_service(STAGE_3));

        for request in s.cluster.job_requests() {
            assert_eq!(env_value(&request.env, GIT_COMMIT_HASH_ENV_VAR), Some(TEST_COMMIT));
            assert_eq!(request.image, TEST_IMAGE);
        }
        let deployment = &s.cluster.deployment_requests()[0];
        assert_eq!(env_value(&deployment.env, GIT_COMMIT_HASH_ENV_VAR), Some(TEST_COMMIT));

        let started = s
            .sink
            .position("attempting to run workflow for project=https://github.com/bodywork-ml/bodywork-test-project on branch=master in namespace=bodywork-dev")
            .unwrap();
        let finished = s
            .sink
            .position("successfully ran workflow for project=https://github.com/bodywork-ml/bodywork-test-project on branch=master")
            .unwrap();
        assert!(started < finished);
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let s = Scenario::new(cluster(), test_project_config());
        s.orchestrator.run(&Scenario::request()).await.unwrap();

        let calls = s.cluster.calls();
        let first_step_done = calls
            .iter()
            .position(|c| *c == ClusterCall::DeleteJob(STAGE_1.to_string()))
            .unwrap();
        let second_step_started = calls
            .iter()
            .position(|c| matches!(c, ClusterCall::CreateJob { name, .. } if name == STAGE_2))
            .unwrap();
        assert!(first_step_done < second_step_started);
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_the_workflow() {
        let config = ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "stage_1 >> stage_2,stage_3")
            .with_stage(StageSpec::batch("stage_1").with_retries(1))
            .with_stage(StageSpec::batch("stage_2"))
            .with_stage(StageSpec::service("stage_3", 5000));
        let s = Scenario::new(
            cluster()
                .with_job_outcomes(STAGE_1, vec![JobStatus::Failed, JobStatus::Failed])
                .with_pod_logs(STAGE_1, "Traceback: boom"),
            config,
        );

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code(), 1);
        assert_eq!(
            result.failed_stages[0].reason,
            StageFailureReason::RetriesExhausted { attempts: 2 }
        );
        assert!(result.error.as_deref().unwrap().contains("stage=stage_1 failed"));
        assert_eq!(result.deleted_jobs, vec![STAGE_1]);
        assert!(s.cluster.deployment_requests().is_empty());
        assert!(!s.cluster.job_requests().iter().any(|r| r.name == STAGE_2));
        assert!(s.sink.contains("Traceback: boom"));
        assert!(s.sink.contains("failed to run workflow for project="));
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back_earlier_deployments() {
        let s = Scenario::new(
            cluster()
                .with_existing_deployment(SERVE_A, 3)
                .with_job_outcomes(TRAIN, vec![JobStatus::Failed]),
            rollback_project(),
        );

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.succeeded_stages, vec!["serve_a", "serve_b"]);
        assert_eq!(result.rolled_back_deployments, vec![SERVE_A]);
        assert_eq!(result.deleted_deployments, vec![SERVE_B]);
        assert_eq!(result.deleted_jobs, vec![TRAIN]);
        assert!(!result.is_partial_rollback());

        assert_eq!(s.cluster.deployment_revision(SERVE_A), Some(3));
        assert_eq!(s.cluster.deployment_revision(SERVE_B), None);

        let calls = s.cluster.calls();
        let deleted_b = calls
            .iter()
            .position(|c| *c == ClusterCall::DeleteDeployment(SERVE_B.to_string()))
            .unwrap();
        let rolled_back_a = calls
            .iter()
            .position(|c| *c == ClusterCall::RollbackDeployment(SERVE_A.to_string()))
            .unwrap();
        assert!(deleted_b < rolled_back_a);
    }

    #[tokio::test]
    async fn test_readiness_timeout_reports_rollout_failure() {
        let config = ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "serve_a")
            .with_stage(StageSpec::service("serve_a", 8000).with_timeout_seconds(0));
        let s = Scenario::new(cluster().with_never_ready(SERVE_A), config);

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(
            result.failed_stages[0].reason,
            StageFailureReason::ReadinessTimeout { timeout_seconds: 0 }
        );
        assert_eq!(result.deleted_deployments, vec![SERVE_A]);
        assert!(s.sink.contains("deployments failed to roll-out successfully"));
    }

    #[tokio::test]
    async fn test_invalid_namespace_touches_nothing() {
        let s = Scenario::new(FakeCluster::new(), test_project_config());

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(err.to_string().contains("bodywork-dev is not a valid namespace"));
        assert!(s.cluster.mutations().is_empty());
        assert!(s.source.fetched_into().is_empty());
        assert_eq!(s.registry.checks(), 0);
        assert!(s.sink.contains("failed to run workflow for project="));
    }

    #[tokio::test]
    async fn test_missing_image_touches_nothing() {
        let s = Scenario::with_registry(
            cluster(),
            test_project_config(),
            StaticRegistry::with_images(Vec::<String>::new()),
        );

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(matches!(err, DeployflowError::Configuration(_)));
        assert!(err.to_string().contains("cannot locate bodyworkml/bodywork-core:latest"));
        assert!(s.cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_registry_touches_nothing() {
        let s = Scenario::with_registry(cluster(), test_project_config(), StaticRegistry::unreachable());

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(matches!(err, DeployflowError::RegistryUnreachable { .. }));
        assert!(s.cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_image_override_is_validated_and_used() {
        let s = Scenario::with_registry(
            cluster(),
            test_project_config(),
            StaticRegistry::with_images(["acme/custom:v2"]),
        );
        let request = Scenario::request().with_image_override("acme/custom:v2");

        let result = s.orchestrator.run(&request).await.unwrap();

        assert!(result.is_success());
        assert!(s
            .cluster
            .job_requests()
            .iter()
            .all(|r| r.image == "acme/custom:v2"));
    }

    #[tokio::test]
    async fn test_invalid_graph_touches_nothing() {
        let config = ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "stage_1 >> ghost")
            .with_stage(StageSpec::batch("stage_1"));
        let s = Scenario::new(cluster(), config);

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(matches!(err, DeployflowError::Configuration(_)));
        assert!(err.to_string().contains("ghost"));
        assert!(s.cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_colliding_stage_names_touch_nothing() {
        let config = ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "stage_1,stage-1")
            .with_stage(StageSpec::batch("stage_1"))
            .with_stage(StageSpec::batch("stage-1"));
        let s = Scenario::new(cluster(), config);

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(matches!(err, DeployflowError::Configuration(_)));
        assert!(err.to_string().contains(STAGE_1));
        assert!(s.cluster.job_requests().is_empty());
        assert!(s.cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_updates_deployments_in_place() {
        let s = Scenario::new(cluster(), test_project_config());

        let first = s.orchestrator.run(&Scenario::request()).await.unwrap();
        let second = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert!(first.is_success());
        assert!(second.is_success());
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(s.cluster.deployment_revision(STAGE_3), Some(2));
        assert_eq!(s.cluster.deployment_requests().len(), 2);
        assert!(s.cluster.has_service(STAGE_3));

        for job in [STAGE_1, STAGE_2] {
            let created = s
                .cluster
                .count(|c| matches!(c, ClusterCall::CreateJob { name, attempt: 1 } if name == job));
            let deleted = s
                .cluster
                .count(|c| *c == ClusterCall::DeleteJob(job.to_string()));
            assert_eq!((created, deleted), (2, 2), "job {job}");
            assert!(!s.cluster.has_job(job));
        }
        assert_eq!(second.deleted_jobs, vec![STAGE_1, STAGE_2]);
        assert_eq!(
            s.cluster
                .count(|c| *c == ClusterCall::ApplyDeployment(STAGE_3.to_string())),
            2
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let s = Scenario::new(cluster(), test_project_config());
        s.orchestrator.cancellation_token().cancel("shutdown");

        let err = s.orchestrator.run(&Scenario::request()).await.unwrap_err();

        assert!(matches!(err, DeployflowError::Cancelled(ref reason) if reason == "shutdown"));
        assert!(s.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_during_step_rolls_back_and_skips_failure_stage() {
        let config = ProjectConfig::new("bodywork-test-project", TEST_IMAGE, "serve_a >> train")
            .with_stage(StageSpec::service("serve_a", 8000))
            .with_stage(StageSpec::batch("train"))
            .with_stage(StageSpec::batch("on_fail"))
            .with_failure_stage("on_fail");
        let token = Arc::new(CancellationToken::new());
        let s = Scenario::new(cluster().with_hanging_job(TRAIN), config);
        let orchestrator = s.orchestrator.with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel("interrupted");
        });
        let result = orchestrator.run(&Scenario::request()).await.unwrap();
        canceller.await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("interrupted"));
        assert_eq!(result.deleted_deployments, vec![SERVE_A]);
        assert!(result.failure_stage.is_none());
        assert!(!s
            .cluster
            .job_requests()
            .iter()
            .any(|r| r.name.ends_with("on-fail")));
    }

    #[tokio::test]
    async fn test_partial_rollback_is_reported() {
        let s = Scenario::new(
            cluster()
                .with_existing_deployment(SERVE_A, 3)
                .with_failing_cleanup(SERVE_A)
                .with_job_outcomes(TRAIN, vec![JobStatus::Failed]),
            rollback_project(),
        );

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.is_partial_rollback());
        assert_eq!(result.rollback_failures.len(), 1);
        assert_eq!(result.rollback_failures[0].resource, SERVE_A);
        assert_eq!(result.deleted_deployments, vec![SERVE_B]);
        assert_eq!(s.cluster.deployment_revision(SERVE_A), Some(4));
        assert!(s.sink.contains("failed to roll back deployment"));
    }

    #[tokio::test]
    async fn test_failure_stage_runs_after_rollback() {
        let config = rollback_project()
            .with_stage(StageSpec::batch("on_fail").with_command(["python", "alert.py"]))
            .with_failure_stage("on_fail");
        let s = Scenario::new(
            cluster().with_job_outcomes(TRAIN, vec![JobStatus::Failed]),
            config,
        );

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        let failure_stage = result.failure_stage.as_ref().unwrap();
        assert!(failure_stage.is_success());
        assert_eq!(failure_stage.stage, "on_fail");

        let request = s
            .cluster
            .job_requests()
            .into_iter()
            .find(|r| r.name == "bodywork-test-project--on-fail")
            .unwrap();
        let message = env_value(&request.env, FAILURE_MESSAGE_ENV_VAR).unwrap();
        assert!(message.contains("stage=train failed"));
        assert_eq!(env_value(&request.env, GIT_COMMIT_HASH_ENV_VAR), Some(TEST_COMMIT));

        let calls = s.cluster.calls();
        let rollback_done = calls
            .iter()
            .position(|c| *c == ClusterCall::DeleteDeployment(SERVE_A.to_string()))
            .unwrap();
        let failure_stage_started = calls
            .iter()
            .position(|c| matches!(c, ClusterCall::CreateJob { name, .. } if name.ends_with("on-fail")))
            .unwrap();
        assert!(rollback_done < failure_stage_started);
        assert!(result
            .deleted_jobs
            .contains(&"bodywork-test-project--on-fail".to_string()));
    }

    #[tokio::test]
    async fn test_failure_stage_job_left_behind_is_not_a_rollback_failure() {
        let config = rollback_project()
            .with_stage(StageSpec::batch("on_fail"))
            .with_failure_stage("on_fail");
        let s = Scenario::new(
            cluster()
                .with_job_outcomes(TRAIN, vec![JobStatus::Failed])
                .with_failing_cleanup(ON_FAIL),
            config,
        );

        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.failure_stage.as_ref().unwrap().is_success());
        assert!(result.rollback_failures.is_empty());
        assert!(!result.is_partial_rollback());
        assert!(!result.deleted_jobs.contains(&ON_FAIL.to_string()));
        assert!(s.cluster.has_job(ON_FAIL));
    }

    #[tokio::test]
    async fn test_owned_clone_dir_is_removed() {
        let s = Scenario::new(cluster(), test_project_config());
        s.orchestrator.run(&Scenario::request()).await.unwrap();

        let dirs = s.source.fetched_into();
        assert_eq!(dirs.len(), 1);
        assert!(!dirs[0].exists());
    }

    #[tokio::test]
    async fn test_caller_clone_dir_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("checkout");
        let s = Scenario::new(cluster(), test_project_config());

        s.orchestrator
            .run(&Scenario::request().with_cloned_repo_dir(&dir))
            .await
            .unwrap();

        assert!(dir.join("deployflow.json").exists());
    }

    #[tokio::test]
    async fn test_result_serializes() {
        let s = Scenario::new(cluster(), test_project_config());
        let result = s.orchestrator.run(&Scenario::request()).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["succeeded_stages"][2], "stage_3");
    }
}
