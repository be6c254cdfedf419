//! Best-effort printing of pod logs.

use std::sync::Arc;
use tracing::debug;

use crate::cluster::ClusterApi;
use crate::errors::DeployflowError;
use crate::events::ProgressSink;

/// Prints the logs of the latest pod backing a job or deployment.
///
/// Log retrieval never fails the caller: any problem is downgraded to a
/// `cannot get logs for <name>` line.
#[derive(Clone)]
pub struct LogStreamer {
    cluster: Arc<dyn ClusterApi>,
    progress: Arc<dyn ProgressSink>,
}

impl LogStreamer {
    /// Creates a new log streamer.
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, progress: Arc<dyn ProgressSink>) -> Self {
        Self { cluster, progress }
    }

    /// Prints the logs for `name` in `namespace`. Single attempt, no retry.
    pub async fn print_logs(&self, namespace: &str, name: &str) {
        match self.fetch_logs(namespace, name).await {
            Ok((pod, logs)) => {
                self.progress.line(&format!("---- pod logs for {pod}"));
                self.progress.block(&logs);
                self.progress.line("---- end of logs");
            }
            Err(e) => {
                debug!(namespace, name, error = %e, "log retrieval failed");
                self.progress.line(&format!("cannot get logs for {name}"));
            }
        }
    }

    async fn fetch_logs(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(String, String), DeployflowError> {
        let pod = self
            .cluster
            .latest_pod_name(namespace, name)
            .await?
            .ok_or_else(|| DeployflowError::LogRetrieval {
                name: name.to_string(),
                message: "no pod found".to_string(),
            })?;
        let logs = self.cluster.pod_logs(namespace, &pod).await?;
        Ok((pod, logs))
    }
}

impl std::fmt::Debug for LogStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterError, MockClusterApi};
    use crate::events::CollectingSink;

    const POD: &str = "bodywork-test-project--stage-1";

    fn streamer(mock: MockClusterApi) -> (LogStreamer, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        (LogStreamer::new(Arc::new(mock), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_prints_logs_verbatim() {
        let mut mock = MockClusterApi::new();
        mock.expect_latest_pod_name()
            .withf(|ns, name| ns == "the-namespace" && name == POD)
            .times(1)
            .returning(|_, _| Ok(Some(format!("{POD}-x7k2p"))));
        mock.expect_pod_logs()
            .times(1)
            .returning(|_, _| Ok("foo-bar\nsecond line".to_string()));

        let (streamer, sink) = streamer(mock);
        streamer.print_logs("the-namespace", POD).await;

        assert!(sink.contains("foo-bar"));
        assert!(sink.contains("second line"));
        assert!(!sink.contains("cannot get logs"));
    }

    #[tokio::test]
    async fn test_no_pod_prints_diagnostic() {
        let mut mock = MockClusterApi::new();
        mock.expect_latest_pod_name().returning(|_, _| Ok(None));
        mock.expect_pod_logs().never();

        let (streamer, sink) = streamer(mock);
        streamer.print_logs("the-namespace", POD).await;

        assert!(sink.contains(&format!("cannot get logs for {POD}")));
    }

    #[tokio::test]
    async fn test_lookup_error_prints_diagnostic() {
        let mut mock = MockClusterApi::new();
        mock.expect_latest_pod_name()
            .returning(|_, _| Err(ClusterError::new("list_pods", "evicted")));

        let (streamer, sink) = streamer(mock);
        streamer.print_logs("the-namespace", POD).await;

        assert_eq!(sink.lines(), vec![format!("cannot get logs for {POD}")]);
    }

    #[tokio::test]
    async fn test_log_fetch_error_prints_diagnostic() {
        let mut mock = MockClusterApi::new();
        mock.expect_latest_pod_name()
            .returning(|_, _| Ok(Some("pod-1".to_string())));
        mock.expect_pod_logs()
            .returning(|_, _| Err(ClusterError::new("read_pod_log", "timeout")));

        let (streamer, sink) = streamer(mock);
        streamer.print_logs("ns", "job-1").await;

        assert!(sink.contains("cannot get logs for job-1"));
    }
}
