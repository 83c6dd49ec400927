use crate::error::{ClientError, Result};
use crate::traits::{ClusterApi, PodEventStream};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use podplacer_core::{NodeInfo, PodInfo, WatchEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// A binding the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRecord {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: String,
}

/// One scripted watch subscription
enum WatchScript {
    Events(Vec<Result<WatchEvent<PodInfo>>>),
    Fail(ClientError),
}

/// In-memory control plane for tests
///
/// Holds nodes and pods, records bindings, and replays scripted failures.
/// A successful binding assigns the pod, so later reads observe it.
#[derive(Clone, Default)]
pub struct MockCluster {
    nodes: Arc<RwLock<Vec<NodeInfo>>>,
    pods: Arc<RwLock<Vec<PodInfo>>>,
    bindings: Arc<Mutex<Vec<BindingRecord>>>,
    bind_failures: Arc<Mutex<VecDeque<ClientError>>>,
    list_failures: Arc<Mutex<VecDeque<ClientError>>>,
    watch_scripts: Arc<Mutex<VecDeque<WatchScript>>>,
    bind_attempts: Arc<AtomicUsize>,
    watch_calls: Arc<AtomicUsize>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            ..Default::default()
        }
    }

    pub async fn add_node(&self, node: NodeInfo) {
        self.nodes.write().await.push(node);
    }

    pub async fn add_pod(&self, pod: PodInfo) {
        self.pods.write().await.push(pod);
    }

    /// Fail the next binding attempt with `error`
    pub async fn fail_next_binding(&self, error: ClientError) {
        self.bind_failures.lock().await.push_back(error);
    }

    /// Fail the next list call (nodes or pods) with `error`
    pub async fn fail_next_list(&self, error: ClientError) {
        self.list_failures.lock().await.push_back(error);
    }

    /// Queue a watch subscription that delivers `events` and then ends
    pub async fn push_watch(&self, events: Vec<Result<WatchEvent<PodInfo>>>) {
        self.watch_scripts
            .lock()
            .await
            .push_back(WatchScript::Events(events));
    }

    /// Queue a watch subscription that fails to connect
    pub async fn push_watch_failure(&self, error: ClientError) {
        self.watch_scripts
            .lock()
            .await
            .push_back(WatchScript::Fail(error));
    }

    pub async fn bindings(&self) -> Vec<BindingRecord> {
        self.bindings.lock().await.clone()
    }

    pub async fn pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.pods
            .read()
            .await
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned()
    }

    pub fn bind_attempts(&self) -> usize {
        self.bind_attempts.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        if let Some(err) = self.list_failures.lock().await.pop_front() {
            return Err(err);
        }
        Ok(self.nodes.read().await.clone())
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        if let Some(err) = self.list_failures.lock().await.pop_front() {
            return Err(err);
        }
        Ok(self.pods.read().await.clone())
    }

    async fn watch_pods(&self, _timeout: Duration) -> Result<PodEventStream> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);

        match self.watch_scripts.lock().await.pop_front() {
            Some(WatchScript::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(WatchScript::Fail(err)) => Err(err),
            // Nothing scripted: behave like an idle watch
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn create_binding(&self, namespace: &str, pod_name: &str, node_name: &str) -> Result<()> {
        self.bind_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.bind_failures.lock().await.pop_front() {
            return Err(err);
        }

        let url = format!("/api/v1/namespaces/{}/pods/{}/binding", namespace, pod_name);
        let mut pods = self.pods.write().await;
        match pods
            .iter_mut()
            .find(|p| p.namespace == namespace && p.name == pod_name)
        {
            Some(pod) if pod.node_name.is_some() => {
                return Err(ClientError::unexpected_status(
                    "POST",
                    url,
                    409,
                    format!("pod {} is already assigned", pod_name),
                ));
            }
            Some(pod) => {
                pod.node_name = Some(node_name.to_string());
            }
            None => {
                return Err(ClientError::unexpected_status(
                    "POST",
                    url,
                    404,
                    format!("pods \"{}\" not found", pod_name),
                ));
            }
        }

        debug!("Mock: bound {}/{} to {}", namespace, pod_name, node_name);
        self.bindings.lock().await.push(BindingRecord {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            node_name: node_name.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_binding_assigns_pod() {
        let cluster = MockCluster::with_nodes(vec![NodeInfo::new("worker-1")]);
        cluster
            .add_pod(PodInfo::new("apps", "web-0", "podplacer"))
            .await;

        cluster
            .create_binding("apps", "web-0", "worker-1")
            .await
            .unwrap();

        let pod = cluster.pod("apps", "web-0").await.unwrap();
        assert!(pod.is_on("worker-1"));
        assert_eq!(cluster.bindings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_binding_conflicts() {
        let cluster = MockCluster::new();
        cluster
            .add_pod(PodInfo::new("apps", "web-0", "podplacer").with_node("worker-1"))
            .await;

        let err = cluster
            .create_binding("apps", "web-0", "worker-2")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedStatus { status: 409, .. }));
        assert!(cluster.bindings().await.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let cluster = MockCluster::new();
        cluster
            .add_pod(PodInfo::new("apps", "web-0", "podplacer"))
            .await;
        cluster
            .fail_next_binding(ClientError::connection_failed("mock", "reset"))
            .await;

        assert!(cluster.create_binding("apps", "web-0", "n").await.is_err());
        assert!(cluster.create_binding("apps", "web-0", "n").await.is_ok());
        assert_eq!(cluster.bind_attempts(), 2);
    }

    #[tokio::test]
    async fn test_scripted_watch_ends_after_events() {
        let cluster = MockCluster::new();
        cluster
            .push_watch(vec![Ok(WatchEvent::added(PodInfo::new(
                "apps", "web-0", "podplacer",
            )))])
            .await;

        let events: Vec<_> = cluster
            .watch_pods(Duration::from_secs(60))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(cluster.watch_calls(), 1);
    }
}
