use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use podplacer_core::{NodeInfo, PodInfo, WatchEvent};
use std::time::Duration;

/// Stream of pod lifecycle events; ends when the server-side timeout elapses
pub type PodEventStream = BoxStream<'static, Result<WatchEvent<PodInfo>>>;

/// Trait for control-plane access
///
/// Every call is a full read or a single write against the API server.
/// Nothing is cached between calls. `MockCluster` implements it for tests.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// List every pod in every namespace
    async fn list_pods(&self) -> Result<Vec<PodInfo>>;

    /// Subscribe to pod events across all namespaces
    async fn watch_pods(&self, timeout: Duration) -> Result<PodEventStream>;

    /// Commit a pod to a node by creating a Binding
    async fn create_binding(&self, namespace: &str, pod_name: &str, node_name: &str)
        -> Result<()>;
}
