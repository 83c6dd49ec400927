//! Point-in-time view of nodes and pods.
//!
//! A snapshot is taken at the start of every decision and never reused, so
//! scores always reflect the cluster as it was when the pod was placed.

use crate::{Result, SchedulerError};
use podplacer_client::ClusterApi;
use podplacer_core::{NodeInfo, PodInfo};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeInfo>,
    pub pods: Vec<PodInfo>,
}

impl ClusterSnapshot {
    pub fn new(nodes: Vec<NodeInfo>, pods: Vec<PodInfo>) -> Self {
        Self { nodes, pods }
    }

    /// Read nodes and pods from the control plane
    pub async fn capture(api: &dyn ClusterApi) -> Result<Self> {
        let nodes = fetch_nodes(api).await?;
        let pods = fetch_pods(api).await?;
        debug!(
            "Captured snapshot with {} nodes and {} pods",
            nodes.len(),
            pods.len()
        );
        Ok(Self { nodes, pods })
    }

    /// Pods currently assigned to `node_name`
    pub fn pods_on<'a>(&'a self, node_name: &'a str) -> impl Iterator<Item = &'a PodInfo> + 'a {
        self.pods.iter().filter(move |p| p.is_on(node_name))
    }

    /// Number of pods assigned to `node_name`
    pub fn pod_count(&self, node_name: &str) -> usize {
        self.pods_on(node_name).count()
    }
}

/// List every node, failing the cycle if the control plane can't be read
pub async fn fetch_nodes(api: &dyn ClusterApi) -> Result<Vec<NodeInfo>> {
    api.list_nodes()
        .await
        .map_err(|e| SchedulerError::cluster_unavailable(format!("listing nodes: {}", e)))
}

/// List every pod, failing the cycle if the control plane can't be read
pub async fn fetch_pods(api: &dyn ClusterApi) -> Result<Vec<PodInfo>> {
    api.list_pods()
        .await
        .map_err(|e| SchedulerError::cluster_unavailable(format!("listing pods: {}", e)))
}
