use crate::snapshot::ClusterSnapshot;
use podplacer_core::{PodInfo, PodRef};

/// Scheduling context containing the pod and the cluster it is placed into
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    /// Pod to be scheduled
    pub pod: PodInfo,
    /// Cluster state read for this decision
    pub snapshot: ClusterSnapshot,
}

impl SchedulingContext {
    /// Create a new scheduling context
    pub fn new(pod: PodInfo, snapshot: ClusterSnapshot) -> Self {
        Self { pod, snapshot }
    }

    /// Pod label for log records and errors
    pub fn pod_key(&self) -> String {
        self.pod.pod_ref().to_string()
    }
}

/// Result of filtering a node
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Node name
    pub node_name: String,
    /// Whether the node passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(node_name: String) -> Self {
        Self {
            node_name,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(node_name: String, reason: String) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Result of scoring a node
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    /// Node name
    pub node_name: String,
    /// Final score (0-100, higher is better)
    pub score: f64,
    /// Load component, when the scorer computed one
    pub load_score: Option<f64>,
    /// Spread component, when the scorer computed one
    pub spread_score: Option<f64>,
}

impl ScoreResult {
    /// Create a score result with no separate components
    pub fn new(node_name: String, score: f64) -> Self {
        Self {
            node_name,
            score,
            load_score: None,
            spread_score: None,
        }
    }

    pub fn with_load(mut self, load_score: f64) -> Self {
        self.load_score = Some(load_score);
        self
    }
}

/// Where a pod should run
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub pod: PodRef,
    pub node_name: String,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_result() {
        let pass = FilterResult::pass("node1".to_string());
        assert!(pass.passed);
        assert!(pass.reason.is_none());

        let fail = FilterResult::fail("node2".to_string(), "Node is not Ready".to_string());
        assert!(!fail.passed);
        assert_eq!(fail.reason, Some("Node is not Ready".to_string()));
    }

    #[test]
    fn test_context_pod_key() {
        let pod = PodInfo::new("apps", "web-0", "podplacer");
        let context = SchedulingContext::new(pod, ClusterSnapshot::default());
        assert_eq!(context.pod_key(), "apps/web-0");
    }
}
