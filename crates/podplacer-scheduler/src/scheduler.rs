use crate::binder::{Binder, RetryPolicy};
use crate::filter::{FilterChain, LabelMatch, NodeFilter, ReadyWorker, TaintToleration};
use crate::score::{LeastLoaded, NodeScorer, RoundRobin, SchedulerState, WeightedLoadSpread, DEFAULT_SPREAD_LABEL};
use crate::snapshot::ClusterSnapshot;
use crate::types::{Decision, SchedulingContext};
use crate::{Result, SchedulerError};
use podplacer_client::ClusterApi;
use podplacer_core::PodInfo;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Scheduler name used when none is configured
pub const PODPLACER_SCHEDULER_NAME: &str = "podplacer";

/// Placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    /// Required labels and taints, then a weighted load and spread score
    #[default]
    Weighted,
    /// Ready workers and taints, then rotate through them
    RoundRobin,
    /// Taints only, then the node with the fewest pods
    LeastLoaded,
}

impl SchedulingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::Weighted => "weighted",
            SchedulingPolicy::RoundRobin => "round-robin",
            SchedulingPolicy::LeastLoaded => "least-loaded",
        }
    }

    /// Filter stages this policy applies, in order
    pub fn filter_chain(&self, config: &SchedulerConfig) -> FilterChain {
        let stages: Vec<Box<dyn NodeFilter>> = match self {
            SchedulingPolicy::Weighted => vec![
                Box::new(LabelMatch::new(config.required_labels.clone())),
                Box::new(TaintToleration),
            ],
            SchedulingPolicy::RoundRobin => vec![Box::new(ReadyWorker), Box::new(TaintToleration)],
            SchedulingPolicy::LeastLoaded => vec![Box::new(TaintToleration)],
        };
        FilterChain::new(stages)
    }

    /// Scorer this policy uses
    pub fn scorer(&self, config: &SchedulerConfig, state: Arc<SchedulerState>) -> Box<dyn NodeScorer> {
        match self {
            SchedulingPolicy::Weighted => Box::new(WeightedLoadSpread::new(config.spread_label.clone())),
            SchedulingPolicy::RoundRobin => Box::new(RoundRobin::new(state)),
            SchedulingPolicy::LeastLoaded => Box::new(LeastLoaded),
        }
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(SchedulingPolicy::Weighted),
            "round-robin" => Ok(SchedulingPolicy::RoundRobin),
            "least-loaded" => Ok(SchedulingPolicy::LeastLoaded),
            other => Err(format!(
                "unknown policy '{}' (expected weighted, round-robin or least-loaded)",
                other
            )),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pods requesting this scheduler name are ours
    pub scheduler_name: String,
    pub policy: SchedulingPolicy,
    /// Labels every node must carry (weighted policy)
    pub required_labels: BTreeMap<String, String>,
    /// Pod label that groups similar pods for spreading
    pub spread_label: String,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: PODPLACER_SCHEDULER_NAME.to_string(),
            policy: SchedulingPolicy::default(),
            required_labels: BTreeMap::new(),
            spread_label: DEFAULT_SPREAD_LABEL.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Pod scheduler
pub struct Scheduler {
    api: Arc<dyn ClusterApi>,
    config: SchedulerConfig,
    filters: FilterChain,
    scorer: Box<dyn NodeScorer>,
    binder: Binder,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(api: Arc<dyn ClusterApi>, config: SchedulerConfig) -> Self {
        let state = Arc::new(SchedulerState::new());
        Self {
            filters: config.policy.filter_chain(&config),
            scorer: config.policy.scorer(&config, state),
            binder: Binder::new(api.clone(), config.retry.clone()),
            api,
            config,
        }
    }

    /// Replace the binder, e.g. to control retry timing
    pub fn with_binder(mut self, binder: Binder) -> Self {
        self.binder = binder;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether `pod` is ours and still waiting for a node
    pub fn is_eligible(&self, pod: &PodInfo) -> bool {
        pod.awaits_scheduler(&self.config.scheduler_name)
    }

    /// Snapshot, filter and score, without binding
    pub async fn decide(&self, pod: &PodInfo) -> Result<Decision> {
        let snapshot = ClusterSnapshot::capture(self.api.as_ref()).await?;
        let nodes = snapshot.nodes.clone();
        let context = SchedulingContext::new(pod.clone(), snapshot);

        let candidates = self.filters.run(&context, nodes)?;
        info!(
            "Pod {} has {} eligible nodes",
            context.pod_key(),
            candidates.len()
        );

        let best = self.scorer.select(&context, &candidates)?;
        debug!(
            "{} chose node {} with score {:.1}",
            self.scorer.name(),
            best.node_name,
            best.score
        );

        Ok(Decision {
            pod: pod.pod_ref(),
            node_name: best.node_name,
            score: best.score,
        })
    }

    /// Run the full pipeline for one pod
    ///
    /// Returns `Ok(None)` without touching the cluster when the pod is not
    /// ours or already has a node.
    pub async fn schedule_pod(&self, pod: &PodInfo) -> Result<Option<Decision>> {
        if !self.is_eligible(pod) {
            debug!("Skipping pod {}: not awaiting {}", pod.pod_ref(), self.config.scheduler_name);
            return Ok(None);
        }

        let decision = self.decide(pod).await?;
        self.binder.bind(&decision.pod, &decision.node_name).await?;

        info!(
            "Scheduled pod {} to node {} with score {:.1}",
            decision.pod, decision.node_name, decision.score
        );
        Ok(Some(decision))
    }
}

/// Parse a `key=value` label requirement
pub fn parse_label(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(SchedulerError::configuration_fatal(
            format!("invalid label requirement '{}'", s),
            "Use the form key=value, e.g. --required-label zone=east",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::DelayFn;
    use futures_util::FutureExt;
    use podplacer_client::{ClientError, MockCluster};
    use podplacer_core::{NodeInfo, Taint, TaintEffect, Toleration};

    fn no_wait() -> DelayFn {
        Arc::new(|_| futures_util::future::ready(()).boxed())
    }

    fn scheduler(cluster: &MockCluster, policy: SchedulingPolicy) -> Scheduler {
        let config = SchedulerConfig {
            policy,
            ..Default::default()
        };
        let api: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
        Scheduler::new(api.clone(), config.clone())
            .with_binder(Binder::new(api, config.retry).with_delay(no_wait()))
    }

    /// A: dedicated=db:NoSchedule, B: plain worker, C: control plane
    fn three_node_cluster() -> MockCluster {
        MockCluster::with_nodes(vec![
            NodeInfo::new("a").with_taint(Taint::new("dedicated", Some("db"), TaintEffect::NoSchedule)),
            NodeInfo::new("b"),
            NodeInfo::new("c")
                .with_control_plane(true)
                .with_label("node-role.kubernetes.io/control-plane", ""),
        ])
    }

    fn db_pod(name: &str) -> PodInfo {
        PodInfo::new("apps", name, PODPLACER_SCHEDULER_NAME).with_toleration(Toleration::equal(
            "dedicated",
            "db",
            Some(TaintEffect::NoSchedule),
        ))
    }

    async fn eligible_names(cluster: &MockCluster, policy: SchedulingPolicy, pod: PodInfo) -> Vec<String> {
        let config = SchedulerConfig {
            policy,
            ..Default::default()
        };
        let snapshot = ClusterSnapshot::capture(cluster).await.unwrap();
        let nodes = snapshot.nodes.clone();
        let context = SchedulingContext::new(pod, snapshot);
        policy
            .filter_chain(&config)
            .run(&context, nodes)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect()
    }

    async fn add_pending(cluster: &MockCluster, name: &str) -> PodInfo {
        let pod = PodInfo::new("apps", name, PODPLACER_SCHEDULER_NAME);
        cluster.add_pod(pod.clone()).await;
        pod
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("weighted".parse::<SchedulingPolicy>().unwrap(), SchedulingPolicy::Weighted);
        assert_eq!(
            "round-robin".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::RoundRobin
        );
        assert_eq!(
            "least-loaded".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::LeastLoaded
        );
        assert!("random".parse::<SchedulingPolicy>().is_err());
        assert_eq!(SchedulingPolicy::RoundRobin.to_string(), "round-robin");
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("zone=east").unwrap(),
            ("zone".to_string(), "east".to_string())
        );
        assert_eq!(parse_label("empty=").unwrap(), ("empty".to_string(), String::new()));
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=east").is_err());
    }

    #[test]
    fn test_policy_filter_chains() {
        let config = SchedulerConfig::default();
        assert_eq!(
            SchedulingPolicy::Weighted.filter_chain(&config).stage_names(),
            vec!["LabelMatch", "TaintToleration"]
        );
        assert_eq!(
            SchedulingPolicy::RoundRobin.filter_chain(&config).stage_names(),
            vec!["ReadyWorker", "TaintToleration"]
        );
        assert_eq!(
            SchedulingPolicy::LeastLoaded.filter_chain(&config).stage_names(),
            vec!["TaintToleration"]
        );
    }

    #[tokio::test]
    async fn test_three_node_eligibility_per_policy() {
        let cluster = three_node_cluster();

        assert_eq!(
            eligible_names(&cluster, SchedulingPolicy::Weighted, db_pod("p")).await,
            vec!["a", "b", "c"]
        );
        assert_eq!(
            eligible_names(&cluster, SchedulingPolicy::RoundRobin, db_pod("p")).await,
            vec!["a", "b"]
        );

        // Without the toleration only B is left for round-robin
        let plain = PodInfo::new("apps", "q", PODPLACER_SCHEDULER_NAME);
        assert_eq!(
            eligible_names(&cluster, SchedulingPolicy::RoundRobin, plain).await,
            vec!["b"]
        );
    }

    #[tokio::test]
    async fn test_round_robin_rotates_across_cycles() {
        let cluster = three_node_cluster();
        let scheduler = scheduler(&cluster, SchedulingPolicy::RoundRobin);

        let mut chosen = Vec::new();
        for name in ["p1", "p2", "p3"] {
            let pod = db_pod(name);
            cluster.add_pod(pod.clone()).await;
            chosen.push(scheduler.schedule_pod(&pod).await.unwrap().unwrap().node_name);
        }

        assert_eq!(chosen, vec!["a", "b", "a"]);
        assert_eq!(cluster.bindings().await.len(), 3);
    }

    #[tokio::test]
    async fn test_weighted_spreads_onto_tolerated_nodes() {
        let cluster = three_node_cluster();
        let scheduler = scheduler(&cluster, SchedulingPolicy::Weighted);

        let pod = add_pending(&cluster, "p1").await;
        let decision = scheduler.schedule_pod(&pod).await.unwrap().unwrap();
        // A is tainted for this pod; B and C tie and the later one wins
        assert_eq!(decision.node_name, "c");
        assert!(cluster.pod("apps", "p1").await.unwrap().is_on("c"));
    }

    #[tokio::test]
    async fn test_weighted_picks_idle_node() {
        let cluster = MockCluster::with_nodes(vec![NodeInfo::new("x"), NodeInfo::new("y")]);
        for i in 0..5 {
            cluster
                .add_pod(PodInfo::new("apps", format!("busy-{}", i), "other").with_node("x"))
                .await;
        }
        let scheduler = scheduler(&cluster, SchedulingPolicy::Weighted);

        let pod = add_pending(&cluster, "new").await;
        let decision = scheduler.schedule_pod(&pod).await.unwrap().unwrap();
        assert_eq!(decision.node_name, "y");
        assert_eq!(decision.score, 100.0);
    }

    #[tokio::test]
    async fn test_assigned_pod_never_enters_pipeline() {
        let cluster = three_node_cluster();
        let scheduler = scheduler(&cluster, SchedulingPolicy::Weighted);
        // A list failure would surface if the pipeline ran
        cluster
            .fail_next_list(ClientError::connection_failed("mock", "refused"))
            .await;

        let assigned = PodInfo::new("apps", "p1", PODPLACER_SCHEDULER_NAME).with_node("b");
        assert!(scheduler.schedule_pod(&assigned).await.unwrap().is_none());

        let foreign = PodInfo::new("apps", "p2", "default-scheduler");
        assert!(scheduler.schedule_pod(&foreign).await.unwrap().is_none());

        assert_eq!(cluster.bind_attempts(), 0);
    }

    #[tokio::test]
    async fn test_no_eligible_nodes_does_not_bind() {
        let cluster = MockCluster::with_nodes(vec![NodeInfo::new("a").with_ready(false)]);
        let scheduler = scheduler(&cluster, SchedulingPolicy::RoundRobin);

        let pod = add_pending(&cluster, "p1").await;
        let err = scheduler.schedule_pod(&pod).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoEligibleNodes { ref stage, .. } if stage == "ReadyWorker"));
        assert_eq!(cluster.bind_attempts(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_cycle() {
        let cluster = three_node_cluster();
        cluster
            .fail_next_list(ClientError::unexpected_status("GET", "/api/v1/nodes", 500, ""))
            .await;
        let scheduler = scheduler(&cluster, SchedulingPolicy::LeastLoaded);

        let pod = add_pending(&cluster, "p1").await;
        let err = scheduler.schedule_pod(&pod).await.unwrap_err();
        assert_eq!(err.stage(), "snapshot");
        assert_eq!(cluster.bind_attempts(), 0);
    }

    #[tokio::test]
    async fn test_required_labels_restrict_weighted() {
        let cluster = MockCluster::with_nodes(vec![
            NodeInfo::new("east-1").with_label("zone", "east"),
            NodeInfo::new("west-1").with_label("zone", "west"),
        ]);
        let config = SchedulerConfig {
            required_labels: BTreeMap::from([("zone".to_string(), "west".to_string())]),
            ..Default::default()
        };
        let api: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
        let scheduler = Scheduler::new(api, config);

        let pod = add_pending(&cluster, "p1").await;
        let decision = scheduler.decide(&pod).await.unwrap();
        assert_eq!(decision.node_name, "west-1");
    }
}
