use crate::types::{SchedulingContext, ScoreResult};
use crate::{Result, SchedulerError};
use podplacer_core::{NodeInfo, PodInfo};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const MAX_SCORE: f64 = 100.0;
/// Load score lost per pod already on the node
pub const LOAD_PENALTY_PER_POD: f64 = 10.0;
/// Spread score lost per similar pod already on the node
pub const SPREAD_PENALTY_PER_POD: f64 = 20.0;
pub const LOAD_WEIGHT: f64 = 0.6;
pub const SPREAD_WEIGHT: f64 = 0.4;
/// Spread score reported when the pod has no spread label
pub const NEUTRAL_SPREAD_SCORE: f64 = 50.0;
/// Pod label that identifies "similar" pods for spreading
pub const DEFAULT_SPREAD_LABEL: &str = "app";

/// Load score for a node running `pod_count` pods
pub fn load_score(pod_count: usize) -> f64 {
    (MAX_SCORE - LOAD_PENALTY_PER_POD * pod_count as f64).max(0.0)
}

/// Spread score for a node given the pods it runs
///
/// A pod is similar when it carries every label in `spread`. An empty node
/// always scores the maximum.
pub fn spread_score<'a>(
    pods_on_node: impl IntoIterator<Item = &'a PodInfo>,
    spread: &BTreeMap<String, String>,
) -> f64 {
    let mut total = 0usize;
    let mut similar = 0usize;

    for pod in pods_on_node {
        total += 1;
        if spread.iter().all(|(k, v)| pod.labels.get(k) == Some(v)) {
            similar += 1;
        }
    }

    if total == 0 {
        return MAX_SCORE;
    }

    (MAX_SCORE - SPREAD_PENALTY_PER_POD * similar as f64).max(0.0)
}

/// Labels used to find pods similar to `pod`
pub fn spread_requirement(pod: &PodInfo, spread_label: &str) -> Option<BTreeMap<String, String>> {
    pod.labels
        .get(spread_label)
        .map(|value| BTreeMap::from([(spread_label.to_string(), value.clone())]))
}

/// Picks one node out of the filtered candidates
pub trait NodeScorer: Send + Sync {
    /// Choose a node for the pod
    ///
    /// Fails with `NoEligibleNodes` when `candidates` is empty.
    fn select(&self, context: &SchedulingContext, candidates: &[NodeInfo]) -> Result<ScoreResult>;

    /// Name of the scoring policy
    fn name(&self) -> &str;
}

fn ensure_candidates(
    scorer: &dyn NodeScorer,
    context: &SchedulingContext,
    candidates: &[NodeInfo],
) -> Result<()> {
    if candidates.is_empty() {
        return Err(SchedulerError::no_eligible_nodes(
            context.pod_key(),
            scorer.name(),
            Vec::new(),
        ));
    }
    Ok(())
}

fn candidate_names(candidates: &[NodeInfo]) -> Vec<String> {
    candidates.iter().map(|n| n.name.clone()).collect()
}

/// Weighted blend of node load and spread of similar pods
pub struct WeightedLoadSpread {
    spread_label: String,
}

impl WeightedLoadSpread {
    pub fn new(spread_label: impl Into<String>) -> Self {
        Self {
            spread_label: spread_label.into(),
        }
    }

    /// Score one node
    pub fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        let load = load_score(context.snapshot.pod_count(&node.name));

        let (spread, total) = match spread_requirement(&context.pod, &self.spread_label) {
            Some(labels) => {
                let spread = spread_score(context.snapshot.pods_on(&node.name), &labels);
                (spread, LOAD_WEIGHT * load + SPREAD_WEIGHT * spread)
            }
            None => (NEUTRAL_SPREAD_SCORE, load),
        };

        debug!(
            "Node {} load score: {:.1}, spread score: {:.1}, combined: {:.1}",
            node.name, load, spread, total
        );

        ScoreResult {
            node_name: node.name.clone(),
            score: total,
            load_score: Some(load),
            spread_score: Some(spread),
        }
    }
}

impl Default for WeightedLoadSpread {
    fn default() -> Self {
        Self::new(DEFAULT_SPREAD_LABEL)
    }
}

impl NodeScorer for WeightedLoadSpread {
    fn select(&self, context: &SchedulingContext, candidates: &[NodeInfo]) -> Result<ScoreResult> {
        ensure_candidates(self, context, candidates)?;

        let mut best: Option<ScoreResult> = None;
        for node in candidates {
            let result = self.score(context, node);
            // Later nodes win ties
            let better = match &best {
                Some(current) => result.score >= current.score,
                None => !result.score.is_nan(),
            };
            if better {
                best = Some(result);
            }
        }

        best.ok_or_else(|| SchedulerError::scoring_failed(context.pod_key(), candidate_names(candidates)))
    }

    fn name(&self) -> &str {
        "WeightedLoadSpread"
    }
}

/// Shared cursor for round-robin placement
///
/// Lives outside any single decision so consecutive pods rotate through
/// the candidate list.
#[derive(Debug, Default)]
pub struct SchedulerState {
    cursor: AtomicUsize,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index into a list of `count` items, or `None` if it is empty
    pub fn next_index(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    /// Current cursor value
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

/// Rotate through candidates in order
pub struct RoundRobin {
    state: Arc<SchedulerState>,
}

impl RoundRobin {
    pub fn new(state: Arc<SchedulerState>) -> Self {
        Self { state }
    }
}

impl NodeScorer for RoundRobin {
    fn select(&self, context: &SchedulingContext, candidates: &[NodeInfo]) -> Result<ScoreResult> {
        ensure_candidates(self, context, candidates)?;

        let idx = self
            .state
            .next_index(candidates.len())
            .ok_or_else(|| SchedulerError::scoring_failed(context.pod_key(), Vec::new()))?;
        let node = &candidates[idx];

        debug!("Round-robin picked node {} ({} of {})", node.name, idx + 1, candidates.len());
        Ok(ScoreResult::new(node.name.clone(), MAX_SCORE))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// Prefer the node running the fewest pods
pub struct LeastLoaded;

impl NodeScorer for LeastLoaded {
    fn select(&self, context: &SchedulingContext, candidates: &[NodeInfo]) -> Result<ScoreResult> {
        ensure_candidates(self, context, candidates)?;

        // Earlier nodes win ties
        let (node, count) = candidates
            .iter()
            .map(|n| (n, context.snapshot.pod_count(&n.name)))
            .min_by_key(|(_, count)| *count)
            .ok_or_else(|| SchedulerError::scoring_failed(context.pod_key(), candidate_names(candidates)))?;

        debug!("Node {} is least loaded with {} pods", node.name, count);
        let load = load_score(count);
        Ok(ScoreResult::new(node.name.clone(), load).with_load(load))
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ClusterSnapshot;

    fn pods_on(node: &str, count: usize, app: Option<&str>) -> Vec<PodInfo> {
        (0..count)
            .map(|i| {
                let pod = PodInfo::new("apps", format!("{}-{}", node, i), "podplacer").with_node(node);
                match app {
                    Some(app) => pod.with_label("app", app),
                    None => pod,
                }
            })
            .collect()
    }

    fn context(pod: PodInfo, nodes: Vec<NodeInfo>, pods: Vec<PodInfo>) -> SchedulingContext {
        SchedulingContext::new(pod, ClusterSnapshot::new(nodes, pods))
    }

    #[test]
    fn test_load_score() {
        assert_eq!(load_score(0), 100.0);
        assert_eq!(load_score(3), 70.0);
        assert_eq!(load_score(10), 0.0);
        assert_eq!(load_score(25), 0.0);

        for n in 0..20 {
            assert!(load_score(n) >= load_score(n + 1));
            assert!((0.0..=100.0).contains(&load_score(n)));
        }
    }

    #[test]
    fn test_spread_score() {
        let spread = BTreeMap::from([("app".to_string(), "web".to_string())]);

        assert_eq!(spread_score(std::iter::empty::<&PodInfo>(), &spread), 100.0);

        let others = pods_on("a", 3, Some("db"));
        assert_eq!(spread_score(&others, &spread), 100.0);

        let similar = pods_on("a", 2, Some("web"));
        assert_eq!(spread_score(&similar, &spread), 60.0);

        let crowded = pods_on("a", 6, Some("web"));
        assert_eq!(spread_score(&crowded, &spread), 0.0);
    }

    #[test]
    fn test_spread_score_monotone_in_similar_pods() {
        let spread = BTreeMap::from([("app".to_string(), "web".to_string())]);
        let mut previous = MAX_SCORE;
        for n in 1..8 {
            let score = spread_score(&pods_on("a", n, Some("web")), &spread);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_weighted_prefers_empty_node() {
        let nodes = vec![NodeInfo::new("x"), NodeInfo::new("y")];
        let pods = pods_on("x", 5, None);
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), pods);

        let scorer = WeightedLoadSpread::default();
        assert_eq!(scorer.score(&ctx, &nodes[0]).score, 50.0);
        assert_eq!(scorer.score(&ctx, &nodes[1]).score, 100.0);
        assert_eq!(scorer.select(&ctx, &nodes).unwrap().node_name, "y");
    }

    #[test]
    fn test_weighted_blends_spread_for_labelled_pod() {
        let nodes = vec![NodeInfo::new("a"), NodeInfo::new("b")];
        let mut pods = pods_on("a", 2, Some("web"));
        pods.extend(pods_on("b", 3, Some("db")));
        let pod = PodInfo::new("apps", "new", "podplacer").with_label("app", "web");
        let ctx = context(pod, nodes.clone(), pods);

        let scorer = WeightedLoadSpread::default();
        let a = scorer.score(&ctx, &nodes[0]);
        let b = scorer.score(&ctx, &nodes[1]);

        // a: load 80, spread 60 -> 72; b: load 70, spread 100 -> 82
        assert!((a.score - 72.0).abs() < 1e-9);
        assert!((b.score - 82.0).abs() < 1e-9);
        assert_eq!(scorer.select(&ctx, &nodes).unwrap().node_name, "b");
    }

    #[test]
    fn test_weighted_without_spread_label_reports_neutral_spread() {
        let nodes = vec![NodeInfo::new("a")];
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), pods_on("a", 1, None));

        let result = WeightedLoadSpread::default().score(&ctx, &nodes[0]);
        assert_eq!(result.spread_score, Some(NEUTRAL_SPREAD_SCORE));
        assert_eq!(result.load_score, Some(90.0));
        assert_eq!(result.score, 90.0);
    }

    #[test]
    fn test_weighted_tie_goes_to_last_node() {
        let nodes = vec![NodeInfo::new("a"), NodeInfo::new("b"), NodeInfo::new("c")];
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), Vec::new());

        let result = WeightedLoadSpread::default().select(&ctx, &nodes).unwrap();
        assert_eq!(result.node_name, "c");
    }

    #[test]
    fn test_round_robin_visits_every_node_once() {
        let nodes: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| NodeInfo::new(*n)).collect();
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), Vec::new());
        let scorer = RoundRobin::new(Arc::new(SchedulerState::new()));

        let picked: Vec<_> = (0..nodes.len())
            .map(|_| scorer.select(&ctx, &nodes).unwrap().node_name)
            .collect();
        assert_eq!(picked, vec!["a", "b", "c", "d"]);

        let result = scorer.select(&ctx, &nodes).unwrap();
        assert_eq!(result.node_name, "a");
        assert_eq!(result.score, MAX_SCORE);
        assert_eq!(result.load_score, None);
        assert_eq!(result.spread_score, None);
    }

    #[test]
    fn test_round_robin_cursor_is_shared() {
        let state = Arc::new(SchedulerState::new());
        let first = RoundRobin::new(state.clone());
        let second = RoundRobin::new(state.clone());
        let nodes = vec![NodeInfo::new("a"), NodeInfo::new("b")];
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), Vec::new());

        assert_eq!(first.select(&ctx, &nodes).unwrap().node_name, "a");
        assert_eq!(second.select(&ctx, &nodes).unwrap().node_name, "b");
        assert_eq!(state.cursor(), 2);
    }

    #[test]
    fn test_least_loaded_prefers_fewest_pods_first_on_tie() {
        let nodes = vec![NodeInfo::new("a"), NodeInfo::new("b"), NodeInfo::new("c")];
        let mut pods = pods_on("a", 2, None);
        pods.extend(pods_on("b", 1, None));
        pods.extend(pods_on("c", 1, None));
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), nodes.clone(), pods);

        let result = LeastLoaded.select(&ctx, &nodes).unwrap();
        assert_eq!(result.node_name, "b");
        assert_eq!(result.score, 90.0);
        assert_eq!(result.load_score, Some(90.0));
        assert_eq!(result.spread_score, None);
    }

    #[test]
    fn test_empty_candidates_is_no_eligible_nodes() {
        let ctx = context(PodInfo::new("apps", "new", "podplacer"), Vec::new(), Vec::new());
        let scorers: Vec<Box<dyn NodeScorer>> = vec![
            Box::new(WeightedLoadSpread::default()),
            Box::new(RoundRobin::new(Arc::new(SchedulerState::new()))),
            Box::new(LeastLoaded),
        ];

        for scorer in scorers {
            let err = scorer.select(&ctx, &[]).unwrap_err();
            assert!(matches!(err, SchedulerError::NoEligibleNodes { .. }));
        }
    }
}
