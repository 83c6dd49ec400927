use crate::types::{FilterResult, SchedulingContext};
use crate::{Result, SchedulerError};
use podplacer_core::{NodeInfo, Taint, Toleration, TolerationOperator};
use std::collections::BTreeMap;
use tracing::debug;

/// Filter predicate trait
pub trait NodeFilter: Send + Sync {
    /// Filter a node for the given pod
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Filter for operator-configured required labels
///
/// A node passes only when it carries every required key with exactly the
/// required value. No requirements means every node passes.
pub struct LabelMatch {
    required: BTreeMap<String, String>,
}

impl LabelMatch {
    pub fn new(required: BTreeMap<String, String>) -> Self {
        Self { required }
    }
}

impl NodeFilter for LabelMatch {
    fn filter(&self, _context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        for (key, value) in &self.required {
            if node.labels.get(key) != Some(value) {
                return FilterResult::fail(
                    node.name.clone(),
                    format!("Required label mismatch: {}={}", key, value),
                );
            }
        }

        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "LabelMatch"
    }
}

/// Whether a single toleration covers a single taint
///
/// Keys must be equal. A toleration without an effect covers every effect.
/// `Exists` ignores the value; `Equal` requires the values to match.
pub fn toleration_matches(toleration: &Toleration, taint: &Taint) -> bool {
    if toleration.key != taint.key {
        return false;
    }

    if let Some(effect) = toleration.effect {
        if effect != taint.effect {
            return false;
        }
    }

    match toleration.operator {
        TolerationOperator::Exists => true,
        TolerationOperator::Equal => toleration.value == taint.value,
    }
}

/// First taint on a node that none of the tolerations cover
pub fn untolerated_taint<'a>(tolerations: &[Toleration], taints: &'a [Taint]) -> Option<&'a Taint> {
    taints
        .iter()
        .find(|taint| !tolerations.iter().any(|t| toleration_matches(t, taint)))
}

/// Filter for taints and tolerations
pub struct TaintToleration;

impl NodeFilter for TaintToleration {
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        match untolerated_taint(&context.pod.tolerations, &node.taints) {
            Some(taint) => FilterResult::fail(
                node.name.clone(),
                format!("Pod does not tolerate taint: {}={}", taint.key, taint.effect),
            ),
            None => FilterResult::pass(node.name.clone()),
        }
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

/// Filter keeping Ready worker nodes only
pub struct ReadyWorker;

impl NodeFilter for ReadyWorker {
    fn filter(&self, _context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        if !node.ready {
            return FilterResult::fail(node.name.clone(), "Node is not Ready".to_string());
        }
        if node.control_plane {
            return FilterResult::fail(node.name.clone(), "Node is a control-plane node".to_string());
        }

        FilterResult::pass(node.name.clone())
    }

    fn name(&self) -> &str {
        "ReadyWorker"
    }
}

/// Ordered list of filters applied one after another
pub struct FilterChain {
    stages: Vec<Box<dyn NodeFilter>>,
}

impl FilterChain {
    pub fn new(stages: Vec<Box<dyn NodeFilter>>) -> Self {
        Self { stages }
    }

    /// Names of the stages in order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage, each on the survivors of the previous one
    ///
    /// Fails with `NoEligibleNodes` naming the first stage that leaves
    /// nothing behind, along with the nodes that stage was given.
    pub fn run(&self, context: &SchedulingContext, nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>> {
        let mut survivors = nodes;

        for stage in &self.stages {
            let before = survivors.len();
            let considered: Vec<String> = survivors.iter().map(|n| n.name.clone()).collect();

            survivors.retain(|node| {
                let result = stage.filter(context, node);
                if !result.passed {
                    debug!(
                        "Node {} filtered out by {}: {}",
                        result.node_name,
                        stage.name(),
                        result.reason.unwrap_or_default()
                    );
                }
                result.passed
            });

            debug!("{}: {} -> {} nodes", stage.name(), before, survivors.len());

            if survivors.is_empty() {
                return Err(SchedulerError::no_eligible_nodes(
                    context.pod_key(),
                    stage.name(),
                    considered,
                ));
            }
        }

        Ok(survivors)
    }
}
