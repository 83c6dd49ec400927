use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label keys that mark a node as part of the control plane
pub const CONTROL_PLANE_ROLE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Scheduler name pods get when they do not request one
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

/// Effect of a node taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

impl FromStr for TaintEffect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NoSchedule" => Ok(TaintEffect::NoSchedule),
            "PreferNoSchedule" => Ok(TaintEffect::PreferNoSchedule),
            "NoExecute" => Ok(TaintEffect::NoExecute),
            other => Err(format!("unknown taint effect '{}'", other)),
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node-side marker that repels pods unless tolerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: Option<&str>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.map(str::to_string),
            effect,
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}:{}", self.key, v, self.effect),
            None => write!(f, "{}:{}", self.key, self.effect),
        }
    }
}

/// How a toleration compares against a taint value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

impl FromStr for TolerationOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Exists" => Ok(TolerationOperator::Exists),
            "Equal" => Ok(TolerationOperator::Equal),
            other => Err(format!("unknown toleration operator '{}'", other)),
        }
    }
}

/// A pod-side declaration permitting placement onto tainted nodes
///
/// `effect: None` matches any taint effect. `value` only matters for
/// [`TolerationOperator::Equal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    pub value: Option<String>,
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn equal(key: impl Into<String>, value: impl Into<String>, effect: Option<TaintEffect>) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Equal,
            value: Some(value.into()),
            effect,
        }
    }

    pub fn exists(key: impl Into<String>, effect: Option<TaintEffect>) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Exists,
            value: None,
            effect,
        }
    }
}

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Identity of a pod: namespace and name together are unique
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Scheduling view of a node, immutable for one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub ready: bool,
    pub control_plane: bool,
}

impl NodeInfo {
    /// A ready worker node with no labels or taints
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            ready: true,
            control_plane: false,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn with_control_plane(mut self, control_plane: bool) -> Self {
        self.control_plane = control_plane;
        self
    }
}

impl TryFrom<&Node> for NodeInfo {
    type Error = CoreError;

    fn try_from(node: &Node) -> Result<Self> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| CoreError::missing_field("Node", "metadata.name"))?;

        let labels = node.metadata.labels.clone().unwrap_or_default();

        let taints = node
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .map(|taints| {
                taints
                    .iter()
                    .map(|t| {
                        let effect = t.effect.parse::<TaintEffect>().map_err(|reason| {
                            CoreError::invalid_resource(
                                "Node",
                                &name,
                                reason,
                                "Taint effect must be NoSchedule, PreferNoSchedule or NoExecute",
                            )
                        })?;
                        Ok(Taint {
                            key: t.key.clone(),
                            value: non_empty(t.value.as_deref()),
                            effect,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .is_some_and(|c| c.status == "True");

        let control_plane = CONTROL_PLANE_ROLE_LABELS
            .iter()
            .any(|role| labels.contains_key(*role));

        Ok(Self {
            name,
            labels,
            taints,
            ready,
            control_plane,
        })
    }
}

/// Scheduling view of a pod, observed only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub scheduler_name: String,
    pub node_name: Option<String>,
    pub phase: PodPhase,
}

impl PodInfo {
    /// A pending, unassigned pod requesting `scheduler_name`
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        scheduler_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            tolerations: Vec::new(),
            scheduler_name: scheduler_name.into(),
            node_name: None,
            phase: PodPhase::Pending,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_toleration(mut self, toleration: Toleration) -> Self {
        self.tolerations.push(toleration);
        self
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn pod_ref(&self) -> PodRef {
        PodRef::new(&self.namespace, &self.name)
    }

    /// Whether the scheduler named `scheduler_name` should place this pod
    pub fn awaits_scheduler(&self, scheduler_name: &str) -> bool {
        self.scheduler_name == scheduler_name
            && self.node_name.is_none()
            && self.phase == PodPhase::Pending
    }

    /// Whether this pod is assigned to `node_name`
    pub fn is_on(&self, node_name: &str) -> bool {
        self.node_name.as_deref() == Some(node_name)
    }
}

impl TryFrom<&Pod> for PodInfo {
    type Error = CoreError;

    fn try_from(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| CoreError::missing_field("Pod", "metadata.name"))?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        let spec = pod.spec.as_ref();

        let tolerations = spec
            .and_then(|s| s.tolerations.as_ref())
            .map(|tolerations| {
                tolerations
                    .iter()
                    .map(|t| {
                        let operator = match t.operator.as_deref() {
                            None | Some("") => TolerationOperator::Equal,
                            Some(op) => op.parse().map_err(|reason| {
                                CoreError::invalid_resource(
                                    "Pod",
                                    &name,
                                    reason,
                                    "Toleration operator must be Exists or Equal",
                                )
                            })?,
                        };
                        let effect = match t.effect.as_deref() {
                            None | Some("") => None,
                            Some(effect) => Some(effect.parse().map_err(|reason| {
                                CoreError::invalid_resource(
                                    "Pod",
                                    &name,
                                    reason,
                                    "Toleration effect must be NoSchedule, PreferNoSchedule or NoExecute",
                                )
                            })?),
                        };
                        Ok(Toleration {
                            key: t.key.clone().unwrap_or_default(),
                            operator,
                            value: non_empty(t.value.as_deref()),
                            effect,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let scheduler_name = spec
            .and_then(|s| s.scheduler_name.clone())
            .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string());
        let node_name = spec.and_then(|s| non_empty(s.node_name.as_deref()));
        let phase = PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()));

        Ok(Self {
            name,
            namespace,
            labels,
            tolerations,
            scheduler_name,
            node_name,
            phase,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
