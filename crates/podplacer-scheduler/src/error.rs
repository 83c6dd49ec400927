// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Cluster state could not be read
    #[error("Cluster unavailable: {message}")]
    #[diagnostic(
        code(podplacer::scheduler::cluster_unavailable),
        help("The decision cycle was aborted. The pod is retried on its next event")
    )]
    ClusterUnavailable { message: String },

    /// A filter stage left no nodes
    #[error("No eligible nodes for pod {pod} after {stage}")]
    #[diagnostic(
        code(podplacer::scheduler::no_eligible_nodes),
        help("Check node labels, taints, readiness and the pod's tolerations")
    )]
    NoEligibleNodes {
        pod: String,
        stage: String,
        considered: Vec<String>,
    },

    /// No candidate produced a usable score
    #[error("Scoring failed for pod {pod}")]
    #[diagnostic(
        code(podplacer::scheduler::scoring_failed),
        help("This is likely a bug. Please report it")
    )]
    ScoringFailed { pod: String, candidates: Vec<String> },

    /// Binding was requested without a usable target
    #[error("Invalid bind target for pod '{pod}': {reason}")]
    #[diagnostic(
        code(podplacer::scheduler::invalid_bind_target),
        help("A binding needs both a pod name and a chosen node. This is a bug in the caller")
    )]
    InvalidBindTarget { pod: String, reason: String },

    /// A binding attempt failed in a way that may succeed on retry
    #[error("Binding pod {pod} to node {node} failed: {message}")]
    #[diagnostic(
        code(podplacer::scheduler::bind_transient_failure),
        help("The binding is retried with exponential backoff")
    )]
    BindTransientFailure {
        pod: String,
        node: String,
        message: String,
    },

    /// Retries were exhausted
    #[error("Binding pod {pod} to node {node} failed after {attempts} attempts: {last_error}")]
    #[diagnostic(
        code(podplacer::scheduler::bind_failed_permanently),
        help("The pod stays Pending until its next event or operator intervention")
    )]
    BindFailedPermanently {
        pod: String,
        node: String,
        attempts: u32,
        last_error: String,
    },

    /// The control plane refused the binding
    #[error("Binding pod {pod} to node {node} was rejected: {message}")]
    #[diagnostic(
        code(podplacer::scheduler::bind_rejected),
        help("The pod may already be bound, or may have been deleted")
    )]
    BindRejected {
        pod: String,
        node: String,
        message: String,
    },

    /// Startup configuration or credentials are unusable
    #[error("Configuration error: {message}")]
    #[diagnostic(code(podplacer::scheduler::configuration_fatal), help("{suggestion}"))]
    ConfigurationFatal { message: String, suggestion: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn cluster_unavailable(message: impl Into<String>) -> Self {
        Self::ClusterUnavailable {
            message: message.into(),
        }
    }

    pub fn no_eligible_nodes(
        pod: impl Into<String>,
        stage: impl Into<String>,
        considered: Vec<String>,
    ) -> Self {
        Self::NoEligibleNodes {
            pod: pod.into(),
            stage: stage.into(),
            considered,
        }
    }

    pub fn scoring_failed(pod: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::ScoringFailed {
            pod: pod.into(),
            candidates,
        }
    }

    pub fn invalid_bind_target(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBindTarget {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration_fatal(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigurationFatal {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Pipeline stage the error came from
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ClusterUnavailable { .. } => "snapshot",
            Self::NoEligibleNodes { .. } => "filter",
            Self::ScoringFailed { .. } => "score",
            Self::InvalidBindTarget { .. }
            | Self::BindTransientFailure { .. }
            | Self::BindFailedPermanently { .. }
            | Self::BindRejected { .. } => "bind",
            Self::ConfigurationFatal { .. } => "startup",
        }
    }

    /// Short error kind for log records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClusterUnavailable { .. } => "ClusterUnavailable",
            Self::NoEligibleNodes { .. } => "NoEligibleNodes",
            Self::ScoringFailed { .. } => "ScoringFailed",
            Self::InvalidBindTarget { .. } => "InvalidBindTarget",
            Self::BindTransientFailure { .. } => "BindTransientFailure",
            Self::BindFailedPermanently { .. } => "BindFailedPermanently",
            Self::BindRejected { .. } => "BindRejected",
            Self::ConfigurationFatal { .. } => "ConfigurationFatal",
        }
    }

    /// Nodes that were under consideration when the error occurred
    pub fn candidates(&self) -> &[String] {
        match self {
            Self::NoEligibleNodes { considered, .. } => considered,
            Self::ScoringFailed { candidates, .. } => candidates,
            _ => &[],
        }
    }
}
