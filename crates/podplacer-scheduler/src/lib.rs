//! Podplacer Scheduler - Pod to Node placement for a named custom scheduler
//!
//! This crate provides:
//! - Cluster state snapshots taken fresh for every decision
//! - Filter predicates (required labels, taints/tolerations, ready workers)
//! - Scoring policies (weighted load+spread, round-robin, least loaded)
//! - Binding with bounded exponential-backoff retry
//! - The pod event dispatch loop that drives it all

pub mod binder;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod scheduler;
pub mod score;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use binder::{retry_with_backoff, tokio_delay, Binder, DelayFn, RetryError, RetryPolicy};
pub use dispatch::{DispatchOutcome, DispatchState, Dispatcher, DispatcherConfig};
pub use error::{Result, SchedulerError};
pub use scheduler::{parse_label, Scheduler, SchedulerConfig, SchedulingPolicy, PODPLACER_SCHEDULER_NAME};
pub use snapshot::ClusterSnapshot;
pub use types::{Decision, FilterResult, SchedulingContext, ScoreResult};
