//! Podplacer Core - Scheduling model for the podplacer custom scheduler
//!
//! This crate provides:
//! - Strongly typed Node, Pod, Taint and Toleration views
//! - Conversion from k8s-openapi wire types
//! - Watch event types for the pod event stream
//! - Error types with miette diagnostics

pub mod error;
pub mod events;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use events::{WatchEvent, WatchEventType};
pub use types::{
    NodeInfo, PodInfo, PodPhase, PodRef, Taint, TaintEffect, Toleration, TolerationOperator,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
