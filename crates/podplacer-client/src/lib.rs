// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod credentials;
pub mod error;
pub mod mock;
pub mod traits;
pub mod watch;

// Re-export primary types
pub use api_client::ApiClient;
pub use credentials::{Credentials, IN_CLUSTER_SERVICE_ACCOUNT_DIR};
pub use error::{ClientError, Result};
pub use mock::{BindingRecord, MockCluster};
pub use traits::{ClusterApi, PodEventStream};
