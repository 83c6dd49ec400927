//! Binding a pod to its chosen node, with bounded exponential backoff.

use crate::{Result, SchedulerError};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use podplacer_client::{ClientError, ClusterApi};
use podplacer_core::PodRef;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Waits between retry attempts
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Delay backed by the tokio timer
pub fn tokio_delay() -> DelayFn {
    Arc::new(|d| tokio::time::sleep(d).boxed())
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one
    pub max_attempts: u32,
    /// Wait after the first failure
    pub base_delay: Duration,
    /// Growth of the wait after each further failure
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            factor,
        }
    }

    /// Attempts actually made
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait after failed attempt `attempt` (1-based): base * factor^(attempt-1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.factor.powi(exponent))
    }

    /// Every wait a fully failing run goes through, in order
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|a| self.delay_after(a)).collect()
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed transiently
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that retrying can't fix
    Aborted { attempt: u32, error: E },
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts
///
/// `op` receives the 1-based attempt number. `delay` is awaited between
/// attempts and never after the last one.
pub async fn retry_with_backoff<T, E, Op, Fut, D, DFut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: Op,
    mut delay: D,
) -> std::result::Result<T, RetryError<E>>
where
    E: fmt::Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    D: FnMut(Duration) -> DFut,
    DFut: Future<Output = ()>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_transient(&error) {
            return Err(RetryError::Aborted { attempt, error });
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let wait = policy.delay_after(attempt);
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt, attempts, error, wait
        );
        delay(wait).await;
        attempt += 1;
    }
}

/// Commits scheduling decisions to the control plane
pub struct Binder {
    api: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    delay: DelayFn,
}

impl Binder {
    pub fn new(api: Arc<dyn ClusterApi>, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            delay: tokio_delay(),
        }
    }

    /// Replace the wait between attempts
    pub fn with_delay(mut self, delay: DelayFn) -> Self {
        self.delay = delay;
        self
    }

    /// Bind `pod` to `node_name`
    pub async fn bind(&self, pod: &PodRef, node_name: &str) -> Result<()> {
        if pod.name.is_empty() {
            return Err(SchedulerError::invalid_bind_target(
                pod.to_string(),
                "pod has no name",
            ));
        }
        if node_name.is_empty() {
            return Err(SchedulerError::invalid_bind_target(
                pod.to_string(),
                "no node was chosen",
            ));
        }

        let result = retry_with_backoff(
            &self.policy,
            |e: &SchedulerError| matches!(e, SchedulerError::BindTransientFailure { .. }),
            |attempt| async move {
                debug!("Binding pod {} to node {} (attempt {})", pod, node_name, attempt);
                self.api
                    .create_binding(&pod.namespace, &pod.name, node_name)
                    .await
                    .map_err(|e| classify(pod, node_name, e))
            },
            |wait| (self.delay)(wait),
        )
        .await;

        match result {
            Ok(()) => {
                info!("Bound pod {} to node {}", pod, node_name);
                Ok(())
            }
            Err(RetryError::Aborted { error, .. }) => Err(error),
            Err(RetryError::Exhausted { attempts, last }) => {
                let last_error = match last {
                    SchedulerError::BindTransientFailure { message, .. } => message,
                    other => other.to_string(),
                };
                Err(SchedulerError::BindFailedPermanently {
                    pod: pod.to_string(),
                    node: node_name.to_string(),
                    attempts,
                    last_error,
                })
            }
        }
    }
}

fn classify(pod: &PodRef, node_name: &str, e: ClientError) -> SchedulerError {
    if e.is_transient() {
        SchedulerError::BindTransientFailure {
            pod: pod.to_string(),
            node: node_name.to_string(),
            message: e.to_string(),
        }
    } else {
        SchedulerError::BindRejected {
            pod: pod.to_string(),
            node: node_name.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podplacer_client::MockCluster;
    use podplacer_core::PodInfo;
    use std::sync::Mutex;

    /// Delay that records each wait instead of sleeping
    fn recording_delay() -> (DelayFn, Arc<Mutex<Vec<Duration>>>) {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = waits.clone();
        let delay: DelayFn = Arc::new(move |d| {
            recorded.lock().unwrap().push(d);
            futures_util::future::ready(()).boxed()
        });
        (delay, waits)
    }

    async fn cluster_with_pod() -> MockCluster {
        let cluster = MockCluster::new();
        cluster
            .add_pod(PodInfo::new("apps", "web-0", "podplacer"))
            .await;
        cluster
    }

    fn unavailable() -> ClientError {
        ClientError::unexpected_status("POST", "/binding", 503, "unavailable")
    }

    #[test]
    fn test_policy_delays_grow_geometrically() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 3.0);
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(900),
                Duration::from_millis(2700),
            ]
        );
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), 2.0);
        assert_eq!(policy.attempts(), 1);
        assert!(policy.delays().is_empty());
    }

    #[tokio::test]
    async fn test_retry_stops_on_first_success() {
        let (delay, waits) = recording_delay();
        let mut calls = 0;

        let result: std::result::Result<u32, RetryError<String>> = retry_with_backoff(
            &RetryPolicy::default(),
            |_| true,
            |attempt| {
                calls += 1;
                async move {
                    if attempt < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |d| delay(d),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_retry_aborts_on_permanent_error() {
        let (delay, waits) = recording_delay();

        let result: std::result::Result<(), RetryError<String>> = retry_with_backoff(
            &RetryPolicy::default(),
            |e: &String| e != "fatal",
            |_| async { Err("fatal".to_string()) },
            |d| delay(d),
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempt: 1, .. })));
        assert!(waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bind_succeeds_after_transient_failure() {
        let cluster = cluster_with_pod().await;
        cluster.fail_next_binding(unavailable()).await;
        let (delay, waits) = recording_delay();

        let binder = Binder::new(Arc::new(cluster.clone()), RetryPolicy::default()).with_delay(delay);
        binder
            .bind(&PodRef::new("apps", "web-0"), "worker-1")
            .await
            .unwrap();

        assert_eq!(cluster.bind_attempts(), 2);
        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(1)]);
        assert!(cluster.pod("apps", "web-0").await.unwrap().is_on("worker-1"));
    }

    #[tokio::test]
    async fn test_bind_gives_up_after_max_attempts() {
        let cluster = cluster_with_pod().await;
        for _ in 0..3 {
            cluster.fail_next_binding(unavailable()).await;
        }
        let (delay, waits) = recording_delay();

        let binder = Binder::new(Arc::new(cluster.clone()), RetryPolicy::default()).with_delay(delay);
        let err = binder
            .bind(&PodRef::new("apps", "web-0"), "worker-1")
            .await
            .unwrap_err();

        match err {
            SchedulerError::BindFailedPermanently {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(cluster.bind_attempts(), 3);
        assert_eq!(
            *waits.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let cluster = MockCluster::new();
        cluster
            .add_pod(PodInfo::new("apps", "web-0", "podplacer").with_node("worker-2"))
            .await;
        let (delay, waits) = recording_delay();

        let binder = Binder::new(Arc::new(cluster.clone()), RetryPolicy::default()).with_delay(delay);
        let err = binder
            .bind(&PodRef::new("apps", "web-0"), "worker-1")
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::BindRejected { .. }));
        assert_eq!(cluster.bind_attempts(), 1);
        assert!(waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_is_rejected_before_any_call() {
        let cluster = cluster_with_pod().await;
        let binder = Binder::new(Arc::new(cluster.clone()), RetryPolicy::default());

        let err = binder
            .bind(&PodRef::new("apps", "web-0"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidBindTarget { .. }));

        let err = binder
            .bind(&PodRef::new("apps", ""), "worker-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidBindTarget { .. }));
        assert_eq!(cluster.bind_attempts(), 0);
    }
}
