use crate::scheduler::Scheduler;
use crate::types::Decision;
use crate::{Result, SchedulerError};
use futures_util::StreamExt;
use miette::Diagnostic;
use podplacer_client::ClusterApi;
use podplacer_core::{PodInfo, WatchEvent};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the dispatcher is in its subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Connecting => "Connecting",
            DispatchState::Streaming => "Streaming",
            DispatchState::Reconnecting => "Reconnecting",
            DispatchState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Server-side window of one watch subscription
    pub watch_timeout: Duration,
    /// Pause before resubscribing after a failed subscription
    pub reconnect_delay: Duration,
    /// How long past `watch_timeout` the server may take to end a window
    /// before the subscription is dropped client-side
    pub watch_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            watch_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
            watch_grace: Duration::from_secs(5),
        }
    }
}

/// What happened to one event
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Not a pod this scheduler should place
    Ignored,
    Scheduled(Decision),
    /// The pipeline failed for this pod; the loop carries on
    Failed(SchedulerError),
}

/// Feeds pod events through the scheduler one at a time
pub struct Dispatcher {
    api: Arc<dyn ClusterApi>,
    scheduler: Arc<Scheduler>,
    config: DispatcherConfig,
    state: watch::Sender<DispatchState>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn ClusterApi>, scheduler: Arc<Scheduler>, config: DispatcherConfig) -> Self {
        let (state, _) = watch::channel(DispatchState::Connecting);
        Self {
            api,
            scheduler,
            config,
            state,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    fn transition(&self, next: DispatchState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Dispatcher {} -> {}", previous, next);
        }
    }

    /// Subscribe to pod events and schedule eligible pods until cancelled
    ///
    /// A subscription that ends normally, or outlives its window plus
    /// `watch_grace`, is renewed straight away. One that fails is renewed
    /// after `reconnect_delay`. A decision cycle in progress always runs to
    /// completion before cancellation is observed.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting dispatcher for scheduler '{}' (watch timeout: {:?})",
            self.scheduler.config().scheduler_name,
            self.config.watch_timeout
        );
        self.transition(DispatchState::Connecting);

        while !token.is_cancelled() {
            let deadline = Instant::now() + self.config.watch_timeout + self.config.watch_grace;
            let subscribed = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = timeout_at(deadline, self.api.watch_pods(self.config.watch_timeout)) => result,
            };

            let mut events = match subscribed {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    warn!("Failed to subscribe to pod events: {}", e);
                    self.transition(DispatchState::Reconnecting);
                    self.pause(&token).await;
                    continue;
                }
                Err(_) => {
                    warn!("Pod watch subscription did not complete within its window");
                    self.transition(DispatchState::Reconnecting);
                    self.pause(&token).await;
                    continue;
                }
            };
            self.transition(DispatchState::Streaming);

            let mut failed = false;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = timeout_at(deadline, events.next()) => next,
                };

                match next {
                    Ok(Some(Ok(event))) => {
                        self.dispatch_event(event).await;
                    }
                    Ok(Some(Err(e))) => {
                        warn!("Pod event stream failed: {}", e);
                        failed = true;
                        break;
                    }
                    Ok(None) => {
                        debug!("Watch window elapsed, resubscribing");
                        break;
                    }
                    Err(_) => {
                        warn!("Watch window was not closed by the server, resubscribing");
                        break;
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
            self.transition(DispatchState::Reconnecting);
            if failed {
                self.pause(&token).await;
            }
        }

        info!("Dispatcher shutting down");
        self.transition(DispatchState::Stopped);
        Ok(())
    }

    async fn pause(&self, token: &CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
        }
    }

    /// Handle one pod event
    ///
    /// Only additions and modifications of pods awaiting this scheduler
    /// reach the pipeline. Failures are logged and returned, never raised.
    pub async fn dispatch_event(&self, event: WatchEvent<PodInfo>) -> DispatchOutcome {
        if !event.is_upsert() {
            return DispatchOutcome::Ignored;
        }

        let pod = event.object;
        if !self.scheduler.is_eligible(&pod) {
            debug!("Ignoring pod {}", pod.pod_ref());
            return DispatchOutcome::Ignored;
        }

        info!("Scheduling pod {}", pod.pod_ref());
        match self.scheduler.schedule_pod(&pod).await {
            Ok(Some(decision)) => DispatchOutcome::Scheduled(decision),
            Ok(None) => DispatchOutcome::Ignored,
            Err(e) => {
                let code = e.code().map(|c| c.to_string()).unwrap_or_default();
                error!(
                    pod = %pod.pod_ref(),
                    stage = e.stage(),
                    kind = e.kind(),
                    code = %code,
                    candidates = ?e.candidates(),
                    "Failed to schedule pod {}: {}",
                    pod.pod_ref(),
                    e
                );
                DispatchOutcome::Failed(e)
            }
        }
    }
}
