use clap::{Parser, ValueEnum};
use podplacer_client::{ApiClient, ClientError, ClusterApi, Credentials};
use podplacer_scheduler::{
    parse_label, DispatcherConfig, Dispatcher, RetryPolicy, Scheduler, SchedulerConfig,
    SchedulerError, SchedulingPolicy, PODPLACER_SCHEDULER_NAME,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "podplacer", about = "Custom Kubernetes pod scheduler")]
struct Cli {
    /// Scheduler name that pods select via spec.schedulerName
    #[arg(long, env = "PODPLACER_SCHEDULER_NAME", default_value = PODPLACER_SCHEDULER_NAME)]
    scheduler_name: String,

    /// Path to a kubeconfig file (in-cluster credentials when absent)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Placement policy: weighted, round-robin or least-loaded
    #[arg(long, default_value = "weighted")]
    policy: SchedulingPolicy,

    /// Label every node must carry, as key=value (repeatable)
    #[arg(long = "required-label", value_name = "KEY=VALUE")]
    required_labels: Vec<String>,

    /// Total binding attempts per decision
    #[arg(long, default_value_t = 3)]
    bind_retries: u32,

    /// Wait after the first failed binding attempt
    #[arg(long, default_value_t = 1000)]
    backoff_base_ms: u64,

    /// Growth of the wait after each further failure
    #[arg(long, default_value_t = 2.0)]
    backoff_factor: f64,

    /// Length of one pod watch window
    #[arg(long, default_value_t = 60)]
    watch_timeout_secs: u64,

    /// Pause before resubscribing after a failed watch
    #[arg(long, default_value_t = 1000)]
    reconnect_delay_ms: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    /// Validate flags and turn them into component configuration
    fn build_config(&self) -> Result<(SchedulerConfig, DispatcherConfig), SchedulerError> {
        if self.scheduler_name.trim().is_empty() {
            return Err(SchedulerError::configuration_fatal(
                "scheduler name is empty",
                "Pass --scheduler-name or set PODPLACER_SCHEDULER_NAME",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(SchedulerError::configuration_fatal(
                format!("invalid backoff factor {}", self.backoff_factor),
                "The backoff factor must be a finite number of at least 1.0",
            ));
        }
        if self.watch_timeout_secs == 0 {
            return Err(SchedulerError::configuration_fatal(
                "watch timeout is zero",
                "Use a watch window of at least one second",
            ));
        }

        let mut required_labels = BTreeMap::new();
        for raw in &self.required_labels {
            let (key, value) = parse_label(raw)?;
            required_labels.insert(key, value);
        }

        let scheduler = SchedulerConfig {
            scheduler_name: self.scheduler_name.trim().to_string(),
            policy: self.policy,
            required_labels,
            retry: RetryPolicy::new(
                self.bind_retries,
                Duration::from_millis(self.backoff_base_ms),
                self.backoff_factor,
            ),
            ..Default::default()
        };
        let dispatcher = DispatcherConfig {
            watch_timeout: Duration::from_secs(self.watch_timeout_secs),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..Default::default()
        };

        Ok((scheduler, dispatcher))
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Credentials and client problems at startup are never retried
fn startup_error(e: ClientError) -> SchedulerError {
    match e {
        ClientError::InvalidCredentials {
            message,
            suggestion,
        } => SchedulerError::configuration_fatal(message, suggestion),
        other => SchedulerError::configuration_fatal(
            other.to_string(),
            "Check the kubeconfig or the in-cluster service account",
        ),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let (scheduler_config, dispatcher_config) = cli.build_config()?;

    let credentials = Credentials::load(cli.kubeconfig.as_deref()).map_err(startup_error)?;
    let client = ApiClient::from_credentials(&credentials).map_err(startup_error)?;

    info!(
        "Starting podplacer '{}' against {} (policy: {})",
        scheduler_config.scheduler_name,
        client.base_url(),
        scheduler_config.policy
    );

    let api: Arc<dyn ClusterApi> = Arc::new(client);
    let scheduler = Arc::new(Scheduler::new(api.clone(), scheduler_config));
    let dispatcher = Dispatcher::new(api, scheduler, dispatcher_config);

    let token = CancellationToken::new();
    let dispatcher_token = token.clone();
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(dispatcher_token).await {
            error!("Dispatcher error: {}", e);
        }
    });

    shutdown_signal().await?;

    info!("Shutting down gracefully...");
    token.cancel();

    // A bind in progress finishes first, bounded by this timeout
    let shutdown_timeout = Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, dispatcher_handle)
        .await
        .is_err()
    {
        error!("Dispatcher did not stop within {:?}", shutdown_timeout);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c or, on unix, SIGTERM
async fn shutdown_signal() -> miette::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| miette::miette!("Failed to listen for SIGTERM: {}", e))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))
            }
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["podplacer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        let (scheduler, dispatcher) = cli.build_config().unwrap();

        assert_eq!(scheduler.policy, SchedulingPolicy::Weighted);
        assert!(scheduler.required_labels.is_empty());
        assert_eq!(scheduler.retry, RetryPolicy::default());
        assert_eq!(dispatcher.watch_timeout, Duration::from_secs(60));
        assert_eq!(dispatcher.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_flags_build_config() {
        let cli = parse(&[
            "--scheduler-name",
            "batch",
            "--policy",
            "round-robin",
            "--required-label",
            "zone=east",
            "--required-label",
            "tier=web",
            "--bind-retries",
            "5",
            "--backoff-base-ms",
            "250",
            "--backoff-factor",
            "1.5",
        ]);
        let (scheduler, _) = cli.build_config().unwrap();

        assert_eq!(scheduler.scheduler_name, "batch");
        assert_eq!(scheduler.policy, SchedulingPolicy::RoundRobin);
        assert_eq!(scheduler.required_labels.get("zone").map(String::as_str), Some("east"));
        assert_eq!(scheduler.required_labels.get("tier").map(String::as_str), Some("web"));
        assert_eq!(
            scheduler.retry,
            RetryPolicy::new(5, Duration::from_millis(250), 1.5)
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["podplacer", "--policy", "random"]).is_err());
    }

    #[test]
    fn test_invalid_values_are_configuration_fatal() {
        for args in [
            vec!["--required-label", "novalue"],
            vec!["--backoff-factor", "0.5"],
            vec!["--watch-timeout-secs", "0"],
            vec!["--scheduler-name", " "],
        ] {
            let err = parse(&args).build_config().unwrap_err();
            assert!(
                matches!(err, SchedulerError::ConfigurationFatal { .. }),
                "{:?} gave {}",
                args,
                err
            );
        }
    }

    #[test]
    fn test_startup_errors_are_fatal() {
        let err = startup_error(ClientError::connection_failed("https://x", "bad CA"));
        assert!(matches!(err, SchedulerError::ConfigurationFatal { .. }));
    }
}
