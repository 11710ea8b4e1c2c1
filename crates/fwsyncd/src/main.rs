// # fwsyncd - Firewall Sync Daemon
//
// This is a THIN integration layer. Reconciliation logic lives in fwsync-core;
// API access lives in the client crates.
//
// The fwsyncd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering the built-in registry and firewall clients
// 4. Running the sync worker once or on an interval
//
// ## Configuration
//
// ### Registry
// - `FWSYNC_REGISTRY_URL`: Base URL of the ROR API used to select integrators (required)
// - `FWSYNC_REGISTRY_TOKEN`: ROR API key (required)
// - `FWSYNC_REGISTRY_CLIENT`: Registry client type (default: ror)
//
// ### Firewalls
// - `FWSYNC_FIREWALL_CLIENT`: Firewall client type (default: fortigate)
// - `FWSYNC_FIREWALL_VERIFY_TLS`: Verify appliance certificates (default: true)
//
// ### Sync
// - `FWSYNC_PRIORITY`: Priority class to process: low, medium, high (default: low)
// - `FWSYNC_TEST_INTEGRATOR_ID`: Process only this integrator (optional)
// - `FWSYNC_EXCLUDED_ENVIRONMENTS`: Comma-separated environment tags to skip (default: prod,mgmt)
// - `FWSYNC_REQUEST_TIMEOUT_SECS`: Deadline per outbound call (default: 30)
//
// ### Scheduling
// - `FWSYNC_MODE`: one_shot or continuous (default: one_shot)
// - `FWSYNC_INTERVAL_SECS`: Interval between continuous runs (default: 300)
//
// ### Logging
// - `FWSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export FWSYNC_REGISTRY_URL=https://ror.example.net
// export FWSYNC_REGISTRY_TOKEN=your_key
// export FWSYNC_PRIORITY=high
// export FWSYNC_MODE=continuous
//
// fwsyncd
// ```

use anyhow::{Context, Result};
use fwsync_core::model::{Priority, RegistryEndpoint};
use fwsync_core::{
    ClientRegistry, ScheduleMode, Scheduler, SchedulerConfig, SyncConfig, SyncEvent, SyncWorker,
    WorkOutcome,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time allowed for the audit log to drain after the worker is gone
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit codes for different termination scenarios
///
/// - 0: Run completed (one-shot) or clean shutdown (continuous)
/// - 1: Configuration or startup error
/// - 2: Runtime error
/// - 3: Another run was already in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonExitCode {
    Completed = 0,
    ConfigError = 1,
    RuntimeError = 2,
    AlreadyRunning = 3,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl From<&WorkOutcome> for DaemonExitCode {
    fn from(outcome: &WorkOutcome) -> Self {
        match outcome {
            WorkOutcome::Completed(_) => DaemonExitCode::Completed,
            WorkOutcome::AlreadyRunning => DaemonExitCode::AlreadyRunning,
        }
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    registry_url: String,
    registry_token: String,
    registry_client: String,
    firewall_client: String,
    firewall_verify_tls: bool,
    priority: Priority,
    test_integrator_id: Option<String>,
    excluded_environments: Option<Vec<String>>,
    request_timeout_secs: u64,
    mode: ScheduleMode,
    interval_secs: u64,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            registry_url: var("FWSYNC_REGISTRY_URL")
                .context("FWSYNC_REGISTRY_URL is required")?,
            registry_token: var("FWSYNC_REGISTRY_TOKEN")
                .context("FWSYNC_REGISTRY_TOKEN is required")?,
            registry_client: var("FWSYNC_REGISTRY_CLIENT").unwrap_or_else(|| "ror".to_string()),
            firewall_client: var("FWSYNC_FIREWALL_CLIENT")
                .unwrap_or_else(|| "fortigate".to_string()),
            firewall_verify_tls: parse_var(&var, "FWSYNC_FIREWALL_VERIFY_TLS", parse_bool)?
                .unwrap_or(true),
            priority: parse_var(&var, "FWSYNC_PRIORITY", Priority::from_str)?.unwrap_or_default(),
            test_integrator_id: var("FWSYNC_TEST_INTEGRATOR_ID"),
            excluded_environments: var("FWSYNC_EXCLUDED_ENVIRONMENTS").map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            request_timeout_secs: parse_var(&var, "FWSYNC_REQUEST_TIMEOUT_SECS", u64::from_str)?
                .unwrap_or(30),
            mode: parse_var(&var, "FWSYNC_MODE", ScheduleMode::from_str)?.unwrap_or_default(),
            interval_secs: parse_var(&var, "FWSYNC_INTERVAL_SECS", u64::from_str)?.unwrap_or(300),
            log_level: var("FWSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !self.registry_url.starts_with("https://") && !self.registry_url.starts_with("http://") {
            anyhow::bail!(
                "FWSYNC_REGISTRY_URL must use HTTP or HTTPS scheme. Got: {}",
                self.registry_url
            );
        }

        if !(1..=600).contains(&self.request_timeout_secs) {
            anyhow::bail!(
                "FWSYNC_REQUEST_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                self.request_timeout_secs
            );
        }

        if self.mode == ScheduleMode::Continuous && !(10..=86_400).contains(&self.interval_secs) {
            anyhow::bail!(
                "FWSYNC_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                self.interval_secs
            );
        }

        if log_level(&self.log_level).is_none() {
            anyhow::bail!(
                "FWSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }

        Ok(())
    }

    fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(RegistryEndpoint {
            url: self.registry_url.clone(),
            credential: self.registry_token.clone(),
        })
        .with_request_timeout(self.request_timeout_secs);

        if let Some(id) = &self.test_integrator_id {
            config = config.with_test_integrator(id.clone());
        }
        if let Some(excluded) = &self.excluded_environments {
            config.excluded_environments = excluded.clone();
        }
        config
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            mode: self.mode,
            priority: self.priority,
            interval_secs: self.interval_secs,
            ..SchedulerConfig::default()
        }
    }
}

/// Parse an optional variable, naming it in the error
fn parse_var<T, E: std::fmt::Display>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> std::result::Result<T, E>,
) -> Result<Option<T>> {
    var(key)
        .map(|raw| parse(&raw).map_err(|e| anyhow::anyhow!("{} is invalid ('{}'): {}", key, raw, e)))
        .transpose()
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}

fn log_level(raw: &str) -> Option<Level> {
    match raw.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DaemonExitCode::ConfigError.into();
    }

    // Initialize tracing
    let level = log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!(
        mode = ?config.mode,
        priority = %config.priority,
        registry = %config.registry_url,
        "Starting fwsyncd"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Build the client registry with every compiled-in client
fn client_registry(config: &Config) -> ClientRegistry {
    let registry = ClientRegistry::new();

    #[cfg(feature = "ror")]
    {
        info!("Registering ROR registry client");
        fwsync_registry_ror::register(&registry);
    }

    #[cfg(feature = "fortigate")]
    {
        info!(verify_tls = config.firewall_verify_tls, "Registering FortiGate firewall client");
        fwsync_firewall_fortigate::register_with_options(
            &registry,
            fwsync_firewall_fortigate::FortigateOptions {
                verify_tls: config.firewall_verify_tls,
                timeout: Duration::from_secs(config.request_timeout_secs),
            },
        );
    }

    #[cfg(not(feature = "fortigate"))]
    let _ = config;

    registry
}

/// Run the daemon and map the result to an exit code
async fn run_daemon(config: Config) -> DaemonExitCode {
    let registry = client_registry(&config);

    let factories = registry
        .registry_client_factory(&config.registry_client)
        .and_then(|r| Ok((r, registry.firewall_client_factory(&config.firewall_client)?)));
    let (registry_factory, firewall_factory) = match factories {
        Ok(pair) => pair,
        Err(e) => {
            error!(
                available_registry_clients = ?registry.list_registry_clients(),
                available_firewall_clients = ?registry.list_firewall_clients(),
                "{}",
                e
            );
            return DaemonExitCode::ConfigError;
        }
    };

    let (worker, events) = match SyncWorker::new(registry_factory, firewall_factory, config.sync_config()) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to create sync worker: {}", e);
            return DaemonExitCode::ConfigError;
        }
    };
    let worker = Arc::new(worker);
    let audit = tokio::spawn(drain_events(events));

    let scheduler = match Scheduler::new(Arc::clone(&worker), config.scheduler_config()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Invalid scheduler configuration: {}", e);
            return DaemonExitCode::ConfigError;
        }
    };

    let code = match config.mode {
        ScheduleMode::OneShot => match scheduler.run_once().await {
            Ok(outcome) => DaemonExitCode::from(&outcome),
            Err(e) => {
                error!("Daemon error: {}", e);
                DaemonExitCode::RuntimeError
            }
        },
        ScheduleMode::Continuous => {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let signals = tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(signal) => info!("Received shutdown signal: {}", signal),
                    Err(e) => error!("Signal handling failed, shutting down: {}", e),
                }
                let _ = shutdown_tx.send(());
            });

            let result = scheduler.run_continuous_with_shutdown(shutdown_rx).await;
            signals.abort();
            match result {
                Ok(()) => DaemonExitCode::Completed,
                Err(e) => {
                    error!("Daemon error: {}", e);
                    DaemonExitCode::RuntimeError
                }
            }
        }
    };

    if let Err(e) = worker.shutdown().await {
        warn!("Failed to release registry client: {}", e);
    }

    // Dropping the last worker reference closes the audit channel
    drop(scheduler);
    drop(worker);
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, audit).await.is_err() {
        warn!("Audit log did not drain within {:?}", EVENT_DRAIN_TIMEOUT);
    }

    info!(exit_code = code as u8, "fwsyncd stopped");
    code
}

/// Write every audit event as one structured log line
async fn drain_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "fwsync::audit", "{}", json),
            Err(e) => warn!("Failed to serialize audit event {:?}: {}", event, e),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
