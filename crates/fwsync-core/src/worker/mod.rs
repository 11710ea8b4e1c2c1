//! Sync worker
//!
//! The SyncWorker is responsible for:
//! - Admitting at most one run at a time (single-flight)
//! - Selecting integrators for a priority class
//! - Fetching desired state from each integrator's registry
//! - Fanning out address reconciliation across each firewall's vdoms
//! - Opening and closing every client handle a run uses
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  work(prio) ──▶ │  SyncWorker  │── select ──▶ IntegratorSelector
//!                 └──────────────┘
//!                        │ per integrator (sequential)
//!                        ▼
//!            RegistryClient::control_plane_metadata
//!                        │ filter + map to DesiredAddress
//!                        ▼ per firewall (sequential)
//!            ┌───────────┼───────────┐
//!            ▼           ▼           ▼   per vdom (concurrent)
//!      AddressReconciler (IPv4, then IPv6)
//! ```
//!
//! ## Failure Policy
//!
//! - Metadata fetch fails → warn, skip the integrator, continue with the next
//! - Firewall endpoint without vdoms → warn, skip the endpoint
//! - Firewall client cannot be opened → warn, skip the endpoint
//! - Integrator selection fails, or a fan-out task dies → the run fails and
//!   the error is returned from [`SyncWorker::work`]
//!
//! In every case the worker returns to idle and all per-run handles are closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::deadline::bounded;
use crate::error::{Error, Result};
use crate::events::{EventSink, SyncEvent};
use crate::model::{
    AddressFamily, ClusterControlPlaneRecord, DesiredAddress, FirewallEndpoint, Integrator,
    Priority,
};
use crate::reconciler::{AddressReconciler, ReconcileReport};
use crate::selector::IntegratorSelector;
use crate::traits::{
    FirewallClient, FirewallClientFactory, RegistryClient, RegistryClientFactory,
};

/// Exit code of a run that completed
pub const EXIT_COMPLETED: u8 = 0;

/// Exit code of a run rejected because another one was in progress
pub const EXIT_ALREADY_RUNNING: u8 = 3;

/// Result of a call to [`SyncWorker::work`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The run went through every selected integrator
    Completed(RunSummary),
    /// Another run was in progress; nothing was done
    AlreadyRunning,
}

impl WorkOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            WorkOutcome::Completed(_) => EXIT_COMPLETED,
            WorkOutcome::AlreadyRunning => EXIT_ALREADY_RUNNING,
        }
    }
}

/// What a completed run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Value of the run counter for this run
    pub run: u64,
    pub priority: Priority,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Integrators selected for the run
    pub integrators: usize,
    /// One report per (firewall, vdom, family) pass
    pub reports: Vec<ReconcileReport>,
}

impl RunSummary {
    /// Mutation calls issued across the whole run
    pub fn mutations(&self) -> usize {
        self.reports.iter().map(ReconcileReport::mutations).sum()
    }
}

/// Derive the desired address set of an integrator from registry records
///
/// Keeps records in `datacenter` that carry an IPv4 endpoint and none of the
/// `excluded` environment tags.
pub fn desired_addresses(
    records: &[ClusterControlPlaneRecord],
    datacenter: &str,
    excluded: &[String],
    color: u32,
) -> Vec<DesiredAddress> {
    records
        .iter()
        .filter(|record| record.is_eligible(datacenter, excluded))
        .filter_map(|record| DesiredAddress::from_record(record, color))
        .collect()
}

/// Resets the running flag when a run ends, however it ends
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Client handles owned by the run in progress
#[derive(Default)]
struct RunHandles {
    registry: Option<Arc<dyn RegistryClient>>,
    firewall: Option<Arc<dyn FirewallClient>>,
}

impl RunHandles {
    async fn release_registry(&mut self) {
        if let Some(client) = self.registry.take()
            && let Err(e) = client.close().await
        {
            warn!("Failed to close registry client: {}", e);
        }
    }

    async fn release_firewall(&mut self) {
        if let Some(client) = self.firewall.take()
            && let Err(e) = client.close().await
        {
            warn!(firewall = %client.hostname(), "Failed to close firewall client: {}", e);
        }
    }

    async fn release_all(&mut self) {
        self.release_firewall().await;
        self.release_registry().await;
    }
}

/// Reconciliation orchestrator
///
/// ## Lifecycle
///
/// 1. Create with [`SyncWorker::new()`]
/// 2. Call [`SyncWorker::work()`] once per cycle (usually via the scheduler)
/// 3. Call [`SyncWorker::shutdown()`] to release the selection registry handle
pub struct SyncWorker {
    registry_factory: Arc<dyn RegistryClientFactory>,
    firewall_factory: Arc<dyn FirewallClientFactory>,
    config: SyncConfig,
    selector: IntegratorSelector,
    reconciler: Arc<AddressReconciler>,

    /// Registry handle used for integrator selection, opened on first use
    /// and kept across runs
    selection_registry: Mutex<Option<Arc<dyn RegistryClient>>>,

    running: AtomicBool,
    runs: AtomicU64,
    events: EventSink,
}

impl SyncWorker {
    /// Create a new worker
    ///
    /// # Returns
    ///
    /// A tuple of (worker, event_receiver) where event_receiver yields audit events
    pub fn new(
        registry_factory: Arc<dyn RegistryClientFactory>,
        firewall_factory: Arc<dyn FirewallClientFactory>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.event_channel_capacity);
        let timeout = config.request_timeout();

        let worker = Self {
            registry_factory,
            firewall_factory,
            selector: IntegratorSelector::new(config.test_integrator_id.clone(), timeout),
            reconciler: Arc::new(AddressReconciler::new(
                config.source_name.clone(),
                config.group_color,
                timeout,
                events.clone(),
            )),
            config,
            selection_registry: Mutex::new(None),
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            events,
        };

        Ok((worker, rx))
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of runs that have finished, successfully or not
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Run one reconciliation cycle
    ///
    /// Returns [`WorkOutcome::AlreadyRunning`] immediately, without touching
    /// any client, when another run is in progress.
    ///
    /// # Errors
    ///
    /// Failures not absorbed by the per-integrator or per-firewall policy
    /// (see module docs). The worker is idle again when this returns.
    pub async fn work(&self, priority: Priority) -> Result<WorkOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(priority = %priority, "Sync already running, rejecting run");
            return Ok(WorkOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard { flag: &self.running };

        let run = self.runs() + 1;
        let started_at = Utc::now();
        info!(run, priority = %priority, "Sync run started");
        self.events.emit(SyncEvent::RunStarted { run, priority });

        let mut handles = RunHandles::default();
        let result = self.run_integrators(priority, &mut handles).await;
        handles.release_all().await;
        self.runs.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok((integrators, reports)) => {
                let summary = RunSummary {
                    run,
                    priority,
                    started_at,
                    finished_at: Utc::now(),
                    integrators,
                    reports,
                };
                info!(
                    run,
                    integrators,
                    mutations = summary.mutations(),
                    elapsed_ms = (summary.finished_at - started_at).num_milliseconds(),
                    "Sync run finished"
                );
                self.events.emit(SyncEvent::RunFinished {
                    run,
                    integrators,
                    succeeded: true,
                });
                Ok(WorkOutcome::Completed(summary))
            }
            Err(e) => {
                error!(run, "Sync run failed: {}", e);
                self.events.emit(SyncEvent::RunFinished {
                    run,
                    integrators: 0,
                    succeeded: false,
                });
                Err(e)
            }
        }
    }

    /// Close the selection registry handle, if one was opened
    pub async fn shutdown(&self) -> Result<()> {
        let client = self.selection_registry.lock().await.take();
        if let Some(client) = client {
            client.close().await?;
            debug!("Selection registry client closed");
        }
        Ok(())
    }

    async fn selection_registry(&self) -> Result<Arc<dyn RegistryClient>> {
        let mut slot = self.selection_registry.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client: Arc<dyn RegistryClient> =
            Arc::from(self.registry_factory.create(&self.config.registry)?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn run_integrators(
        &self,
        priority: Priority,
        handles: &mut RunHandles,
    ) -> Result<(usize, Vec<ReconcileReport>)> {
        let registry = self.selection_registry().await?;
        let integrators = self.selector.select(registry.as_ref(), priority).await?;
        let mut reports = Vec::new();

        for integrator in &integrators {
            info!(integrator = %integrator.name, datacenter = %integrator.datacenter, "Processing integrator");
            self.events.emit(SyncEvent::IntegratorStarted {
                integrator: integrator.name.clone(),
            });

            let Some(records) = self.fetch_metadata(integrator, handles).await else {
                continue;
            };

            let desired = desired_addresses(
                &records,
                &integrator.datacenter,
                &self.config.excluded_environments,
                self.config.address_color,
            );
            debug!(
                integrator = %integrator.name,
                records = records.len(),
                desired = desired.len(),
                "Desired addresses derived"
            );
            let desired: Arc<[DesiredAddress]> = desired.into();

            for endpoint in &integrator.firewalls {
                if !endpoint.enabled {
                    debug!(firewall = %endpoint.name, "Firewall is disabled, skipping");
                    continue;
                }
                if endpoint.vdoms.is_empty() {
                    warn!(
                        integrator = %integrator.name,
                        firewall = %endpoint.name,
                        "Firewall has no virtual domains configured, skipping"
                    );
                    continue;
                }

                handles.release_firewall().await;
                let Some(firewall) = self.open_firewall(endpoint) else {
                    continue;
                };
                handles.firewall = Some(Arc::clone(&firewall));

                let firewall_reports = self
                    .reconcile_firewall(firewall, endpoint, integrator, Arc::clone(&desired))
                    .await?;
                reports.extend(firewall_reports);
            }
        }

        Ok((integrators.len(), reports))
    }

    /// Open a fresh registry handle for the integrator and read its metadata
    ///
    /// `None` means the integrator should be skipped this run.
    async fn fetch_metadata(
        &self,
        integrator: &Integrator,
        handles: &mut RunHandles,
    ) -> Option<Vec<ClusterControlPlaneRecord>> {
        handles.release_registry().await;

        let result = match self.registry_factory.create(&integrator.registry) {
            Ok(client) => {
                let client: Arc<dyn RegistryClient> = Arc::from(client);
                handles.registry = Some(Arc::clone(&client));
                bounded(
                    "get control-plane metadata",
                    self.config.request_timeout(),
                    client.control_plane_metadata(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(
                    integrator = %integrator.name,
                    transient = e.is_transient(),
                    "Control-plane metadata unavailable, skipping integrator: {}",
                    e
                );
                self.events.emit(SyncEvent::MetadataUnavailable {
                    integrator: integrator.name.clone(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn open_firewall(&self, endpoint: &FirewallEndpoint) -> Option<Arc<dyn FirewallClient>> {
        match self.firewall_factory.create(endpoint) {
            Ok(client) => Some(Arc::from(client)),
            Err(e) => {
                warn!(firewall = %endpoint.name, "Could not open firewall client, skipping: {}", e);
                None
            }
        }
    }

    /// Reconcile every vdom of one firewall concurrently and wait for all of them
    async fn reconcile_firewall(
        &self,
        firewall: Arc<dyn FirewallClient>,
        endpoint: &FirewallEndpoint,
        integrator: &Integrator,
        desired: Arc<[DesiredAddress]>,
    ) -> Result<Vec<ReconcileReport>> {
        let mut tasks = JoinSet::new();

        for vdom in &endpoint.vdoms {
            let reconciler = Arc::clone(&self.reconciler);
            let firewall = Arc::clone(&firewall);
            let desired = Arc::clone(&desired);
            let vdom = vdom.clone();
            let suffix = integrator.group_suffix.clone();

            tasks.spawn(async move {
                let v4 = reconciler
                    .reconcile(Arc::clone(&firewall), &vdom, &suffix, &desired, AddressFamily::V4)
                    .await;
                let v6 = reconciler
                    .reconcile(firewall, &vdom, &suffix, &[], AddressFamily::V6)
                    .await;
                [v4, v6]
            });
        }

        let mut reports = Vec::with_capacity(endpoint.vdoms.len() * 2);
        while let Some(joined) = tasks.join_next().await {
            let pair = joined.map_err(|e| {
                Error::Other(format!(
                    "vdom reconciliation task for firewall {} failed: {}",
                    endpoint.name, e
                ))
            })?;
            reports.extend(pair);
        }
        Ok(reports)
    }
}
