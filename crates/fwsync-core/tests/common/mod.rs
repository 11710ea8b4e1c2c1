//! Test doubles and common utilities for the contract tests
//!
//! The firewall double behaves like an appliance: objects must exist before a
//! group may reference them, names are unique per vdom, and every call is
//! counted. Factories count opened and closed handles per endpoint.

#![allow(dead_code)]

use async_trait::async_trait;
use fwsync_core::error::{Error, Result};
use fwsync_core::model::{
    ClusterControlPlaneRecord, FirewallAddressGroup, FirewallAddressObject, FirewallEndpoint,
    Integrator, Priority, RegistryEndpoint,
};
use fwsync_core::traits::{
    FirewallClient, FirewallClientFactory, RegistryClient, RegistryClientFactory,
};
use fwsync_core::{SyncConfig, SyncEvent, SyncWorker};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SELECTION_REGISTRY_URL: &str = "https://ror.selection.test";

// ---------------------------------------------------------------------------
// Registry double
// ---------------------------------------------------------------------------

/// Scripted registry state shared by every handle a factory opens
#[derive(Default)]
pub struct RegistryScript {
    integrators: Mutex<Vec<Integrator>>,
    /// Metadata per registry URL; `Err` makes the fetch fail
    metadata: Mutex<HashMap<String, std::result::Result<Vec<ClusterControlPlaneRecord>, String>>>,
    /// Delay applied to every metadata fetch
    metadata_delay: Mutex<Duration>,
    fail_listing: AtomicBool,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    metadata_in_flight: AtomicUsize,
    /// Highest number of metadata fetches observed at the same time
    pub max_metadata_in_flight: AtomicUsize,
}

impl RegistryScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_integrator(&self, integrator: Integrator) {
        self.integrators.lock().unwrap().push(integrator);
    }

    pub fn set_metadata(&self, registry_url: &str, records: Vec<ClusterControlPlaneRecord>) {
        self.metadata
            .lock()
            .unwrap()
            .insert(registry_url.to_string(), Ok(records));
    }

    pub fn fail_metadata(&self, registry_url: &str, message: &str) {
        self.metadata
            .lock()
            .unwrap()
            .insert(registry_url.to_string(), Err(message.to_string()));
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        *self.metadata_delay.lock().unwrap() = delay;
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    /// Total registry calls of any kind
    pub fn total_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.get_calls.load(Ordering::SeqCst)
            + self.metadata_calls.load(Ordering::SeqCst)
    }
}

/// Per-endpoint open/close bookkeeping
#[derive(Default)]
pub struct HandleLedger {
    counts: Mutex<HashMap<String, (usize, usize)>>,
}

impl HandleLedger {
    fn opened(&self, key: &str) {
        self.counts.lock().unwrap().entry(key.to_string()).or_default().0 += 1;
    }

    fn closed(&self, key: &str) {
        self.counts.lock().unwrap().entry(key.to_string()).or_default().1 += 1;
    }

    pub fn opens(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).map(|c| c.0).unwrap_or(0)
    }

    pub fn closes(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).map(|c| c.1).unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.counts.lock().unwrap().values().map(|c| c.0).sum()
    }

    /// Keys whose handles were not all closed, ignoring `except`
    pub fn leaked(&self, except: &[&str]) -> Vec<String> {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, (opens, closes))| opens != closes && !except.contains(&key.as_str()))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

pub struct SpyRegistryFactory {
    pub script: Arc<RegistryScript>,
    pub ledger: Arc<HandleLedger>,
}

impl SpyRegistryFactory {
    pub fn new(script: Arc<RegistryScript>) -> Arc<Self> {
        Arc::new(Self {
            script,
            ledger: Arc::new(HandleLedger::default()),
        })
    }
}

impl RegistryClientFactory for SpyRegistryFactory {
    fn create(&self, endpoint: &RegistryEndpoint) -> Result<Box<dyn RegistryClient>> {
        self.ledger.opened(&endpoint.url);
        Ok(Box::new(ScriptedRegistry {
            script: Arc::clone(&self.script),
            ledger: Arc::clone(&self.ledger),
            url: endpoint.url.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedRegistry {
    script: Arc<RegistryScript>,
    ledger: Arc<HandleLedger>,
    url: String,
    closed: AtomicBool,
}

impl ScriptedRegistry {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::registry("handle already closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn list_integrators(&self, priority: Priority) -> Result<Vec<Integrator>> {
        self.ensure_open()?;
        self.script.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::registry("listing unavailable"));
        }
        Ok(self
            .script
            .integrators
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.priority == priority)
            .cloned()
            .collect())
    }

    async fn get_integrator(&self, id: &str) -> Result<Integrator> {
        self.ensure_open()?;
        self.script.get_calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .integrators
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("integrator {}", id)))
    }

    async fn control_plane_metadata(&self) -> Result<Vec<ClusterControlPlaneRecord>> {
        self.ensure_open()?;
        self.script.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.script.metadata_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_metadata_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.script.metadata_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.metadata_in_flight.fetch_sub(1, Ordering::SeqCst);
        let scripted = self.script.metadata.lock().unwrap().get(&self.url).cloned();
        match scripted {
            Some(Ok(records)) => Ok(records),
            Some(Err(message)) => Err(Error::registry(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ledger.closed(&self.url);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Firewall double
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
struct VdomTables {
    addresses: Vec<FirewallAddressObject>,
    groups: Vec<FirewallAddressGroup>,
    addresses6: Vec<FirewallAddressObject>,
    groups6: Vec<FirewallAddressGroup>,
}

/// Appliance state shared by every handle opened for one firewall
#[derive(Default)]
pub struct FirewallState {
    vdoms: Mutex<HashMap<String, VdomTables>>,
    fail_reads_in: Mutex<HashSet<String>>,
    fail_creates_of: Mutex<HashSet<String>>,
    fail_group_writes: AtomicBool,
    /// Ordered log of mutation calls, e.g. `create_address root host_k8s_cpep_c1`
    log: Mutex<Vec<String>>,
    pub reads: AtomicUsize,
    pub mutations: AtomicUsize,
}

impl FirewallState {
    pub fn seed_address(&self, vdom: &str, name: &str, subnet: &str) {
        self.vdoms
            .lock()
            .unwrap()
            .entry(vdom.to_string())
            .or_default()
            .addresses
            .push(FirewallAddressObject {
                name: name.to_string(),
                subnet: subnet.to_string(),
                comment: String::new(),
                color: 0,
            });
    }

    pub fn seed_group(&self, vdom: &str, name: &str, members: &[&str], color: u32) {
        self.vdoms
            .lock()
            .unwrap()
            .entry(vdom.to_string())
            .or_default()
            .groups
            .push(FirewallAddressGroup {
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
                color,
                comment: "seeded".to_string(),
            });
    }

    pub fn seed_group6(&self, vdom: &str, name: &str) {
        self.vdoms
            .lock()
            .unwrap()
            .entry(vdom.to_string())
            .or_default()
            .groups6
            .push(FirewallAddressGroup {
                name: name.to_string(),
                members: Vec::new(),
                color: 0,
                comment: String::new(),
            });
    }

    pub fn fail_reads_in(&self, vdom: &str) {
        self.fail_reads_in.lock().unwrap().insert(vdom.to_string());
    }

    pub fn fail_create_of(&self, name: &str) {
        self.fail_creates_of.lock().unwrap().insert(name.to_string());
    }

    pub fn allow_creates(&self) {
        self.fail_creates_of.lock().unwrap().clear();
    }

    pub fn fail_group_writes(&self) {
        self.fail_group_writes.store(true, Ordering::SeqCst);
    }

    pub fn address(&self, vdom: &str, name: &str) -> Option<FirewallAddressObject> {
        self.vdoms
            .lock()
            .unwrap()
            .get(vdom)
            .and_then(|t| t.addresses.iter().find(|a| a.name == name).cloned())
    }

    pub fn group(&self, vdom: &str, name: &str) -> Option<FirewallAddressGroup> {
        self.vdoms
            .lock()
            .unwrap()
            .get(vdom)
            .and_then(|t| t.groups.iter().find(|g| g.name == name).cloned())
    }

    pub fn group6(&self, vdom: &str, name: &str) -> Option<FirewallAddressGroup> {
        self.vdoms
            .lock()
            .unwrap()
            .get(vdom)
            .and_then(|t| t.groups6.iter().find(|g| g.name == name).cloned())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn read(&self, vdom: &str) -> Result<VdomTables> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads_in.lock().unwrap().contains(vdom) {
            return Err(Error::firewall(format!("vdom {} unreachable", vdom)));
        }
        Ok(self
            .vdoms
            .lock()
            .unwrap()
            .get(vdom)
            .cloned()
            .unwrap_or_default())
    }

    fn mutate<T>(
        &self,
        entry: String,
        vdom: &str,
        apply: impl FnOnce(&mut VdomTables) -> Result<T>,
    ) -> Result<T> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(entry);
        let mut vdoms = self.vdoms.lock().unwrap();
        apply(vdoms.entry(vdom.to_string()).or_default())
    }

    fn check_group_write(&self, members: &[String], known: &[FirewallAddressObject]) -> Result<()> {
        if self.fail_group_writes.load(Ordering::SeqCst) {
            return Err(Error::firewall("group writes rejected"));
        }
        for member in members {
            if !known.iter().any(|a| &a.name == member) {
                return Err(Error::firewall(format!("entry not found: {}", member)));
            }
        }
        Ok(())
    }
}

pub struct FakeFirewall {
    state: Arc<FirewallState>,
    ledger: Arc<HandleLedger>,
    hostname: String,
    closed: AtomicBool,
}

impl FakeFirewall {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::firewall("handle already closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallClient for FakeFirewall {
    async fn list_addresses(&self, vdom: &str) -> Result<Vec<FirewallAddressObject>> {
        self.ensure_open()?;
        Ok(self.state.read(vdom)?.addresses)
    }

    async fn create_address(&self, address: &FirewallAddressObject, vdom: &str) -> Result<()> {
        self.ensure_open()?;
        let failing = self.state.fail_creates_of.lock().unwrap().contains(&address.name);
        self.state.mutate(format!("create_address {} {}", vdom, address.name), vdom, |t| {
            if failing {
                return Err(Error::firewall(format!("cannot create {}", address.name)));
            }
            if t.addresses.iter().any(|a| a.name == address.name) {
                return Err(Error::firewall(format!("duplicate entry: {}", address.name)));
            }
            t.addresses.push(address.clone());
            Ok(())
        })
    }

    async fn list_address_groups(&self, vdom: &str) -> Result<Vec<FirewallAddressGroup>> {
        self.ensure_open()?;
        Ok(self.state.read(vdom)?.groups)
    }

    async fn create_address_group(&self, group: &FirewallAddressGroup, vdom: &str) -> Result<()> {
        self.ensure_open()?;
        let state = Arc::clone(&self.state);
        self.state.mutate(format!("create_group {} {}", vdom, group.name), vdom, |t| {
            state.check_group_write(&group.members, &t.addresses)?;
            if t.groups.iter().any(|g| g.name == group.name) {
                return Err(Error::firewall(format!("duplicate entry: {}", group.name)));
            }
            t.groups.push(group.clone());
            Ok(())
        })
    }

    async fn update_address_group(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let state = Arc::clone(&self.state);
        self.state.mutate(format!("update_group {} {}", vdom, name), vdom, |t| {
            state.check_group_write(&group.members, &t.addresses)?;
            let existing = t
                .groups
                .iter_mut()
                .find(|g| g.name == name)
                .ok_or_else(|| Error::not_found(name.to_string()))?;
            *existing = group.clone();
            Ok(())
        })
    }

    async fn list_addresses6(&self, vdom: &str) -> Result<Vec<FirewallAddressObject>> {
        self.ensure_open()?;
        Ok(self.state.read(vdom)?.addresses6)
    }

    async fn create_address6(&self, address: &FirewallAddressObject, vdom: &str) -> Result<()> {
        self.ensure_open()?;
        self.state.mutate(format!("create_address6 {} {}", vdom, address.name), vdom, |t| {
            t.addresses6.push(address.clone());
            Ok(())
        })
    }

    async fn list_address_groups6(&self, vdom: &str) -> Result<Vec<FirewallAddressGroup>> {
        self.ensure_open()?;
        Ok(self.state.read(vdom)?.groups6)
    }

    async fn create_address_group6(&self, group: &FirewallAddressGroup, vdom: &str) -> Result<()> {
        self.ensure_open()?;
        let state = Arc::clone(&self.state);
        self.state.mutate(format!("create_group6 {} {}", vdom, group.name), vdom, |t| {
            state.check_group_write(&group.members, &t.addresses6)?;
            t.groups6.push(group.clone());
            Ok(())
        })
    }

    async fn update_address_group6(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.state.mutate(format!("update_group6 {} {}", vdom, name), vdom, |t| {
            if let Some(existing) = t.groups6.iter_mut().find(|g| g.name == name) {
                *existing = group.clone();
            }
            Ok(())
        })
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ledger.closed(&self.hostname);
        }
        Ok(())
    }
}

/// Opens [`FakeFirewall`] handles; one shared state per endpoint name
#[derive(Default)]
pub struct SpyFirewallFactory {
    states: Mutex<HashMap<String, Arc<FirewallState>>>,
    refuse: Mutex<HashSet<String>>,
    pub ledger: Arc<HandleLedger>,
}

impl SpyFirewallFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appliance state behind the endpoint `name`
    pub fn state(&self, name: &str) -> Arc<FirewallState> {
        Arc::clone(self.states.lock().unwrap().entry(name.to_string()).or_default())
    }

    /// Make opening a handle for `name` fail
    pub fn refuse(&self, name: &str) {
        self.refuse.lock().unwrap().insert(name.to_string());
    }

    /// Open a handle directly, bypassing the worker
    pub fn open(&self, name: &str) -> Arc<dyn FirewallClient> {
        let endpoint = firewall_endpoint(name, &["root"]);
        Arc::from(self.create(&endpoint).expect("fake firewall opens"))
    }
}

impl FirewallClientFactory for SpyFirewallFactory {
    fn create(&self, endpoint: &FirewallEndpoint) -> Result<Box<dyn FirewallClient>> {
        if self.refuse.lock().unwrap().contains(&endpoint.name) {
            return Err(Error::auth(format!("login to {} refused", endpoint.name)));
        }
        self.ledger.opened(&endpoint.name);
        Ok(Box::new(FakeFirewall {
            state: self.state(&endpoint.name),
            ledger: Arc::clone(&self.ledger),
            hostname: endpoint.name.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn registry_url_for(integrator: &str) -> String {
    format!("https://ror.{}.test", integrator.to_lowercase())
}

pub fn firewall_endpoint(name: &str, vdoms: &[&str]) -> FirewallEndpoint {
    FirewallEndpoint {
        name: name.to_string(),
        url: format!("https://{}.test", name),
        credential: "fw-token".to_string(),
        enabled: true,
        vdoms: vdoms.iter().map(|v| v.to_string()).collect(),
    }
}

/// Enabled integrator named `name`, with group suffix `name` and its own registry URL
pub fn integrator(
    name: &str,
    datacenter: &str,
    priority: Priority,
    firewalls: Vec<FirewallEndpoint>,
) -> Integrator {
    Integrator {
        id: format!("id-{}", name.to_lowercase()),
        name: name.to_string(),
        enabled: true,
        priority,
        datacenter: datacenter.to_string(),
        registry: RegistryEndpoint {
            url: registry_url_for(name),
            credential: "ror-key".to_string(),
        },
        firewalls,
        group_suffix: name.to_string(),
    }
}

pub fn record(cluster_id: &str, datacenter: &str, environments: &[&str], ipv4: [u8; 4]) -> ClusterControlPlaneRecord {
    ClusterControlPlaneRecord {
        cluster_id: cluster_id.to_string(),
        cluster_name: format!("cluster-{}", cluster_id),
        project_name: "project".to_string(),
        datacenter: datacenter.to_string(),
        environments: environments.iter().map(|e| e.to_string()).collect(),
        ipv4: Some(Ipv4Addr::from(ipv4)),
        ipv6: None,
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig::new(RegistryEndpoint {
        url: SELECTION_REGISTRY_URL.to_string(),
        credential: "selection-key".to_string(),
    })
    .with_request_timeout(5)
}

pub struct Harness {
    pub worker: Arc<SyncWorker>,
    pub events: mpsc::Receiver<SyncEvent>,
    pub registry: Arc<SpyRegistryFactory>,
    pub firewalls: Arc<SpyFirewallFactory>,
    pub script: Arc<RegistryScript>,
}

impl Harness {
    pub fn new(script: Arc<RegistryScript>) -> Self {
        Self::with_config(script, sync_config())
    }

    pub fn with_config(script: Arc<RegistryScript>, config: SyncConfig) -> Self {
        let registry = SpyRegistryFactory::new(Arc::clone(&script));
        let firewalls = SpyFirewallFactory::new();
        let (worker, events) = SyncWorker::new(registry.clone(), firewalls.clone(), config)
            .expect("worker construction succeeds");

        Self {
            worker: Arc::new(worker),
            events,
            registry,
            firewalls,
            script,
        }
    }

    /// Drain every event emitted so far
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Scenario from the reconciliation contract: integrator `A` in `dc1`, one
/// firewall `fw-a` with vdom `root`, one dev cluster `c123` at 10.0.0.5
pub fn scenario_a() -> Arc<RegistryScript> {
    let script = RegistryScript::new();
    script.add_integrator(integrator(
        "A",
        "dc1",
        Priority::Low,
        vec![firewall_endpoint("fw-a", &["root"])],
    ));
    script.set_metadata(&registry_url_for("A"), vec![record("c123", "dc1", &["dev"], [10, 0, 0, 5])]);
    script
}
