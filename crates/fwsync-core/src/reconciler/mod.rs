//! Address reconciler
//!
//! Brings one (firewall, vdom, address family) in line with a desired address
//! set:
//!
//! ```text
//!  list addresses ─┐
//!                  ├─ join ─▶ create missing objects ─▶ create/update group
//!  list groups ────┘            (IPv4 only, fan-out)      (one call at most)
//! ```
//!
//! Reads that fail abort the pass for this vdom without mutating anything.
//! Mutations that fail are logged and recorded in the report, never
//! propagated: one bad object must not stop the rest of the vdom.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deadline::bounded;
use crate::diff::Diff;
use crate::error::Result;
use crate::events::{EventSink, GroupOperation, SyncEvent};
use crate::model::{
    AddressFamily, DesiredAddress, FirewallAddressGroup, FirewallAddressObject,
};
use crate::traits::FirewallClient;

/// What happened to the managed group during one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Membership already matched (or IPv6 group already present)
    #[default]
    Unchanged,
    Created,
    Updated,
    /// The create/update call failed
    Failed,
    /// Current state could not be read; nothing was attempted
    Skipped,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub vdom: String,
    pub group: String,
    pub addresses_created: usize,
    pub address_failures: usize,
    pub group_outcome: GroupOutcome,
    pub diff: Diff,
}

impl ReconcileReport {
    /// Number of mutation calls this pass issued, failed ones included
    pub fn mutations(&self) -> usize {
        let group_calls = match self.group_outcome {
            GroupOutcome::Created | GroupOutcome::Updated | GroupOutcome::Failed => 1,
            GroupOutcome::Unchanged | GroupOutcome::Skipped => 0,
        };
        self.addresses_created + self.address_failures + group_calls
    }
}

/// Applies desired address state to firewall vdoms
#[derive(Debug, Clone)]
pub struct AddressReconciler {
    /// Identity of the desired-state source, recorded in audit events
    source: String,
    /// Color given to groups this reconciler creates
    group_color: u32,
    /// Deadline for each firewall call
    timeout: Duration,
    events: EventSink,
}

impl AddressReconciler {
    pub fn new(source: impl Into<String>, group_color: u32, timeout: Duration, events: EventSink) -> Self {
        Self {
            source: source.into(),
            group_color,
            timeout,
            events,
        }
    }

    /// Reconcile one vdom for one address family
    pub async fn reconcile(
        &self,
        firewall: Arc<dyn FirewallClient>,
        vdom: &str,
        group_suffix: &str,
        desired: &[DesiredAddress],
        family: AddressFamily,
    ) -> ReconcileReport {
        let destination = firewall.hostname();
        let group_name = family.group_name(group_suffix);
        let mut report = ReconcileReport {
            vdom: vdom.to_string(),
            group: group_name.clone(),
            ..ReconcileReport::default()
        };

        let (addresses, groups) = match self.fetch_state(firewall.as_ref(), vdom, family).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    firewall = %destination,
                    vdom = %vdom,
                    family = %family,
                    transient = e.is_transient(),
                    "Could not read current state, skipping vdom: {}",
                    e
                );
                self.events
                    .emit(SyncEvent::vdom_skipped(&destination, vdom, family, &e));
                report.group_outcome = GroupOutcome::Skipped;
                return report;
            }
        };

        let current = groups.into_iter().find(|g| g.name == group_name);

        match family {
            AddressFamily::V4 => {
                let failed = self
                    .create_missing(&firewall, &destination, vdom, desired, &addresses, &mut report)
                    .await;

                // Objects that could not be created cannot be referenced yet;
                // the next cycle picks them up again.
                let members: Vec<DesiredAddress> = desired
                    .iter()
                    .filter(|a| !failed.contains(&a.name))
                    .cloned()
                    .collect();

                self.apply_group(firewall.as_ref(), &destination, vdom, group_suffix, &members, current, &mut report)
                    .await;
            }
            AddressFamily::V6 => {
                if !desired.is_empty() {
                    debug!(
                        vdom = %vdom,
                        count = desired.len(),
                        "IPv6 address objects are not managed, ignoring desired set"
                    );
                }
                match current {
                    Some(_) => {
                        debug!(group = %group_name, vdom = %vdom, "IPv6 group present, leaving as is");
                    }
                    None => {
                        let group = self.new_group(&group_name, group_suffix, Vec::new());
                        self.create_group(firewall.as_ref(), &destination, vdom, family, group, Diff::default(), &mut report)
                            .await;
                    }
                }
            }
        }

        report
    }

    /// Read addresses and groups for a vdom concurrently
    async fn fetch_state(
        &self,
        firewall: &dyn FirewallClient,
        vdom: &str,
        family: AddressFamily,
    ) -> Result<(Vec<FirewallAddressObject>, Vec<FirewallAddressGroup>)> {
        let (addresses, groups) = match family {
            AddressFamily::V4 => {
                tokio::join!(
                    bounded("list addresses", self.timeout, firewall.list_addresses(vdom)),
                    bounded("list address groups", self.timeout, firewall.list_address_groups(vdom)),
                )
            }
            AddressFamily::V6 => {
                tokio::join!(
                    bounded("list IPv6 addresses", self.timeout, firewall.list_addresses6(vdom)),
                    bounded("list IPv6 address groups", self.timeout, firewall.list_address_groups6(vdom)),
                )
            }
        };
        Ok((addresses?, groups?))
    }

    /// Create every desired object not yet present; returns the names that failed
    async fn create_missing(
        &self,
        firewall: &Arc<dyn FirewallClient>,
        destination: &str,
        vdom: &str,
        desired: &[DesiredAddress],
        existing: &[FirewallAddressObject],
        report: &mut ReconcileReport,
    ) -> HashSet<String> {
        let present: HashSet<&str> = existing.iter().map(|a| a.name.as_str()).collect();
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for address in desired {
            if present.contains(address.name.as_str()) || !seen.insert(address.name.clone()) {
                continue;
            }
            let firewall = Arc::clone(firewall);
            let object = FirewallAddressObject::from(address);
            let vdom = vdom.to_string();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = bounded("create address", timeout, firewall.create_address(&object, &vdom)).await;
                (object.name, result)
            });
        }

        let mut failed = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(firewall = %destination, vdom = %vdom, "Address create task aborted: {}", e);
                    report.address_failures += 1;
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    info!(firewall = %destination, vdom = %vdom, address = %name, "Created address");
                    report.addresses_created += 1;
                    self.events.emit(SyncEvent::AddressCreated {
                        name,
                        destination: destination.to_string(),
                        vdom: vdom.to_string(),
                    });
                }
                Err(e) => {
                    error!(firewall = %destination, vdom = %vdom, address = %name, "Failed to create address: {}", e);
                    report.address_failures += 1;
                    self.events.emit(SyncEvent::AddressCreateFailed {
                        name: name.clone(),
                        destination: destination.to_string(),
                        vdom: vdom.to_string(),
                        error: e.to_string(),
                    });
                    failed.insert(name);
                }
            }
        }

        failed
    }

    /// Create the group if absent, otherwise replace its membership when it drifted
    #[allow(clippy::too_many_arguments)]
    async fn apply_group(
        &self,
        firewall: &dyn FirewallClient,
        destination: &str,
        vdom: &str,
        group_suffix: &str,
        members: &[DesiredAddress],
        current: Option<FirewallAddressGroup>,
        report: &mut ReconcileReport,
    ) {
        let group_name = AddressFamily::V4.group_name(group_suffix);
        let member_names: Vec<String> = members
            .iter()
            .map(|a| a.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        match current {
            None => {
                let diff = Diff::compute(members, None);
                let group = self.new_group(&group_name, group_suffix, member_names);
                self.create_group(firewall, destination, vdom, AddressFamily::V4, group, diff, report)
                    .await;
            }
            Some(existing) => {
                let diff = Diff::compute(members, Some(&existing));
                if diff.is_empty() {
                    debug!(group = %group_name, vdom = %vdom, "Group membership up to date");
                    report.group_outcome = GroupOutcome::Unchanged;
                    return;
                }

                let group = FirewallAddressGroup {
                    name: group_name.clone(),
                    members: member_names,
                    color: existing.color,
                    comment: existing.comment,
                };
                let result = bounded(
                    "update address group",
                    self.timeout,
                    firewall.update_address_group(&group_name, &group, vdom),
                )
                .await;
                self.record_group_result(result, GroupOperation::Update, destination, vdom, &group_name, diff, report);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_group(
        &self,
        firewall: &dyn FirewallClient,
        destination: &str,
        vdom: &str,
        family: AddressFamily,
        group: FirewallAddressGroup,
        diff: Diff,
        report: &mut ReconcileReport,
    ) {
        let result = match family {
            AddressFamily::V4 => {
                bounded("create address group", self.timeout, firewall.create_address_group(&group, vdom)).await
            }
            AddressFamily::V6 => {
                bounded("create IPv6 address group", self.timeout, firewall.create_address_group6(&group, vdom)).await
            }
        };
        self.record_group_result(result, GroupOperation::Create, destination, vdom, &group.name, diff, report);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_group_result(
        &self,
        result: Result<()>,
        operation: GroupOperation,
        destination: &str,
        vdom: &str,
        group: &str,
        diff: Diff,
        report: &mut ReconcileReport,
    ) {
        match result {
            Ok(()) => {
                info!(
                    group = %group,
                    operation = %operation,
                    source = %self.source,
                    destination = %destination,
                    vdom = %vdom,
                    added = ?diff.added,
                    removed = ?diff.removed,
                    "Address group changed"
                );
                self.events.emit(SyncEvent::GroupChanged {
                    group: group.to_string(),
                    operation,
                    source: self.source.clone(),
                    destination: destination.to_string(),
                    vdom: vdom.to_string(),
                    added: diff.added.clone(),
                    removed: diff.removed.clone(),
                });
                report.group_outcome = match operation {
                    GroupOperation::Create => GroupOutcome::Created,
                    GroupOperation::Update => GroupOutcome::Updated,
                };
            }
            Err(e) => {
                error!(
                    group = %group,
                    operation = %operation,
                    destination = %destination,
                    vdom = %vdom,
                    "Address group change failed: {}",
                    e
                );
                self.events.emit(SyncEvent::GroupChangeFailed {
                    group: group.to_string(),
                    operation,
                    destination: destination.to_string(),
                    vdom: vdom.to_string(),
                    error: e.to_string(),
                });
                report.group_outcome = GroupOutcome::Failed;
            }
        }
        report.diff = diff;
    }

    fn new_group(&self, name: &str, suffix: &str, members: Vec<String>) -> FirewallAddressGroup {
        FirewallAddressGroup {
            name: name.to_string(),
            members,
            color: self.group_color,
            comment: format!("Kubernetes control-plane endpoints for {} (managed by fwsync)", suffix),
        }
    }
}
