//! Audit events emitted by the worker and reconciler
//!
//! Group mutations are the audit trail of the system: every create/update
//! carries the group name, the operation, the source system, the destination
//! firewall and vdom, and the added/removed member names.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{AddressFamily, Priority};

/// Kind of group mutation recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperation {
    Create,
    Update,
}

impl fmt::Display for GroupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupOperation::Create => f.write_str("CREATE"),
            GroupOperation::Update => f.write_str("UPDATE"),
        }
    }
}

/// Events emitted during a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A run was admitted by the single-flight guard
    RunStarted { run: u64, priority: Priority },

    /// An integrator is about to be processed
    IntegratorStarted { integrator: String },

    /// Control-plane metadata could not be fetched for an integrator
    MetadataUnavailable { integrator: String, error: String },

    /// An address object was created
    AddressCreated {
        name: String,
        destination: String,
        vdom: String,
    },

    /// Creating an address object failed
    AddressCreateFailed {
        name: String,
        destination: String,
        vdom: String,
        error: String,
    },

    /// An address group was created or updated
    GroupChanged {
        group: String,
        operation: GroupOperation,
        source: String,
        destination: String,
        vdom: String,
        added: Vec<String>,
        removed: Vec<String>,
    },

    /// Creating or updating an address group failed
    GroupChangeFailed {
        group: String,
        operation: GroupOperation,
        destination: String,
        vdom: String,
        error: String,
    },

    /// A vdom was skipped because its current state could not be read
    VdomSkipped {
        destination: String,
        vdom: String,
        family: String,
        error: String,
    },

    /// A run finished, successfully or not
    RunFinished { run: u64, integrators: usize, succeeded: bool },
}

impl SyncEvent {
    pub(crate) fn vdom_skipped(
        destination: &str,
        vdom: &str,
        family: AddressFamily,
        error: &crate::Error,
    ) -> Self {
        SyncEvent::VdomSkipped {
            destination: destination.to_string(),
            vdom: vdom.to_string(),
            family: family.to_string(),
            error: error.to_string(),
        }
    }
}

/// Non-blocking sender for [`SyncEvent`]s
///
/// A full channel drops the event with a warning rather than stalling the run.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SyncEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SyncEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody listens; the tracing output still carries the record.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
