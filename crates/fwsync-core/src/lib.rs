// # fwsync-core
//
// Core library keeping firewall address objects and address groups in line
// with the control-plane inventory published by the ROR registry.
//
// ## Architecture Overview
//
// - **RegistryClient**: Trait for reading integrators and control-plane metadata
// - **FirewallClient**: Trait for reading and mutating firewall address objects
// - **Diff**: Name-based membership diff between desired and actual groups
// - **AddressReconciler**: Applies desired state to one firewall vdom
// - **IntegratorSelector**: Picks the integrators a run processes
// - **SyncWorker**: Single-flight orchestrator owning client lifecycles
// - **Scheduler**: One-shot or interval driver of the worker
// - **ClientRegistry**: Plugin-based registry for client implementations
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Reconciliation logic is separate from API clients
// 2. **Single-Flight**: At most one run per worker at any time
// 3. **Plugin-Based**: Clients are registered dynamically by type name
// 4. **Idempotency**: Unchanged desired state produces no mutations
// 5. **Failure Isolation**: One failing object, vdom or integrator never stops the rest

pub mod traits;
pub mod model;
pub mod diff;
pub mod events;
pub mod reconciler;
pub mod selector;
pub mod worker;
pub mod scheduler;
pub mod registry;
pub mod config;
pub mod error;

mod deadline;

// Re-export core types for convenience
pub use traits::{FirewallClient, FirewallClientFactory, RegistryClient, RegistryClientFactory};
pub use model::{
    AddressFamily, ClusterControlPlaneRecord, DesiredAddress, FirewallAddressGroup,
    FirewallAddressObject, FirewallEndpoint, Integrator, Priority, RegistryEndpoint,
};
pub use diff::Diff;
pub use events::{GroupOperation, SyncEvent};
pub use reconciler::{AddressReconciler, GroupOutcome, ReconcileReport};
pub use selector::IntegratorSelector;
pub use worker::{EXIT_ALREADY_RUNNING, EXIT_COMPLETED, RunSummary, SyncWorker, WorkOutcome};
pub use scheduler::Scheduler;
pub use registry::ClientRegistry;
pub use config::{ScheduleMode, SchedulerConfig, SyncConfig};
pub use error::{Error, Result};
