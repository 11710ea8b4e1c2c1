//! Capability interfaces consumed by the reconciliation core
//!
//! - [`RegistryClient`]: desired state (integrators, control-plane metadata)
//! - [`FirewallClient`]: actual state and mutations on one firewall appliance
//!
//! Handles are opened through the matching factory traits so the worker can
//! scope them per integrator / per firewall and close them explicitly.

pub mod registry_client;
pub mod firewall_client;

pub use registry_client::{RegistryClient, RegistryClientFactory};
pub use firewall_client::{FirewallClient, FirewallClientFactory};
