// # Registry Client Trait
//
// Defines the interface to the ROR registry, the source of desired state.
//
// ## Implementations
//
// - ROR HTTP API: `fwsync-registry-ror` crate
//
// ## Usage
//
// ```rust,ignore
// use fwsync_core::{Priority, RegistryClient};
//
// async fn show(client: &dyn RegistryClient) -> fwsync_core::Result<()> {
//     for integrator in client.list_integrators(Priority::Low).await? {
//         println!("{} -> {} firewall(s)", integrator.name, integrator.firewalls.len());
//     }
//     client.close().await
// }
// ```

use async_trait::async_trait;

use crate::model::{ClusterControlPlaneRecord, Integrator, Priority, RegistryEndpoint};

/// Trait for registry client implementations
///
/// # Trust Level: Untrusted
///
/// Registry clients are thin API wrappers:
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their registry endpoint only
/// - ✅ Parse registry-specific responses into the shared model
/// - ✅ Return success or failure (the worker decides what a failure means)
///
/// ## Forbidden Capabilities
/// - ❌ Filter records by datacenter or environment (owned by `SyncWorker`)
/// - ❌ Retry or back off (the next scheduled cycle is the retry)
/// - ❌ Cache results across calls (every cycle reads fresh state)
/// - ❌ Spawn background tasks (handles must be fully released by `close()`)
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// List integrators registered for a priority class
    ///
    /// Disabled integrators may be included; filtering them is the
    /// selector's job.
    async fn list_integrators(&self, priority: Priority) -> Result<Vec<Integrator>, crate::Error>;

    /// Fetch a single integrator by id, regardless of enabled state
    async fn get_integrator(&self, id: &str) -> Result<Integrator, crate::Error>;

    /// Fetch control-plane metadata for every cluster the registry knows about
    async fn control_plane_metadata(&self) -> Result<Vec<ClusterControlPlaneRecord>, crate::Error>;

    /// Release the handle
    ///
    /// Must be idempotent. Calls made after `close()` should fail.
    async fn close(&self) -> Result<(), crate::Error>;
}

/// Opens registry client handles
///
/// Every call to `create` is an "open"; the caller owns the handle and must
/// call [`RegistryClient::close`] on it.
pub trait RegistryClientFactory: Send + Sync {
    fn create(&self, endpoint: &RegistryEndpoint) -> Result<Box<dyn RegistryClient>, crate::Error>;
}
