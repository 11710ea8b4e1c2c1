// # Firewall Client Trait
//
// Defines the interface to one firewall appliance's address objects and
// address groups, partitioned by virtual domain (vdom).
//
// ## Implementations
//
// - FortiGate (FortiOS REST API): `fwsync-firewall-fortigate` crate
//
// IPv4 and IPv6 objects live in separate namespaces on the appliance, so every
// operation has a `*6` twin.

use async_trait::async_trait;

use crate::model::{FirewallAddressGroup, FirewallAddressObject, FirewallEndpoint};

/// Trait for firewall client implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform API calls to the appliance it was opened for
/// - ✅ Translate appliance payloads into the shared model
///
/// ## Forbidden Capabilities
/// - ❌ Decide which objects should exist (owned by `AddressReconciler`)
/// - ❌ Merge group membership; `update_address_group` replaces it wholesale
/// - ❌ Retry or back off
/// - ❌ Spawn background tasks
///
/// Implementations must tolerate concurrent calls targeting different vdoms
/// or different object names.
#[async_trait]
pub trait FirewallClient: Send + Sync {
    async fn list_addresses(&self, vdom: &str) -> Result<Vec<FirewallAddressObject>, crate::Error>;

    async fn create_address(
        &self,
        address: &FirewallAddressObject,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    async fn list_address_groups(
        &self,
        vdom: &str,
    ) -> Result<Vec<FirewallAddressGroup>, crate::Error>;

    async fn create_address_group(
        &self,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    /// Replace the named group with `group`, membership included
    async fn update_address_group(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    async fn list_addresses6(&self, vdom: &str)
    -> Result<Vec<FirewallAddressObject>, crate::Error>;

    async fn create_address6(
        &self,
        address: &FirewallAddressObject,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    async fn list_address_groups6(
        &self,
        vdom: &str,
    ) -> Result<Vec<FirewallAddressGroup>, crate::Error>;

    async fn create_address_group6(
        &self,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    async fn update_address_group6(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<(), crate::Error>;

    /// Identity of the appliance, used as the destination in audit records
    fn hostname(&self) -> String;

    /// Release the handle. Must be idempotent.
    async fn close(&self) -> Result<(), crate::Error>;
}

/// Opens firewall client handles, one per endpoint per cycle
pub trait FirewallClientFactory: Send + Sync {
    fn create(&self, endpoint: &FirewallEndpoint) -> Result<Box<dyn FirewallClient>, crate::Error>;
}
