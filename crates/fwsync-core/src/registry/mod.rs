//! Plugin-based client registry
//!
//! The registry lets registry-client and firewall-client implementations be
//! registered by type name at start-up, so the daemon picks them from
//! configuration instead of hard-coding them.
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In fwsync-firewall-fortigate
//! pub fn register(registry: &ClientRegistry) {
//!     registry.register_firewall_client("fortigate", Box::new(FortigateFactory::default()));
//! }
//! ```

use crate::error::{Error, Result};
use crate::traits::{FirewallClientFactory, RegistryClientFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Client registry for plugin-based client creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ClientRegistry {
    /// Registered registry client factories
    registry_clients: RwLock<HashMap<String, Arc<dyn RegistryClientFactory>>>,

    /// Registered firewall client factories
    firewall_clients: RwLock<HashMap<String, Arc<dyn FirewallClientFactory>>>,
}

impl ClientRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a registry client factory
    ///
    /// # Parameters
    ///
    /// - `name`: Client type name (e.g., "ror")
    /// - `factory`: Factory object for opening client handles
    pub fn register_registry_client(
        &self,
        name: impl Into<String>,
        factory: Box<dyn RegistryClientFactory>,
    ) {
        let mut clients = self
            .registry_clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        clients.insert(name.into(), Arc::from(factory));
    }

    /// Register a firewall client factory
    ///
    /// # Parameters
    ///
    /// - `name`: Client type name (e.g., "fortigate")
    /// - `factory`: Factory object for opening client handles
    pub fn register_firewall_client(
        &self,
        name: impl Into<String>,
        factory: Box<dyn FirewallClientFactory>,
    ) {
        let mut clients = self
            .firewall_clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        clients.insert(name.into(), Arc::from(factory));
    }

    /// Look up a registry client factory by type name
    ///
    /// # Returns
    ///
    /// - `Ok(factory)`: The registered factory
    /// - `Err(Error::Config)`: If the type is not registered
    pub fn registry_client_factory(&self, name: &str) -> Result<Arc<dyn RegistryClientFactory>> {
        let clients = self
            .registry_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown registry client type: {}", name)))
    }

    /// Look up a firewall client factory by type name
    pub fn firewall_client_factory(&self, name: &str) -> Result<Arc<dyn FirewallClientFactory>> {
        let clients = self
            .firewall_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown firewall client type: {}", name)))
    }

    /// List all registered registry client types
    pub fn list_registry_clients(&self) -> Vec<String> {
        let clients = self
            .registry_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = clients.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered firewall client types
    pub fn list_firewall_clients(&self) -> Vec<String> {
        let clients = self
            .firewall_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_registry_client(&self, name: &str) -> bool {
        self.registry_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_firewall_client(&self, name: &str) -> bool {
        self.firewall_clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
