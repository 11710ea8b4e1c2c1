//! Data model shared by the registry and firewall capability interfaces
//!
//! Nothing here is persisted: integrators and control-plane records are fetched
//! fresh from the registry every cycle, and firewall objects are read back from
//! the appliance before every mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Prefix of every address object derived from a control-plane record
pub const ADDRESS_NAME_PREFIX: &str = "host_k8s_cpep_";

/// Prefix of the IPv4 address group managed for an integrator
pub const GROUP_PREFIX_V4: &str = "grp_";

/// Prefix of the IPv6 address group managed for an integrator
pub const GROUP_PREFIX_V6: &str = "grp6_";

/// Netmask used for single-host address objects
pub const HOST_NETMASK_V4: &str = "255.255.255.255";

/// Scheduling priority class of an integrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(crate::Error::invalid_input(format!(
                "unknown priority '{}', expected low, medium or high",
                other
            ))),
        }
    }
}

/// Address family a reconciliation pass operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Name of the managed group for this family
    pub fn group_name(&self, suffix: &str) -> String {
        match self {
            AddressFamily::V4 => format!("{}{}", GROUP_PREFIX_V4, suffix),
            AddressFamily::V6 => format!("{}{}", GROUP_PREFIX_V6, suffix),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("ipv4"),
            AddressFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// Connection details for a registry instance
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Base URL of the registry API
    pub url: String,
    /// API key; never logged
    pub credential: String,
}

impl fmt::Debug for RegistryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEndpoint")
            .field("url", &self.url)
            .field("credential", &"<REDACTED>")
            .finish()
    }
}

/// A firewall appliance an integrator pushes address groups to
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEndpoint {
    /// Display name, used when the appliance cannot report its own hostname
    pub name: String,
    /// Base URL of the management API
    pub url: String,
    /// API token; never logged
    pub credential: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Virtual domains to reconcile
    #[serde(default)]
    pub vdoms: Vec<String>,
}

impl fmt::Debug for FirewallEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirewallEndpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("credential", &"<REDACTED>")
            .field("enabled", &self.enabled)
            .field("vdoms", &self.vdoms)
            .finish()
    }
}

/// A configured mapping from one registry source to one or more firewalls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrator {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: Priority,
    /// Datacenter whose clusters this integrator publishes
    pub datacenter: String,
    pub registry: RegistryEndpoint,
    #[serde(default)]
    pub firewalls: Vec<FirewallEndpoint>,
    /// Suffix of the managed group names (`grp_<suffix>`, `grp6_<suffix>`)
    pub group_suffix: String,
}

fn default_enabled() -> bool {
    true
}

/// Registry-reported metadata about a cluster's control-plane endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterControlPlaneRecord {
    pub cluster_id: String,
    pub cluster_name: String,
    #[serde(default)]
    pub project_name: String,
    pub datacenter: String,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
}

impl ClusterControlPlaneRecord {
    /// Whether this record belongs in the desired set of an integrator
    ///
    /// The datacenter must match, no environment tag may be in `excluded`
    /// (case-insensitive), and an IPv4 endpoint must be present.
    pub fn is_eligible(&self, datacenter: &str, excluded: &[String]) -> bool {
        if self.datacenter != datacenter || self.ipv4.is_none() {
            return false;
        }
        !self
            .environments
            .iter()
            .any(|env| excluded.iter().any(|ex| ex.eq_ignore_ascii_case(env)))
    }
}

/// A host object the firewall should contain, derived from a control-plane record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAddress {
    pub name: String,
    /// `<ip> <mask>` as the firewall expects it
    pub subnet: String,
    pub comment: String,
    pub color: u32,
}

impl DesiredAddress {
    /// Object name for a cluster id; stable across cycles
    pub fn name_for(cluster_id: &str) -> String {
        format!("{}{}", ADDRESS_NAME_PREFIX, cluster_id)
    }

    /// Derive the IPv4 host object for a record, if it has an IPv4 endpoint
    pub fn from_record(record: &ClusterControlPlaneRecord, color: u32) -> Option<Self> {
        let ip = record.ipv4?;
        let environment = if record.environments.is_empty() {
            "unknown".to_string()
        } else {
            record.environments.join(",")
        };

        Some(Self {
            name: Self::name_for(&record.cluster_id),
            subnet: format!("{} {}", ip, HOST_NETMASK_V4),
            comment: format!(
                "ROR control plane: {} ({}, {})",
                record.cluster_name, record.project_name, environment
            ),
            color,
        })
    }
}

/// An address object as currently present on a firewall vdom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallAddressObject {
    pub name: String,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub color: u32,
}

impl From<&DesiredAddress> for FirewallAddressObject {
    fn from(desired: &DesiredAddress) -> Self {
        Self {
            name: desired.name.clone(),
            subnet: desired.subnet.clone(),
            comment: desired.comment.clone(),
            color: desired.color,
        }
    }
}

/// An address group as currently present on a firewall vdom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallAddressGroup {
    pub name: String,
    /// Names of the referenced address objects
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub comment: String,
}
