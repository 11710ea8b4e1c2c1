// # FortiGate Firewall Client
//
// This crate provides the firewall client for fwsync backed by the FortiOS
// REST API (CMDB endpoints).
//
// ## Implementation Status
//
// - ✅ One HTTP request per trait call
// - ✅ Full error propagation (the reconciler decides what a failure means)
// - ✅ HTTP timeout configured (30 seconds by default)
// - ✅ Specific error handling for HTTP status codes (401, 403, 404, 424, 429, 5xx)
// - ✅ IPv4 and IPv6 address objects and groups, per vdom
// - ✅ Optional TLS verification bypass for appliances with self-signed certificates
// - ❌ NO retry logic (the next scheduled cycle is the retry)
// - ❌ NO diffing (owned by AddressReconciler)
// - ❌ NO background tasks (handles must be fully released by `close()`)
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Client creation fails fast if the token is empty
//
// ## API Reference
//
// - List: GET `/api/v2/cmdb/firewall/{address,addrgrp,address6,addrgrp6}?vdom=<vdom>`
// - Create: POST `/api/v2/cmdb/firewall/<table>?vdom=<vdom>`
// - Update: PUT `/api/v2/cmdb/firewall/<table>/<name>?vdom=<vdom>`
// - Authentication: `Authorization: Bearer <token>`

use async_trait::async_trait;
use fwsync_core::model::{FirewallAddressGroup, FirewallAddressObject, FirewallEndpoint};
use fwsync_core::traits::{FirewallClient, FirewallClientFactory};
use fwsync_core::{ClientRegistry, Error, Result};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Name under which this client registers
pub const CLIENT_TYPE: &str = "fortigate";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// FortiOS address type for host/network objects given as `<ip> <mask>`
const ADDRESS_TYPE_IPMASK: &str = "ipmask";

/// CMDB tables this client touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Address,
    AddressGroup,
    Address6,
    AddressGroup6,
}

impl Table {
    fn segment(self) -> &'static str {
        match self {
            Table::Address => "address",
            Table::AddressGroup => "addrgrp",
            Table::Address6 => "address6",
            Table::AddressGroup6 => "addrgrp6",
        }
    }
}

/// Connection options shared by every handle a factory opens
#[derive(Debug, Clone)]
pub struct FortigateOptions {
    /// Verify the appliance's TLS certificate
    pub verify_tls: bool,
    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl Default for FortigateOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// FortiGate firewall client
///
/// # Trust Level: Untrusted
///
/// Stateless apart from the closed flag.
pub struct FortigateClient {
    /// Management API base URL
    base_url: Url,

    /// Destination name reported in logs and audit events
    hostname: String,

    /// REST API token
    /// ⚠️ NEVER log this value
    token: String,

    client: reqwest::Client,

    closed: AtomicBool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for FortigateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FortigateClient")
            .field("base_url", &self.base_url.as_str())
            .field("hostname", &self.hostname)
            .field("token", &"<REDACTED>")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl FortigateClient {
    /// Create a client for one appliance
    ///
    /// # Errors
    ///
    /// `Error::Config` for an empty token or an unparsable URL, `Error::Http`
    /// if the HTTP client cannot be built.
    pub fn new(endpoint: &FirewallEndpoint, options: &FortigateOptions) -> Result<Self> {
        if endpoint.credential.is_empty() {
            return Err(Error::config(format!(
                "FortiGate API token is required for firewall {}",
                endpoint.name
            )));
        }

        let base_url = Url::parse(&endpoint.url).map_err(|e| {
            Error::config(format!("Invalid URL for firewall {}: {}", endpoint.name, e))
        })?;
        let hostname = hostname_of(&base_url, &endpoint.name);

        if !options.verify_tls {
            tracing::warn!(firewall = %hostname, "TLS certificate verification disabled");
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            hostname,
            token: endpoint.credential.clone(),
            client,
            closed: AtomicBool::new(false),
        })
    }

    /// URL of a CMDB table, or of one entry when `name` is given
    fn table_url(&self, table: Table, name: Option<&str>, vdom: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::config(format!("Firewall URL cannot be a base: {}", self.base_url)))?;
            segments
                .pop_if_empty()
                .extend(["api", "v2", "cmdb", "firewall", table.segment()]);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        url.query_pairs_mut().clear().append_pair("vdom", vdom);
        Ok(url)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::client(CLIENT_TYPE, "client handle is closed"));
        }
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, table: Table, vdom: &str) -> Result<Vec<T>> {
        self.ensure_open()?;
        let url = self.table_url(table, None, vdom)?;
        tracing::debug!(firewall = %self.hostname, vdom = %vdom, table = table.segment(), "FortiOS list");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("GET {} failed: {}", table.segment(), e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status.as_u16(), table.segment(), &body));
        }

        let parsed: CmdbResponse<T> = response.json().await.map_err(|e| {
            Error::firewall(format!("Failed to parse {} listing: {}", table.segment(), e))
        })?;
        Ok(parsed.results)
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        method: Method,
        table: Table,
        name: Option<&str>,
        vdom: &str,
        body: &B,
    ) -> Result<()> {
        self.ensure_open()?;
        let url = self.table_url(table, name, vdom)?;
        tracing::debug!(
            firewall = %self.hostname,
            vdom = %vdom,
            table = table.segment(),
            method = %method,
            "FortiOS write"
        );

        let response = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::http(format!("{} {} failed: {}", method, table.segment(), e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status.as_u16(), table.segment(), &body));
        }
        Ok(())
    }
}

/// Host part of the management URL, or `fallback` when the URL has none
fn hostname_of(url: &Url, fallback: &str) -> String {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Map a non-success HTTP status onto the error taxonomy
fn map_status(status: u16, table: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "FortiGate rejected the API token or lacks permissions for {} (status {})",
            table, status
        )),
        404 => Error::not_found(format!("FortiGate entry not found in {}", table)),
        // FortiOS answers 424 when a referenced object does not exist
        424 => Error::firewall(format!("Unresolved reference in {}: {}", table, body)),
        429 => Error::client(
            CLIENT_TYPE,
            format!("Rate limit exceeded on {}. Status: {}", table, status),
        ),
        500..=599 => Error::http(format!(
            "FortiGate server error (transient) on {}: {} - {}",
            table, status, body
        )),
        _ => Error::firewall(format!("Request to {} failed: {} - {}", table, status, body)),
    }
}

#[async_trait]
impl FirewallClient for FortigateClient {
    async fn list_addresses(&self, vdom: &str) -> Result<Vec<FirewallAddressObject>> {
        let entries: Vec<AddressEntry> = self.list(Table::Address, vdom).await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn create_address(&self, address: &FirewallAddressObject, vdom: &str) -> Result<()> {
        self.write(Method::POST, Table::Address, None, vdom, &AddressEntry::from(address))
            .await
    }

    async fn list_address_groups(&self, vdom: &str) -> Result<Vec<FirewallAddressGroup>> {
        let entries: Vec<GroupEntry> = self.list(Table::AddressGroup, vdom).await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn create_address_group(&self, group: &FirewallAddressGroup, vdom: &str) -> Result<()> {
        self.write(Method::POST, Table::AddressGroup, None, vdom, &GroupEntry::from(group))
            .await
    }

    async fn update_address_group(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<()> {
        self.write(Method::PUT, Table::AddressGroup, Some(name), vdom, &GroupEntry::from(group))
            .await
    }

    async fn list_addresses6(&self, vdom: &str) -> Result<Vec<FirewallAddressObject>> {
        let entries: Vec<Address6Entry> = self.list(Table::Address6, vdom).await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn create_address6(&self, address: &FirewallAddressObject, vdom: &str) -> Result<()> {
        self.write(Method::POST, Table::Address6, None, vdom, &Address6Entry::from(address))
            .await
    }

    async fn list_address_groups6(&self, vdom: &str) -> Result<Vec<FirewallAddressGroup>> {
        let entries: Vec<GroupEntry> = self.list(Table::AddressGroup6, vdom).await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn create_address_group6(&self, group: &FirewallAddressGroup, vdom: &str) -> Result<()> {
        self.write(Method::POST, Table::AddressGroup6, None, vdom, &GroupEntry::from(group))
            .await
    }

    async fn update_address_group6(
        &self,
        name: &str,
        group: &FirewallAddressGroup,
        vdom: &str,
    ) -> Result<()> {
        self.write(Method::PUT, Table::AddressGroup6, Some(name), vdom, &GroupEntry::from(group))
            .await
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(firewall = %self.hostname, "FortiGate client closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Envelope of every CMDB listing
#[derive(Debug, Deserialize)]
struct CmdbResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddressEntry {
    name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    subnet: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    color: u32,
}

impl From<&FirewallAddressObject> for AddressEntry {
    fn from(object: &FirewallAddressObject) -> Self {
        Self {
            name: object.name.clone(),
            kind: Some(ADDRESS_TYPE_IPMASK.to_string()),
            subnet: object.subnet.clone(),
            comment: object.comment.clone(),
            color: object.color,
        }
    }
}

impl From<AddressEntry> for FirewallAddressObject {
    fn from(entry: AddressEntry) -> Self {
        Self {
            name: entry.name,
            subnet: entry.subnet,
            comment: entry.comment,
            color: entry.color,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Address6Entry {
    name: String,
    #[serde(default)]
    ip6: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    color: u32,
}

impl From<&FirewallAddressObject> for Address6Entry {
    fn from(object: &FirewallAddressObject) -> Self {
        Self {
            name: object.name.clone(),
            ip6: object.subnet.clone(),
            comment: object.comment.clone(),
            color: object.color,
        }
    }
}

impl From<Address6Entry> for FirewallAddressObject {
    fn from(entry: Address6Entry) -> Self {
        Self {
            name: entry.name,
            subnet: entry.ip6,
            comment: entry.comment,
            color: entry.color,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberRef {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupEntry {
    name: String,
    #[serde(default)]
    member: Vec<MemberRef>,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    color: u32,
}

impl From<&FirewallAddressGroup> for GroupEntry {
    fn from(group: &FirewallAddressGroup) -> Self {
        Self {
            name: group.name.clone(),
            member: group
                .members
                .iter()
                .map(|name| MemberRef { name: name.clone() })
                .collect(),
            comment: group.comment.clone(),
            color: group.color,
        }
    }
}

impl From<GroupEntry> for FirewallAddressGroup {
    fn from(entry: GroupEntry) -> Self {
        Self {
            name: entry.name,
            members: entry.member.into_iter().map(|m| m.name).collect(),
            color: entry.color,
            comment: entry.comment,
        }
    }
}

/// Factory opening [`FortigateClient`] handles
#[derive(Debug, Clone, Default)]
pub struct FortigateFactory {
    options: FortigateOptions,
}

impl FortigateFactory {
    pub fn new(options: FortigateOptions) -> Self {
        Self { options }
    }
}

impl FirewallClientFactory for FortigateFactory {
    fn create(&self, endpoint: &FirewallEndpoint) -> Result<Box<dyn FirewallClient>> {
        Ok(Box::new(FortigateClient::new(endpoint, &self.options)?))
    }
}

/// Register the FortiGate client with default options
pub fn register(registry: &ClientRegistry) {
    register_with_options(registry, FortigateOptions::default());
}

/// Register the FortiGate client with explicit connection options
pub fn register_with_options(registry: &ClientRegistry, options: FortigateOptions) {
    registry.register_firewall_client(CLIENT_TYPE, Box::new(FortigateFactory::new(options)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str, token: &str) -> FirewallEndpoint {
        FirewallEndpoint {
            name: "fw-lab".to_string(),
            url: url.to_string(),
            credential: token.to_string(),
            enabled: true,
            vdoms: vec!["root".to_string()],
        }
    }

    fn client(url: &str) -> FortigateClient {
        FortigateClient::new(&endpoint(url, "secret-token"), &FortigateOptions::default()).unwrap()
    }

    #[test]
    fn test_table_urls() {
        let fw = client("https://fw1.example.net:8443/");

        let list = fw.table_url(Table::AddressGroup, None, "root").unwrap();
        assert_eq!(
            list.as_str(),
            "https://fw1.example.net:8443/api/v2/cmdb/firewall/addrgrp?vdom=root"
        );

        let entry = fw.table_url(Table::AddressGroup6, Some("grp6 lab/x"), "dmz").unwrap();
        assert_eq!(
            entry.as_str(),
            "https://fw1.example.net:8443/api/v2/cmdb/firewall/addrgrp6/grp6%20lab%2Fx?vdom=dmz"
        );
    }

    #[test]
    fn test_hostname_from_url() {
        assert_eq!(client("https://fw1.example.net").hostname(), "fw1.example.net");
        assert_eq!(client("https://10.20.30.40:443").hostname(), "10.20.30.40");
    }

    #[test]
    fn test_address_payload() {
        let object = FirewallAddressObject {
            name: "host_k8s_cpep_c1".to_string(),
            subnet: "10.0.0.5 255.255.255.255".to_string(),
            comment: "ROR control plane".to_string(),
            color: 3,
        };
        let payload = serde_json::to_value(AddressEntry::from(&object)).unwrap();

        assert_eq!(
            payload,
            serde_json::json!({
                "name": "host_k8s_cpep_c1",
                "type": "ipmask",
                "subnet": "10.0.0.5 255.255.255.255",
                "comment": "ROR control plane",
                "color": 3
            })
        );
    }

    #[test]
    fn test_group_payload_and_listing() {
        let group = FirewallAddressGroup {
            name: "grp_A".to_string(),
            members: vec!["host_k8s_cpep_a".to_string(), "host_k8s_cpep_b".to_string()],
            color: 13,
            comment: "managed".to_string(),
        };
        let payload = serde_json::to_value(GroupEntry::from(&group)).unwrap();
        assert_eq!(
            payload["member"],
            serde_json::json!([{ "name": "host_k8s_cpep_a" }, { "name": "host_k8s_cpep_b" }])
        );

        let listing = r#"{
            "http_method": "GET",
            "results": [
                { "name": "grp_A", "q_origin_key": "grp_A", "member": [{ "name": "host_k8s_cpep_a", "q_origin_key": "host_k8s_cpep_a" }], "color": 13 },
                { "name": "grp_empty" }
            ],
            "vdom": "root",
            "status": "success"
        }"#;
        let parsed: CmdbResponse<GroupEntry> = serde_json::from_str(listing).unwrap();
        let groups: Vec<FirewallAddressGroup> = parsed.results.into_iter().map(Into::into).collect();

        assert_eq!(groups[0].members, vec!["host_k8s_cpep_a".to_string()]);
        assert_eq!(groups[0].color, 13);
        assert!(groups[1].members.is_empty());
    }

    #[test]
    fn test_address6_uses_ip6_field() {
        let listing = r#"{ "results": [ { "name": "v6host", "ip6": "2001:db8::5/128" } ] }"#;
        let parsed: CmdbResponse<Address6Entry> = serde_json::from_str(listing).unwrap();
        let object = FirewallAddressObject::from(parsed.results.into_iter().next().unwrap());

        assert_eq!(object.subnet, "2001:db8::5/128");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(401, "addrgrp", ""), Error::Authentication(_)));
        assert!(matches!(map_status(404, "addrgrp", ""), Error::NotFound(_)));
        assert!(matches!(map_status(424, "addrgrp", ""), Error::Firewall(_)));
        assert!(matches!(map_status(429, "addrgrp", ""), Error::Client { .. }));
        assert!(map_status(502, "addrgrp", "").is_transient());
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", client("https://fw1.example.net"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn test_factory_validation() {
        let factory = FortigateFactory::default();
        assert!(matches!(
            factory.create(&endpoint("https://fw1.example.net", "")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            factory.create(&endpoint("not a url", "token")),
            Err(Error::Config(_))
        ));

        let insecure = FortigateFactory::new(FortigateOptions {
            verify_tls: false,
            ..FortigateOptions::default()
        });
        assert!(insecure.create(&endpoint("https://fw1.example.net", "token")).is_ok());
    }

    #[tokio::test]
    async fn test_closed_handle_refuses_calls() {
        let fw = client("https://fw1.example.net");
        fw.close().await.unwrap();
        fw.close().await.unwrap();

        assert!(matches!(fw.list_addresses("root").await, Err(Error::Client { .. })));
    }

    #[test]
    fn test_register() {
        let registry = ClientRegistry::new();
        register(&registry);
        assert!(registry.has_firewall_client(CLIENT_TYPE));
    }
}
