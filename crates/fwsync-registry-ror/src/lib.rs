// # ROR Registry Client
//
// This crate provides the registry client for fwsync backed by the ROR HTTP API.
//
// ## Scope
//
// - ✅ Lists integrators by priority class
// - ✅ Fetches a single integrator by id (test-integrator mode)
// - ✅ Fetches control-plane metadata for all clusters
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error handling for HTTP status codes (401, 403, 404, 429, 5xx)
// - ❌ NO retry logic (the next scheduled cycle is the retry)
// - ❌ NO filtering by datacenter or environment (owned by SyncWorker)
// - ❌ NO caching (every cycle reads fresh state)
//
// ## Security Requirements
//
// - API key NEVER appears in logs or Debug output
// - Client creation fails fast if the API key is empty
//
// ## API Reference
//
// - List integrators: GET `/v1/integrators?priority=low|medium|high`
// - Get integrator: GET `/v1/integrators/:id`
// - Control-plane metadata: GET `/v1/metadata/controlplanes`
// - Authentication: `X-API-KEY: <key>` header

use async_trait::async_trait;
use fwsync_core::model::{
    ClusterControlPlaneRecord, FirewallEndpoint, Integrator, Priority, RegistryEndpoint,
};
use fwsync_core::traits::{RegistryClient, RegistryClientFactory};
use fwsync_core::{ClientRegistry, Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Name under which this client registers
pub const CLIENT_TYPE: &str = "ror";

/// Header carrying the API key
const API_KEY_HEADER: &str = "X-API-KEY";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// ROR registry client
///
/// # Trust Level: Untrusted
///
/// Stateless apart from the closed flag. One HTTP request per trait call.
pub struct RorClient {
    /// Base URL without trailing slash
    base_url: String,

    /// API key
    /// ⚠️ NEVER log this value
    api_key: String,

    client: reqwest::Client,

    closed: AtomicBool,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for RorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RorClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RorClient {
    /// Create a new ROR client
    ///
    /// # Errors
    ///
    /// `Error::Config` if the URL or API key is empty, `Error::Http` if the
    /// HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();

        if base_url.is_empty() {
            return Err(Error::config("ROR base URL is required"));
        }
        if api_key.is_empty() {
            return Err(Error::config("ROR API key is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key,
            client,
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::client(CLIENT_TYPE, "client handle is closed"));
        }

        tracing::debug!(path, "ROR request");

        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status.as_u16(), path, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::registry(format!("Failed to parse response from {}: {}", path, e)))
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn map_status(status: u16, path: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "ROR rejected the API key or lacks permissions for {} (status {})",
            path, status
        )),
        404 => Error::not_found(format!("ROR resource not found: {}", path)),
        429 => Error::client(
            CLIENT_TYPE,
            format!("Rate limit exceeded on {}. Status: {}", path, status),
        ),
        500..=599 => Error::http(format!(
            "ROR server error (transient) on {}: {} - {}",
            path, status, body
        )),
        _ => Error::registry(format!("Request to {} failed: {} - {}", path, status, body)),
    }
}

#[async_trait]
impl RegistryClient for RorClient {
    async fn list_integrators(&self, priority: Priority) -> Result<Vec<Integrator>> {
        let listed: Vec<IntegratorDto> = self
            .get_json("/v1/integrators", &[("priority", priority.as_str())])
            .await?;

        let mut integrators = Vec::with_capacity(listed.len());
        for dto in listed {
            let id = dto.id.clone();
            match Integrator::try_from(dto) {
                Ok(integrator) => integrators.push(integrator),
                Err(e) => {
                    tracing::warn!(integrator_id = %id, "Ignoring malformed integrator: {}", e);
                }
            }
        }
        Ok(integrators)
    }

    async fn get_integrator(&self, id: &str) -> Result<Integrator> {
        let dto: IntegratorDto = self.get_json(&format!("/v1/integrators/{}", id), &[]).await?;
        Integrator::try_from(dto)
    }

    async fn control_plane_metadata(&self) -> Result<Vec<ClusterControlPlaneRecord>> {
        let listed: Vec<ControlPlaneDto> = self.get_json("/v1/metadata/controlplanes", &[]).await?;
        Ok(listed.into_iter().map(ClusterControlPlaneRecord::from).collect())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(base_url = %self.base_url, "ROR client closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegratorDto {
    id: String,
    name: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    priority: Option<String>,
    datacenter: String,
    registry: RegistryDto,
    #[serde(default)]
    firewalls: Vec<FirewallDto>,
    #[serde(default)]
    group_suffix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDto {
    url: String,
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirewallDto {
    name: String,
    url: String,
    #[serde(default)]
    token: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    vdoms: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlPlaneDto {
    cluster_id: String,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    project_name: String,
    datacenter: String,
    #[serde(default)]
    environments: Vec<String>,
    #[serde(default)]
    endpoint: EndpointDto,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointDto {
    #[serde(default)]
    ipv4: Option<String>,
    #[serde(default)]
    ipv6: Option<String>,
}

impl TryFrom<IntegratorDto> for Integrator {
    type Error = Error;

    fn try_from(dto: IntegratorDto) -> Result<Self> {
        let priority = match dto.priority.as_deref() {
            Some(raw) => raw.parse::<Priority>()?,
            None => Priority::default(),
        };
        let group_suffix = dto
            .group_suffix
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| dto.name.clone());

        Ok(Integrator {
            id: dto.id,
            name: dto.name,
            enabled: dto.enabled,
            priority,
            datacenter: dto.datacenter,
            registry: RegistryEndpoint {
                url: dto.registry.url,
                credential: dto.registry.api_key,
            },
            firewalls: dto
                .firewalls
                .into_iter()
                .map(|fw| FirewallEndpoint {
                    name: fw.name,
                    url: fw.url,
                    credential: fw.token,
                    enabled: fw.enabled,
                    vdoms: fw.vdoms,
                })
                .collect(),
            group_suffix,
        })
    }
}

impl From<ControlPlaneDto> for ClusterControlPlaneRecord {
    fn from(dto: ControlPlaneDto) -> Self {
        let ipv4 = dto.endpoint.ipv4.as_deref().and_then(|raw| match raw.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(cluster_id = %dto.cluster_id, value = %raw, "Invalid IPv4 control-plane address");
                None
            }
        });
        let ipv6 = dto.endpoint.ipv6.as_deref().and_then(|raw| raw.parse().ok());
        let cluster_name = if dto.cluster_name.is_empty() {
            dto.cluster_id.clone()
        } else {
            dto.cluster_name
        };

        ClusterControlPlaneRecord {
            cluster_id: dto.cluster_id,
            cluster_name,
            project_name: dto.project_name,
            datacenter: dto.datacenter,
            environments: dto.environments,
            ipv4,
            ipv6,
        }
    }
}

/// Factory opening [`RorClient`] handles
pub struct RorFactory;

impl RegistryClientFactory for RorFactory {
    fn create(&self, endpoint: &RegistryEndpoint) -> Result<Box<dyn RegistryClient>> {
        Ok(Box::new(RorClient::new(
            endpoint.url.clone(),
            endpoint.credential.clone(),
        )?))
    }
}

/// Register the ROR client with a client registry
pub fn register(registry: &ClientRegistry) {
    registry.register_registry_client(CLIENT_TYPE, Box::new(RorFactory));
}
