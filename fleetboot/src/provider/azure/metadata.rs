//! Client for the Azure instance metadata service.
//!
//! The service lives at a fixed link-local address and requires the
//! `Metadata: true` header on every request.

use std::time::Duration;

use async_trait::async_trait;
use fleetboot_shared::{FleetbootError, FleetbootResult};
use serde::Deserialize;

const METADATA_BASE_URL: &str = "http://169.254.169.254/metadata";
const INSTANCE_API_VERSION: &str = "2019-04-30";
const SCHEDULED_EVENTS_API_VERSION: &str = "2017-11-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeData {
    /// Never used for anything trusted: the metadata service does not
    /// reliably reproduce it. Identity comes from `tags_list`.
    #[serde(default)]
    pub custom_data: String,
    #[serde(default)]
    pub vm_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub vm_size: String,
    #[serde(default)]
    pub tags_list: Vec<Tag>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    #[serde(default)]
    pub private_ip_address: String,
    #[serde(default)]
    pub public_ip_address: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4Data {
    #[serde(default)]
    pub ip_address: Vec<IpAddress>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub ipv4: Ipv4Data,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NetworkData {
    #[serde(default)]
    pub interface: Vec<NetworkInterface>,
}

/// The instance document, as served by `/metadata/instance`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstanceData {
    #[serde(default)]
    pub compute: ComputeData,
    #[serde(default)]
    pub network: NetworkData,
}

impl InstanceData {
    /// Look up a tag by name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.compute
            .tags_list
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.value.as_str())
    }
}

/// One entry from `/metadata/scheduledevents`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub event_status: String,
    #[serde(default)]
    pub not_before: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEvents {
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

#[derive(Deserialize)]
struct AttestedDocument {
    signature: String,
}

/// Queries against the metadata service, injectable for tests.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn query_instance_data(&self) -> FleetbootResult<InstanceData>;

    /// The signed attestation document, used as the identity proof.
    async fn query_attested_document(&self) -> FleetbootResult<String>;

    async fn query_scheduled_events(&self) -> FleetbootResult<ScheduledEvents>;
}

pub struct HttpMetadataService {
    client: reqwest::Client,
    base: String,
}

impl HttpMetadataService {
    pub fn new() -> FleetbootResult<Self> {
        Self::with_base_url(METADATA_BASE_URL)
    }

    pub fn with_base_url(base: &str) -> FleetbootResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetbootError::Internal(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, api_version: &str) -> FleetbootResult<reqwest::Response> {
        let url = format!("{}/{}?api-version={}", self.base, path, api_version);
        let response = self
            .client
            .get(&url)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| FleetbootError::Metadata(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(FleetbootError::Metadata(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl MetadataService for HttpMetadataService {
    async fn query_instance_data(&self) -> FleetbootResult<InstanceData> {
        self.get("instance", INSTANCE_API_VERSION)
            .await?
            .json()
            .await
            .map_err(|e| FleetbootError::Metadata(format!("invalid instance document: {e}")))
    }

    async fn query_attested_document(&self) -> FleetbootResult<String> {
        let document: AttestedDocument = self
            .get("attested/document", INSTANCE_API_VERSION)
            .await?
            .json()
            .await
            .map_err(|e| FleetbootError::Metadata(format!("invalid attested document: {e}")))?;
        Ok(document.signature)
    }

    async fn query_scheduled_events(&self) -> FleetbootResult<ScheduledEvents> {
        self.get("scheduledevents", SCHEDULED_EVENTS_API_VERSION)
            .await?
            .json()
            .await
            .map_err(|e| FleetbootError::Metadata(format!("invalid scheduled events: {e}")))
    }
}
