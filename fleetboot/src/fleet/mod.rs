//! Client for the fleet-manager API.
//!
//! The fleet manager issues worker identity and credentials and tracks
//! live instances. Providers that register construct clients through an
//! injectable factory so tests can substitute a fake.

mod http;

pub use http::HttpFleetManager;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetboot_shared::FleetbootResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::Credentials;

/// Request body for the register operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerRequest {
    pub worker_pool_id: String,
    pub provider_id: String,
    pub worker_group: String,
    pub worker_id: String,

    /// Opaque provider-specific document proving the instance's
    /// legitimacy (a signed attestation, a shared secret, ...).
    pub worker_identity_proof: Value,
}

/// Response from the register operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerResponse {
    pub credentials: Credentials,
    pub expires: DateTime<Utc>,

    /// Worker configuration contributed by the fleet manager, if any.
    #[serde(default)]
    pub worker_config: Option<Value>,
}

/// Operations the agent needs from the fleet manager.
#[async_trait]
pub trait FleetManager: Send + Sync {
    async fn register_worker(
        &self,
        request: &RegisterWorkerRequest,
    ) -> FleetbootResult<RegisterWorkerResponse>;

    async fn remove_worker(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> FleetbootResult<()>;
}

/// Builds a fleet-manager client from a root URL and credentials.
pub type FleetManagerFactory =
    Arc<dyn Fn(&str, &Credentials) -> FleetbootResult<Arc<dyn FleetManager>> + Send + Sync>;

/// The production factory, backed by the HTTP client.
pub fn http_factory() -> FleetManagerFactory {
    Arc::new(|root_url, credentials| {
        let client = HttpFleetManager::new(root_url, credentials)?;
        Ok(Arc::new(client) as Arc<dyn FleetManager>)
    })
}
