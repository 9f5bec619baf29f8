//! HTTP implementation of the fleet-manager client.

use std::time::Duration;

use async_trait::async_trait;
use fleetboot_shared::{FleetbootError, FleetbootResult};

use super::{FleetManager, RegisterWorkerRequest, RegisterWorkerResponse};
use crate::run::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpFleetManager {
    client: reqwest::Client,
    base: String,
    credentials: Credentials,
}

impl HttpFleetManager {
    pub fn new(root_url: &str, credentials: &Credentials) -> FleetbootResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetbootError::Internal(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: format!(
                "{}/api/worker-manager/v1",
                root_url.trim_end_matches('/')
            ),
            credentials: credentials.clone(),
        })
    }
}

#[async_trait]
impl FleetManager for HttpFleetManager {
    async fn register_worker(
        &self,
        request: &RegisterWorkerRequest,
    ) -> FleetbootResult<RegisterWorkerResponse> {
        // Registration is unauthenticated; the identity proof carries
        // the trust.
        let url = format!("{}/worker/register", self.base);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| FleetbootError::Registration(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FleetbootError::Registration(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FleetbootError::Registration(format!("invalid response body: {e}")))
    }

    async fn remove_worker(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> FleetbootResult<()> {
        let url = format!(
            "{}/workers/{}/{}/{}",
            self.base,
            urlencoding::encode(worker_pool_id),
            urlencoding::encode(worker_group),
            urlencoding::encode(worker_id),
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| FleetbootError::Internal(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FleetbootError::Internal(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}
