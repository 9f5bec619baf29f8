//! Provider for hosts that are not managed by any fleet manager.
//!
//! Identity and credentials come straight from the runner configuration
//! and nothing is registered or removed.

use async_trait::async_trait;
use fleetboot_shared::FleetbootResult;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{normalize_root_url, provider_metadata_overrides, worker_location_overrides, Provider};
use crate::config::RunnerConfig;
use crate::run::{Access, Credentials, Identity, RunState};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandaloneConfig {
    root_url: String,
    client_id: String,
    access_token: String,
    worker_pool_id: String,
    worker_group: String,
    worker_id: String,
}

pub struct StandaloneProvider {
    config: StandaloneConfig,
    data: Map<String, Value>,
}

impl StandaloneProvider {
    pub fn new(runnercfg: &RunnerConfig) -> FleetbootResult<Self> {
        Ok(Self {
            config: runnercfg.provider.unpack()?,
            data: runnercfg.provider.data.clone(),
        })
    }
}

#[async_trait]
impl Provider for StandaloneProvider {
    async fn configure_run(&mut self, state: &RunState) -> FleetbootResult<()> {
        // Parse overrides before touching the state so a bad block
        // leaves nothing half-applied.
        let location_overrides = worker_location_overrides(&self.data)?;
        let metadata = provider_metadata_overrides(&self.data)?;

        state.set_access(Access {
            root_url: normalize_root_url(&self.config.root_url),
            credentials: Credentials {
                client_id: self.config.client_id.clone(),
                access_token: self.config.access_token.clone(),
                certificate: String::new(),
            },
            credentials_expire: None,
        });
        state.set_identity(Identity {
            worker_pool_id: self.config.worker_pool_id.clone(),
            worker_group: self.config.worker_group.clone(),
            worker_id: self.config.worker_id.clone(),
        });

        let mut location = state.worker_location();
        location.insert("cloud".into(), "standalone".into());
        for (key, value) in location_overrides {
            location.insert(key, value);
        }
        state.set_worker_location(location);

        state.set_provider_metadata(metadata);
        Ok(())
    }
}
