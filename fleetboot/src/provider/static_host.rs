//! Provider for long-lived hosts registered with the fleet manager
//! under a shared static secret.

use std::sync::Arc;

use async_trait::async_trait;
use fleetboot_shared::FleetbootResult;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    normalize_root_url, provider_metadata_overrides, registrar, worker_location_overrides,
    Provider,
};
use crate::config::RunnerConfig;
use crate::fleet::FleetManagerFactory;
use crate::run::{Access, RunState};
use crate::shutdown::SystemShutdown;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticConfig {
    root_url: String,
    provider_id: String,
    worker_pool_id: String,
    worker_group: String,
    worker_id: String,
    static_secret: String,
}

pub struct StaticProvider {
    config: StaticConfig,
    data: Map<String, Value>,
    factory: FleetManagerFactory,
    shutdown: Arc<dyn SystemShutdown>,
}

impl StaticProvider {
    pub fn new(
        runnercfg: &RunnerConfig,
        factory: FleetManagerFactory,
        shutdown: Arc<dyn SystemShutdown>,
    ) -> FleetbootResult<Self> {
        Ok(Self {
            config: runnercfg.provider.unpack()?,
            data: runnercfg.provider.data.clone(),
            factory,
            shutdown,
        })
    }
}

#[async_trait]
impl Provider for StaticProvider {
    async fn configure_run(&mut self, state: &RunState) -> FleetbootResult<()> {
        let location_overrides = worker_location_overrides(&self.data)?;
        let metadata = provider_metadata_overrides(&self.data)?;

        let root_url = normalize_root_url(&self.config.root_url);
        state.set_access(Access {
            root_url: root_url.clone(),
            ..Access::default()
        });

        let fleet = (self.factory)(&root_url, &state.access().credentials)?;
        let mut proof = Map::new();
        proof.insert("staticSecret".into(), json!(self.config.static_secret));
        let worker_config = registrar::register_worker(
            state,
            fleet.as_ref(),
            &self.config.worker_pool_id,
            &self.config.provider_id,
            &self.config.worker_group,
            &self.config.worker_id,
            proof,
        )
        .await?;
        state.merge_worker_config(&worker_config);

        let mut location = state.worker_location();
        location.insert("cloud".into(), "static".into());
        for (key, value) in location_overrides {
            location.insert(key, value);
        }
        state.set_worker_location(location);

        state.set_provider_metadata(metadata);
        Ok(())
    }

    async fn worker_finished(&mut self, state: &RunState) -> FleetbootResult<()> {
        registrar::remove_worker(state, &self.factory, self.shutdown.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::runnercfg;
    use super::*;
    use crate::fleet::testing::{factory, FakeFleetManager};
    use crate::shutdown::testing::FakeShutdown;

    fn static_runnercfg() -> RunnerConfig {
        runnercfg(
            "static",
            json!({
                "rootUrl": "https://fm.example.com/",
                "providerId": "static-1",
                "workerPoolId": "w/p",
                "workerGroup": "wg",
                "workerId": "wi",
                "staticSecret": "quiet",
                "workerLocation": {"region": "underworld"},
            }),
        )
    }

    #[tokio::test]
    async fn configure_run_registers_with_the_secret() {
        let fleet = FakeFleetManager::new();
        let cfg = static_runnercfg();
        let mut provider = StaticProvider::new(
            &cfg,
            factory(Arc::clone(&fleet)),
            Arc::new(FakeShutdown::new()),
        )
        .unwrap();

        let state = RunState::new();
        state.merge_worker_config(&cfg.worker_config);
        provider.configure_run(&state).await.unwrap();

        let registration = fleet.last_registration();
        assert_eq!(registration.worker_pool_id, "w/p");
        assert_eq!(registration.provider_id, "static-1");
        assert_eq!(
            registration.worker_identity_proof,
            json!({"staticSecret": "quiet"})
        );

        let access = state.access();
        assert_eq!(access.root_url, "https://fm.example.com");
        assert_eq!(access.credentials.client_id, "testing");

        let worker_config = state.worker_config();
        assert_eq!(worker_config.get("from-runner-cfg"), Some(&json!(true)));
        assert_eq!(worker_config.get("from-register-worker"), Some(&json!(true)));

        let location = state.worker_location();
        assert_eq!(location.get("cloud").map(String::as_str), Some("static"));
        assert_eq!(location.get("region").map(String::as_str), Some("underworld"));
        state.check_provider_results().unwrap();
    }

    #[tokio::test]
    async fn worker_finished_removes_the_worker() {
        let fleet = FakeFleetManager::new();
        let shutdown = Arc::new(FakeShutdown::new());
        let cfg = static_runnercfg();
        let mut provider = StaticProvider::new(
            &cfg,
            factory(Arc::clone(&fleet)),
            Arc::clone(&shutdown) as Arc<dyn SystemShutdown>,
        )
        .unwrap();

        let state = RunState::new();
        provider.configure_run(&state).await.unwrap();
        provider.worker_finished(&state).await.unwrap();

        assert_eq!(
            fleet.removals.lock().unwrap().as_slice(),
            &[("w/p".to_string(), "wg".to_string(), "wi".to_string())]
        );
        assert_eq!(shutdown.call_count(), 0);
    }
}
