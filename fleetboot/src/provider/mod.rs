//! Pluggable providers implementing the bootstrap lifecycle for one
//! hosting environment.
//!
//! A provider is a flat struct implementing [`Provider`], selected by
//! the `providerType` tag in the runner configuration. Variants that
//! register with the fleet manager compose the shared [`registrar`]
//! helpers rather than inheriting anything.

pub mod azure;
pub mod registrar;
pub mod standalone;
pub mod static_host;
pub mod termination;

use std::sync::Arc;

use async_trait::async_trait;
use fleetboot_shared::protocol::Protocol;
use fleetboot_shared::{FleetbootError, FleetbootResult};
use serde_json::{Map, Value};

use crate::config::RunnerConfig;
use crate::fleet;
use crate::run::RunState;
use crate::shutdown::HostShutdown;

/// Bootstrap lifecycle for one hosting environment.
///
/// The orchestrator calls these in a fixed order: `configure_run` (or
/// `use_cached_run` on restart), then `set_protocol` once the channel
/// to the worker exists, then `worker_started` after the worker process
/// begins, then `worker_finished` after it has fully exited.
#[async_trait]
pub trait Provider: Send {
    /// Populate access, identity, location, metadata and provider-local
    /// worker config into the run state. Errors here are fatal to the
    /// run; nothing retries at this layer.
    async fn configure_run(&mut self, state: &RunState) -> FleetbootResult<()>;

    /// Validate or refresh state recovered from a cached prior run.
    async fn use_cached_run(&mut self, _state: &RunState) -> FleetbootResult<()> {
        Ok(())
    }

    /// Bind the capability channel once it exists.
    fn set_protocol(&mut self, _protocol: Arc<Protocol>) {}

    /// Called once after the worker process has started. Safe against
    /// being called once per run.
    async fn worker_started(&mut self, _state: &RunState) -> FleetbootResult<()> {
        Ok(())
    }

    /// Called once after the worker process has exited.
    async fn worker_finished(&mut self, _state: &RunState) -> FleetbootResult<()> {
        Ok(())
    }
}

/// Construct the provider selected by `providerType`. The set of
/// variants is closed: extending it means extending this match.
pub fn new_provider(runnercfg: &RunnerConfig) -> FleetbootResult<Box<dyn Provider>> {
    match runnercfg.provider.provider_type.as_str() {
        "standalone" => Ok(Box::new(standalone::StandaloneProvider::new(runnercfg)?)),
        "static" => Ok(Box::new(static_host::StaticProvider::new(
            runnercfg,
            fleet::http_factory(),
            Arc::new(HostShutdown),
        )?)),
        "azure" => Ok(Box::new(azure::AzureProvider::new(
            runnercfg,
            fleet::http_factory(),
            Arc::new(azure::metadata::HttpMetadataService::new()?),
            Arc::new(HostShutdown),
        )?)),
        other => Err(FleetbootError::Config(format!(
            "unknown provider type `{other}`"
        ))),
    }
}

/// Strip any trailing separators from a root URL.
pub(crate) fn normalize_root_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Parse the optional `workerLocation` override block from a provider
/// configuration: a mapping whose values must all be strings. The
/// overrides are collected fully before any of them is applied, so a
/// failure leaves no partial location behind.
pub(crate) fn worker_location_overrides(
    data: &Map<String, Value>,
) -> FleetbootResult<Vec<(String, String)>> {
    let mut overrides = Vec::new();
    if let Some(value) = data.get("workerLocation") {
        let map = value.as_object().ok_or_else(|| {
            FleetbootError::Config("workerLocation must be a mapping".into())
        })?;
        for (key, value) in map {
            let value = value.as_str().ok_or_else(|| {
                FleetbootError::Config(format!("workerLocation value {key} is not a string"))
            })?;
            overrides.push((key.clone(), value.to_string()));
        }
    }
    Ok(overrides)
}

/// Parse the optional free-form `providerMetadata` block.
pub(crate) fn provider_metadata_overrides(
    data: &Map<String, Value>,
) -> FleetbootResult<Map<String, Value>> {
    match data.get("providerMetadata") {
        None => Ok(Map::new()),
        Some(value) => value.as_object().cloned().ok_or_else(|| {
            FleetbootError::Config("providerMetadata must be a mapping".into())
        }),
    }
}
