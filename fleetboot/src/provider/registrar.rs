//! Registration and removal against the fleet manager, shared by every
//! provider variant that registers.

use fleetboot_shared::{FleetbootError, FleetbootResult};
use serde_json::{Map, Value};

use crate::config::WorkerConfig;
use crate::fleet::{FleetManager, FleetManagerFactory, RegisterWorkerRequest};
use crate::run::{Identity, RunState};
use crate::shutdown::SystemShutdown;

/// Exchange an identity proof for credentials, writing identity and
/// credentials into the state on success. Returns the worker-config
/// document from the response (an empty document if none was supplied)
/// for the caller to merge. On failure the state is left untouched.
pub async fn register_worker(
    state: &RunState,
    fleet: &dyn FleetManager,
    worker_pool_id: &str,
    provider_id: &str,
    worker_group: &str,
    worker_id: &str,
    identity_proof: Map<String, Value>,
) -> FleetbootResult<WorkerConfig> {
    let request = RegisterWorkerRequest {
        worker_pool_id: worker_pool_id.to_string(),
        provider_id: provider_id.to_string(),
        worker_group: worker_group.to_string(),
        worker_id: worker_id.to_string(),
        worker_identity_proof: Value::Object(identity_proof),
    };

    let response = fleet
        .register_worker(&request)
        .await
        .map_err(|e| FleetbootError::Registration(format!("could not register worker: {e}")))?;

    state.set_identity(Identity {
        worker_pool_id: worker_pool_id.to_string(),
        worker_group: worker_group.to_string(),
        worker_id: worker_id.to_string(),
    });

    let mut access = state.access();
    access.credentials = response.credentials;
    access.credentials_expire = Some(response.expires);
    state.set_access(access);

    match response.worker_config {
        Some(value) => WorkerConfig::from_value(value),
        None => Ok(WorkerConfig::new()),
    }
}

/// Ask the fleet manager to remove this worker.
///
/// If the client cannot be built, or the remove call fails, the failure
/// is not propagated: the instance must not keep running when the fleet
/// manager no longer knows about it, so the agent falls back to the
/// system-shutdown action. What the caller sees is the shutdown
/// action's outcome, not the original fleet-manager error.
pub async fn remove_worker(
    state: &RunState,
    factory: &FleetManagerFactory,
    shutdown: &dyn SystemShutdown,
) -> FleetbootResult<()> {
    let access = state.access();
    let client = match factory(&access.root_url, &access.credentials) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("could not build fleet-manager client: {e}");
            return fall_back_to_shutdown(shutdown).await;
        }
    };

    let identity = state.identity();
    if let Err(e) = client
        .remove_worker(
            &identity.worker_pool_id,
            &identity.worker_group,
            &identity.worker_id,
        )
        .await
    {
        tracing::error!("could not remove worker: {e}");
        return fall_back_to_shutdown(shutdown).await;
    }

    tracing::info!(
        worker_id = %identity.worker_id,
        "worker removed from the fleet manager"
    );
    Ok(())
}

async fn fall_back_to_shutdown(shutdown: &dyn SystemShutdown) -> FleetbootResult<()> {
    tracing::warn!("falling back to system shutdown");
    if let Err(e) = shutdown.shutdown().await {
        tracing::error!("system shutdown failed: {e}");
        return Err(e);
    }
    Ok(())
}
