//! The orchestrator for one bootstrap run.

use std::sync::Arc;
use std::time::Duration;

use fleetboot_shared::protocol::{Protocol, GRACEFUL_TERMINATION};
use fleetboot_shared::FleetbootResult;

use crate::config::RunnerConfig;
use crate::provider::{new_provider, Provider};
use crate::run::RunState;
use crate::worker::WorkerProcess;

/// How long to wait for the worker to answer capability negotiation
/// before carrying on without it.
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the whole bootstrap lifecycle once: configure, start the worker,
/// wait for it to exit, deregister.
pub async fn run(runnercfg: RunnerConfig) -> FleetbootResult<()> {
    let provider = new_provider(&runnercfg)?;
    run_with_provider(runnercfg, provider).await
}

async fn run_with_provider(
    runnercfg: RunnerConfig,
    mut provider: Box<dyn Provider>,
) -> FleetbootResult<()> {
    let state = RunState::new();
    state.merge_worker_config(&runnercfg.worker_config);

    tracing::info!(
        provider_type = %runnercfg.provider.provider_type,
        "configuring run"
    );
    provider.configure_run(&state).await?;
    state.check_provider_results()?;

    let mut worker = WorkerProcess::spawn(&runnercfg.worker, &state.worker_location())?;

    let protocol = Protocol::new(worker.transport());
    protocol.add_capability(GRACEFUL_TERMINATION);
    provider.set_protocol(Arc::clone(&protocol));
    protocol.start(true);

    // A worker that predates the channel never answers; don't hang the
    // run on it.
    if tokio::time::timeout(NEGOTIATION_TIMEOUT, protocol.wait_until_initialized())
        .await
        .is_err()
    {
        tracing::warn!("worker did not negotiate capabilities; continuing without them");
    }

    // A startup failure must not leave the worker running or the
    // instance registered.
    if let Err(e) = provider.worker_started(&state).await {
        tracing::error!("worker startup hook failed: {e}");
        if let Err(kill_err) = worker.kill().await {
            tracing::warn!("could not stop worker: {kill_err}");
        }
        if let Err(finish_err) = provider.worker_finished(&state).await {
            tracing::warn!("could not finish run: {finish_err}");
        }
        protocol.stop();
        return Err(e);
    }

    let status = worker.wait().await?;
    tracing::info!(%status, "worker exited");

    provider.worker_finished(&state).await?;
    protocol.stop();
    Ok(())
}
