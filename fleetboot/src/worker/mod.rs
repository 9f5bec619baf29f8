//! Launching and supervising the worker process.
//!
//! The worker is an external program. Its stdin/stdout pair carries the
//! capability channel; anything it prints that is not a framed message
//! is passed through as log output.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use fleetboot_shared::{FleetbootError, FleetbootResult, PipeTransport, Transport};
use tokio::process::{Child, ChildStdin, ChildStdout};

use crate::config::WorkerImplementationConfig;

/// Environment variable carrying the worker's location document.
pub const WORKER_LOCATION_ENV: &str = "FLEETBOOT_WORKER_LOCATION";

/// A running worker process with its capability-channel transport.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    transport: Arc<PipeTransport<ChildStdout, ChildStdin>>,
}

impl WorkerProcess {
    /// Spawn the configured worker command with the location document in
    /// its environment and its stdio wired up as the capability channel.
    pub fn spawn(
        config: &WorkerImplementationConfig,
        worker_location: &HashMap<String, String>,
    ) -> FleetbootResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| FleetbootError::Config("worker command is empty".into()))?;

        let location = serde_json::to_string(worker_location)?;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .env(WORKER_LOCATION_ENV, location)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                FleetbootError::Worker(format!("could not start worker `{program}`: {e}"))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FleetbootError::Worker("worker stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FleetbootError::Worker("worker stdin not captured".into()))?;

        tracing::info!(implementation = %config.implementation, "worker started");
        Ok(Self {
            child,
            transport: Arc::new(PipeTransport::new(stdout, stdin)),
        })
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    /// Wait for the worker to exit.
    pub async fn wait(&mut self) -> FleetbootResult<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| FleetbootError::Worker(format!("could not wait for worker: {e}")))
    }

    /// Force the worker to exit and reap it.
    pub async fn kill(&mut self) -> FleetbootResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| FleetbootError::Worker(format!("could not kill worker: {e}")))
    }
}
