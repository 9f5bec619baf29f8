//! Instance self-shutdown.
//!
//! When the fleet manager cannot be told that the worker is gone, the
//! instance must not remain running and burning resources, so the agent
//! falls back to terminating it directly.

use async_trait::async_trait;
use fleetboot_shared::{FleetbootError, FleetbootResult};

/// Shuts the instance down. Injectable so the fallback path in
/// [`crate::provider::registrar::remove_worker`] is testable.
#[async_trait]
pub trait SystemShutdown: Send + Sync {
    async fn shutdown(&self) -> FleetbootResult<()>;
}

/// Invokes the platform shutdown command.
pub struct HostShutdown;

#[async_trait]
impl SystemShutdown for HostShutdown {
    async fn shutdown(&self) -> FleetbootResult<()> {
        tracing::warn!("shutting the instance down");
        let status = tokio::process::Command::new("shutdown")
            .args(["-h", "now"])
            .status()
            .await
            .map_err(|e| FleetbootError::Shutdown(format!("could not invoke shutdown: {e}")))?;
        if !status.success() {
            return Err(FleetbootError::Shutdown(format!(
                "shutdown exited with {status}"
            )));
        }
        Ok(())
    }
}
