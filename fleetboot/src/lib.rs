//! Fleetboot - bootstrap agent for fleet-managed worker instances.
//!
//! Prepares a freshly launched compute instance to run a worker
//! process: selects a provider matching the hosting environment,
//! registers with the fleet manager to obtain short-lived credentials,
//! relays liveness and termination signals between the cloud and the
//! worker over a capability-negotiated channel, and deregisters the
//! instance when it is reclaimed.
//!
//! ## Architecture
//!
//! - `run`: thread-safe state accumulated during one bootstrap run
//! - `provider`: pluggable lifecycle implementations per environment,
//!   the shared registrar, and the termination monitor
//! - `fleet`: client for the fleet-manager API
//! - `worker`: launching the worker process and its message channel
//! - `runner`: the orchestrator tying one run together

pub mod config;
pub mod fleet;
pub mod provider;
pub mod run;
pub mod runner;
pub mod shutdown;
pub mod worker;

pub use config::{ProviderConfig, RunnerConfig, WorkerConfig};
pub use fleetboot_shared::{FleetbootError, FleetbootResult};
pub use run::{Access, Credentials, Identity, RunState};
