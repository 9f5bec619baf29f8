//! Fleetboot shared - code common to the bootstrap agent and the worker
//! side of the capability channel.
//!
//! This crate contains the error taxonomy, the line-framed message
//! format, the transports it travels over, and the capability-negotiated
//! protocol built on top of them.

pub mod errors;
pub mod message;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use errors::{FleetbootError, FleetbootResult};
pub use message::Message;
pub use protocol::Protocol;
pub use transport::{LocalTransport, PipeTransport, Transport};
