//! State of one worker run.

mod state;

pub use state::{Access, Credentials, FileSpec, Identity, RunState};
