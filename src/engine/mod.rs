//! Supervisor engine: startup with retry, signal handling, poll-dispatch loop.

pub mod signals;
pub mod supervisor;

pub use supervisor::{Supervisor, SupervisorConfig};
