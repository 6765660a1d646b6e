//! # paramjob
//!
//! Supervisor for parameterized jobs. Pulls job requests off a NATS queue
//! group one message at a time, validates their metadata, acknowledges the
//! requester, and runs the configured command with the metadata exposed as
//! environment variables.

pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod meta;
pub mod model;
pub mod producer;
pub mod queue;
pub mod telemetry;
