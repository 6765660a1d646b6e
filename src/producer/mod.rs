//! Work producers: sources of work units.
//!
//! A producer is started once, then polled without blocking. Every unit it
//! hands out goes through [`Producer::validate_work`] before dispatch.

pub mod nats;

pub use nats::NatsProducer;

use crate::error::{Error, Result};
use crate::model::WorkUnit;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, error, warn};

#[async_trait]
pub trait Producer: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Connect to the work source. Configuration errors are fatal; any
    /// other error may be retried.
    async fn start(&mut self) -> Result<()>;

    /// Return the next unit if one is ready. Never blocks waiting for work.
    async fn produce_work(&mut self) -> Result<Option<WorkUnit>>;

    /// Validate and normalize a unit, acknowledging the requester if it
    /// asked for a reply.
    async fn validate_work(&self, work: WorkUnit) -> Result<WorkUnit>;
}

/// Start every producer in order, stopping at the first failure.
pub async fn start_producers(producers: &mut [Box<dyn Producer>]) -> Result<()> {
    for p in producers.iter_mut() {
        if let Err(e) = p.start().await {
            error!(error = %e, producer = p.name(), "could not start producer");
            return Err(e);
        }
    }
    Ok(())
}

/// Ask each producer in order for work and return the first unit that
/// passes validation. Failures are logged and skipped.
pub async fn produce_work(producers: &mut [Box<dyn Producer>]) -> Option<WorkUnit> {
    for p in producers.iter_mut() {
        let work = match p.produce_work().await {
            Ok(Some(work)) => work,
            Ok(None) => {
                debug!(producer = p.name(), "no work to produce");
                continue;
            }
            Err(e) => {
                error!(error = %e, producer = p.name(), "could not produce work");
                continue;
            }
        };

        let id = work.id;
        match p.validate_work(work).await {
            Ok(work) => {
                debug!(id = %work.id, producer = p.name(), "produced work");
                metrics::work_produced().add(1, &[KeyValue::new("producer", p.name().to_string())]);
                return Some(work);
            }
            Err(e @ (Error::MissingMeta(_) | Error::InvalidMeta(_))) => {
                warn!(%id, error = %e, producer = p.name(), "could not validate work");
                metrics::work_rejected().add(1, &[KeyValue::new("producer", p.name().to_string())]);
            }
            Err(e) => {
                error!(%id, error = %e, producer = p.name(), "could not validate work");
                metrics::work_rejected().add(1, &[KeyValue::new("producer", p.name().to_string())]);
            }
        }
    }
    None
}
