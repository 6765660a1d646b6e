//! Work consumers and the fan-out that feeds them.
//!
//! Every consumer receives the same work unit. [`consume_work`] runs them
//! concurrently and returns only once all of them are done, so the poll loop
//! never has more than one unit in flight.

pub mod command;

pub use command::CommandConsumer;

use crate::error::Result;
use crate::model::WorkUnit;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Prepare the consumer. May be retried.
    async fn start(&self) -> Result<()>;

    /// Run the unit to completion.
    async fn consume_work(&self, work: WorkUnit) -> Result<()>;
}

/// Start every consumer in order, stopping at the first failure.
pub async fn start_consumers(consumers: &[Arc<dyn Consumer>]) -> Result<()> {
    for c in consumers {
        if let Err(e) = c.start().await {
            error!(error = %e, consumer = c.name(), "could not start consumer");
            return Err(e);
        }
    }
    Ok(())
}

/// Give every consumer the same unit and wait for all of them to finish.
///
/// A failing consumer is logged and does not affect the others.
pub async fn consume_work(consumers: &[Arc<dyn Consumer>], work: &WorkUnit) {
    let mut tasks = JoinSet::new();
    for c in consumers {
        let c = Arc::clone(c);
        let work = work.clone();
        tasks.spawn(async move {
            let result = c.consume_work(work).await;
            (c, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((c, Ok(()))) => {
                debug!(id = %work.id, consumer = c.name(), "consumer finished");
            }
            Ok((c, Err(e))) => {
                error!(id = %work.id, error = %e, consumer = c.name(), "could not consume work");
            }
            Err(e) => {
                error!(id = %work.id, error = %e, "consumer task failed");
            }
        }
    }
}
