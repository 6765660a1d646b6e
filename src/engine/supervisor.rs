//! Supervisor: starts producers and consumers, then polls for work and
//! dispatches it, one unit at a time.

use crate::consumer::{self, Consumer};
use crate::error::Result;
use crate::producer::{self, Producer};
use crate::telemetry::work::{record_stage, start_work_span};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, warn};

/// Timing of the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait before retrying a failed startup.
    pub startup_backoff: Duration,
    /// Sleep when no producer has work.
    pub idle_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_backoff: Duration::from_secs(5),
            idle_interval: Duration::from_secs(1),
        }
    }
}

pub struct Supervisor {
    producers: Vec<Box<dyn Producer>>,
    consumers: Vec<Arc<dyn Consumer>>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        producers: Vec<Box<dyn Producer>>,
        consumers: Vec<Arc<dyn Consumer>>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            producers,
            consumers,
            config,
        }
    }

    /// Start all producers, then all consumers. Any failure restarts the
    /// whole phase after the backoff; only fatal errors are returned.
    pub async fn start(&mut self) -> Result<()> {
        loop {
            info!("starting producers");
            let started = match producer::start_producers(&mut self.producers).await {
                Ok(()) => {
                    info!("starting consumers");
                    consumer::start_consumers(&self.consumers).await
                }
                Err(e) => Err(e),
            };
            match started {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "startup failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.config.startup_backoff.as_secs(),
                        "startup failed, retrying"
                    );
                    tokio::time::sleep(self.config.startup_backoff).await;
                }
            }
        }
    }

    /// Poll the producers once and, if a unit is produced, dispatch it to
    /// every consumer and wait for them. Returns whether a unit ran.
    pub async fn poll_once(&mut self) -> bool {
        let Some(work) = producer::produce_work(&mut self.producers).await else {
            return false;
        };

        let span = start_work_span(&work.subject, &work.id);
        record_stage(&span, "dispatching");
        let consumers = &self.consumers;
        async {
            consumer::consume_work(consumers, &work).await;
        }
        .instrument(span.clone())
        .await;
        record_stage(&span, "finished");
        true
    }

    /// Start up, install the signal handler, and poll forever.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        let _signals = super::signals::install()?;

        info!("supervisor started, polling for work");
        loop {
            if !self.poll_once().await {
                tokio::time::sleep(self.config.idle_interval).await;
            }
        }
    }
}
