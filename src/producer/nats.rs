//! NATS producer: one queue-group message at a time.

use super::Producer;
use crate::config::{JobConfig, NatsConfig};
use crate::error::{Error, Result};
use crate::meta;
use crate::model::{OUTPUT_KEY, Reply, WorkUnit};
use crate::queue::{
    InboundMessage, QueueClient, QueueOptions, SlotReceiver, SlotSender, SubscriptionFlag, slot,
};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

/// Queue group used when none is configured.
pub const DEFAULT_QUEUE_GROUP: &str = "paramjob";

pub struct NatsProducer {
    nats: NatsConfig,
    job: JobConfig,
    options: QueueOptions,
    client: Option<QueueClient>,
    subscribed: SubscriptionFlag,
    sender: SlotSender<InboundMessage>,
    next: SlotReceiver<InboundMessage>,
}

impl NatsProducer {
    pub fn new(nats: NatsConfig, job: JobConfig) -> Self {
        Self::with_options(nats, job, QueueOptions::default())
    }

    pub fn with_options(nats: NatsConfig, job: JobConfig, options: QueueOptions) -> Self {
        let (sender, next) = slot();
        Self {
            nats,
            job,
            options,
            client: None,
            subscribed: SubscriptionFlag::default(),
            sender,
            next,
        }
    }

    /// Queue group in effect after defaults are applied.
    pub fn queue_group(&self) -> &str {
        &self.nats.queue_group
    }

    async fn reply(&self, reply_to: &str, reply: &Reply) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::Publish("not connected".to_string()))?;
        let payload = serde_json::to_vec(reply)?;
        let result = client.publish(reply_to, payload).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::replies().add(1, &[KeyValue::new("result", label)]);
        result
    }
}

#[async_trait]
impl Producer for NatsProducer {
    fn name(&self) -> &str {
        "nats"
    }

    async fn start(&mut self) -> Result<()> {
        if self.nats.queue_group.is_empty() {
            self.nats.queue_group = DEFAULT_QUEUE_GROUP.to_string();
        }
        if self.nats.subject.is_empty() {
            return Err(Error::Config(
                "invalid NATS subject: cannot be empty".to_string(),
            ));
        }

        self.subscribed.clear();
        let client = QueueClient::connect(
            self.nats.url.expose_secret(),
            self.options.clone(),
            self.subscribed.clone(),
        )
        .await?;
        info!(
            subject = %self.nats.subject,
            queue_group = %self.nats.queue_group,
            "NATS producer started"
        );
        self.client = Some(client);
        Ok(())
    }

    async fn produce_work(&mut self) -> Result<Option<WorkUnit>> {
        let client = self.client.as_ref().ok_or(Error::NotStarted)?;
        if !client.is_subscribed() {
            client
                .subscribe_once(
                    &self.nats.subject,
                    &self.nats.queue_group,
                    self.sender.clone(),
                )
                .await?;
        }

        let Some(message) = self.next.take() else {
            return Ok(None);
        };
        client.mark_unsubscribed();

        match WorkUnit::decode(message.subject.clone(), message.reply.clone(), &message.payload) {
            Ok(work) => Ok(Some(work)),
            Err(e) => {
                warn!(subject = %message.subject, "discarding malformed job body");
                let err = Error::Malformed {
                    subject: message.subject,
                    reason: e.to_string(),
                };
                if let Some(reply_to) = message.reply.as_deref().filter(|r| !r.is_empty()) {
                    if let Err(publish_err) = self.reply(reply_to, &Reply::failure(&err)).await {
                        error!(error = %publish_err, "could not reply to malformed message");
                    }
                }
                Err(err)
            }
        }
    }

    async fn validate_work(&self, mut work: WorkUnit) -> Result<WorkUnit> {
        let outcome = meta::validate(&self.job, &mut work.body);

        if let Some(reply_to) = work.reply_to.as_deref() {
            let reply = match &outcome {
                Ok(()) => Reply::success(work.meta_str(OUTPUT_KEY).map(str::to_string)),
                Err(e) => Reply::failure(e),
            };
            // The requester cannot learn the outcome, so the unit is dropped
            // and left for the client to resubmit.
            self.reply(reply_to, &reply).await?;
        }

        outcome.map(|()| work)
    }
}
