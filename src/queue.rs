//! NATS queue client with single-message backpressure.
//!
//! The client never holds more than one undelivered message. Deliveries are
//! pushed into a capacity-1 [`slot`]; when the slot is already full the new
//! message is discarded instead of queued, so the broker never sees this
//! process as a slow consumer. Subscriptions are one-shot: each one delivers
//! a single message and then cancels itself.
//!
//! Reconnects are handled inside the client. A disconnect or asynchronous
//! error only clears the [`SubscriptionFlag`], which makes the next poll open
//! a fresh subscription.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use futures::StreamExt;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, info, warn};

/// Connection settings for the NATS client.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Delay between reconnect attempts. Reconnects are unlimited.
    pub reconnect_wait: Duration,
    /// Timeout for a single dial attempt, and for each flush to the server.
    pub connect_timeout: Duration,
    /// Client name reported to the server.
    pub name: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            reconnect_wait: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            name: "paramjob".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Single-message slot
// ---------------------------------------------------------------------------

/// Create a capacity-1 buffer. The sender side is handed to broker delivery
/// tasks; the receiver side is drained by the poll loop.
pub fn slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (SlotSender(tx), SlotReceiver(rx))
}

/// Writing half of a [`slot`]. Never blocks.
#[derive(Debug)]
pub struct SlotSender<T>(mpsc::Sender<T>);

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> SlotSender<T> {
    /// Offer an item. Returns `false` when the item was discarded because
    /// the slot already holds one.
    pub fn offer(&self, item: T) -> bool {
        match self.0.try_send(item) {
            Ok(()) => {
                debug!("queued up a message");
                metrics::inbound_messages().add(1, &[KeyValue::new("result", "queued")]);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("discarded message as the buffer is full");
                metrics::inbound_messages().add(1, &[KeyValue::new("result", "discarded")]);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("discarded message as the buffer is closed");
                metrics::inbound_messages().add(1, &[KeyValue::new("result", "discarded")]);
                false
            }
        }
    }
}

/// Reading half of a [`slot`].
#[derive(Debug)]
pub struct SlotReceiver<T>(mpsc::Receiver<T>);

impl<T> SlotReceiver<T> {
    /// Take the buffered item, if any. Never blocks.
    pub fn take(&mut self) -> Option<T> {
        match self.0.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription flag
// ---------------------------------------------------------------------------

/// Whether a one-shot subscription is currently open.
///
/// Shared between the poll loop and broker callbacks, which run on
/// different tasks.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFlag(Arc<AtomicBool>);

impl SubscriptionFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Inbound message
// ---------------------------------------------------------------------------

/// A raw message delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

impl From<async_nats::Message> for InboundMessage {
    fn from(message: async_nats::Message) -> Self {
        Self {
            subject: message.subject.to_string(),
            reply: message.reply.map(|r| r.to_string()),
            payload: message.payload.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection to the NATS server.
///
/// Nothing here waits for a reconnect: while the connection is down,
/// subscribing and publishing fail at once, and a flush that gets no answer
/// within `flush_timeout` is reported as a failure.
#[derive(Clone)]
pub struct QueueClient {
    client: async_nats::Client,
    subscribed: SubscriptionFlag,
    flush_timeout: Duration,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("state", &self.client.connection_state())
            .field("subscribed", &self.subscribed.is_set())
            .finish()
    }
}

impl QueueClient {
    /// Dial the server. Only the initial dial can fail; later disconnects
    /// are retried forever in the background and clear `subscribed`.
    pub async fn connect(
        url: &str,
        options: QueueOptions,
        subscribed: SubscriptionFlag,
    ) -> Result<Self> {
        let flag = subscribed.clone();
        let lost = Arc::new(AtomicBool::new(false));
        let reconnect_wait = options.reconnect_wait;
        let flush_timeout = options.connect_timeout;
        let client = async_nats::ConnectOptions::new()
            .name(options.name)
            .connection_timeout(options.connect_timeout)
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .subscription_capacity(1)
            .event_callback(move |event| {
                let flag = flag.clone();
                let lost = lost.clone();
                async move { on_event(event, &flag, &lost) }
            })
            .connect(url)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        info!("connected to NATS");
        Ok(Self {
            client,
            subscribed,
            flush_timeout,
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.is_set()
    }

    pub fn mark_unsubscribed(&self) {
        self.subscribed.clear();
    }

    fn is_disconnected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Disconnected
        )
    }

    /// Wait for the server to acknowledge everything sent so far.
    async fn flush(&self) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.flush_timeout, self.client.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "no answer from server within {}ms",
                self.flush_timeout.as_millis()
            )),
        }
    }

    /// Open a queue-group subscription that delivers exactly one message
    /// into `sender` and then cancels itself.
    pub async fn subscribe_once(
        &self,
        subject: &str,
        queue_group: &str,
        sender: SlotSender<InboundMessage>,
    ) -> Result<()> {
        if self.is_disconnected() {
            return Err(Error::Subscribe("disconnected from NATS".to_string()));
        }
        let mut subscriber = self
            .client
            .queue_subscribe(subject.to_string(), queue_group.to_string())
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;
        subscriber
            .unsubscribe_after(1)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;
        self.flush().await.map_err(Error::Subscribe)?;
        self.subscribed.set();
        debug!(subject, queue_group, "opened one-shot subscription");

        let flag = self.subscribed.clone();
        tokio::spawn(async move {
            match subscriber.next().await {
                Some(message) => {
                    sender.offer(InboundMessage::from(message));
                }
                None => {
                    debug!("subscription closed before delivery");
                    flag.clear();
                }
            }
        });
        Ok(())
    }

    /// Publish `payload` to `subject` and flush it to the server.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        if self.is_disconnected() {
            return Err(Error::Publish("disconnected from NATS".to_string()));
        }
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        self.flush().await.map_err(Error::Publish)
    }

    /// Send a request and wait for a single reply.
    pub async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<InboundMessage> {
        let request = self.client.request(subject.to_string(), payload.into());
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(message)) => Ok(InboundMessage::from(message)),
            Ok(Err(e)) => Err(Error::Publish(e.to_string())),
            Err(_) => Err(Error::Other(format!(
                "no reply on {subject} within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

/// React to a connection event. `lost` remembers a disconnect so that only
/// a later `Connected` is reported as a reconnect.
fn on_event(event: async_nats::Event, subscribed: &SubscriptionFlag, lost: &AtomicBool) {
    match event {
        async_nats::Event::Connected => {
            if lost.swap(false, Ordering::AcqRel) {
                warn!("reconnected to NATS");
            } else {
                debug!("NATS connection established");
            }
        }
        async_nats::Event::Disconnected => {
            warn!("disconnected from NATS");
            lost.store(true, Ordering::Release);
            subscribed.clear();
        }
        async_nats::Event::ServerError(e) => {
            warn!(error = %e, "NATS server error");
            subscribed.clear();
        }
        async_nats::Event::ClientError(e) => {
            warn!(error = %e, "NATS client error");
            subscribed.clear();
        }
        async_nats::Event::SlowConsumer(sid) => {
            warn!(sid, "NATS subscription error: slow consumer");
            subscribed.clear();
        }
        other => {
            debug!(event = %other, "NATS event");
        }
    }
}
