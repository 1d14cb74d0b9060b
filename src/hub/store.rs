//! Broadcast hub implementation
//!
//! The hub's control loop is the only code that touches the subscriber
//! registry. Everything else talks to it through a [`HubHandle`], which
//! queues commands onto a channel the loop drains one at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::HubStats;

use super::config::HubConfig;
use super::error::HubError;
use super::message::Message;
use super::subscriber::{Eviction, Subscriber, SubscriberId, Subscription};

enum Command {
    Register(SubscriberId, Subscriber),
    Unregister(SubscriberId),
    Publish(Message),
    Count(oneshot::Sender<usize>),
}

/// Topic-filtered fan-out to registered subscribers
///
/// Owns the registry. Run it with [`Hub::run`] (or [`Hub::spawn`]); it exits
/// when the shutdown token fires or every [`HubHandle`] has been dropped,
/// closing every remaining subscriber's buffer on the way out.
pub struct Hub {
    commands: mpsc::Receiver<Command>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    stats: Arc<HubStats>,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let stats = Arc::new(HubStats::new());

        let hub = Self {
            commands: rx,
            subscribers: HashMap::new(),
            stats: Arc::clone(&stats),
        };

        let handle = HubHandle {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_buffer: config.subscriber_buffer.max(1),
            stats,
        };

        (hub, handle)
    }

    /// Create a hub and run its control loop on a new task
    pub fn spawn(config: HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run(shutdown));
        (handle, task)
    }

    /// Run the control loop until shutdown
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!("Broadcast hub started");

        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received, closing hub");
                    break;
                }
                command = self.commands.recv() => command,
            };

            match command {
                Some(command) => self.apply(command),
                None => {
                    tracing::debug!("All hub handles dropped");
                    break;
                }
            }
        }

        self.drain();
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(id, subscriber) => {
                self.subscribers.insert(id, subscriber);
                self.stats.subscriber_added();
                tracing::debug!(
                    subscriber = %id,
                    subscribers = self.subscribers.len(),
                    "Subscriber registered"
                );
            }
            Command::Unregister(id) => {
                // Dropping the entry closes the outbound buffer
                if self.subscribers.remove(&id).is_some() {
                    self.stats.subscriber_removed();
                    tracing::debug!(
                        subscriber = %id,
                        subscribers = self.subscribers.len(),
                        "Subscriber unregistered"
                    );
                }
            }
            Command::Publish(message) => self.publish(message),
            Command::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    fn publish(&mut self, message: Message) {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, subscriber) in &self.subscribers {
            if !subscriber.wants(&message) {
                continue;
            }

            match subscriber.offer(message.data.clone()) {
                Ok(()) => delivered += 1,
                Err(reason) => evicted.push((*id, reason)),
            }
        }

        for (id, reason) in evicted {
            self.subscribers.remove(&id);
            self.stats.subscriber_evicted();

            match reason {
                Eviction::Full => tracing::warn!(
                    subscriber = %id,
                    topic = ?message.topic,
                    "Subscriber buffer full, evicting"
                ),
                Eviction::Gone => tracing::debug!(
                    subscriber = %id,
                    "Subscriber receiver dropped, evicting"
                ),
            }
        }

        self.stats.message_published(delivered);
    }

    fn drain(&mut self) {
        let count = self.subscribers.len();
        for (_, _subscriber) in self.subscribers.drain() {
            self.stats.subscriber_removed();
        }

        // Queued registrations are dropped unapplied, closing their buffers
        self.commands.close();
        while self.commands.try_recv().is_ok() {}

        tracing::info!(subscribers = count, "Broadcast hub stopped");
    }
}

/// Cloneable handle for talking to a running [`Hub`]
///
/// Every method returns once the request is queued; delivery happens
/// asynchronously on the control loop. The command queue is bounded
/// ([`HubConfig::command_buffer`]), so a call waits for a free slot while
/// the loop is behind. Delivery to subscribers never waits. After the hub
/// stops, every method returns [`HubError::Closed`].
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    subscriber_buffer: usize,
    stats: Arc<HubStats>,
}

impl HubHandle {
    /// Register a new subscriber following `topics`
    ///
    /// An empty topic set receives only unfiltered broadcasts. Empty topic
    /// names are ignored.
    pub async fn register<I, S>(&self, topics: I) -> Result<Subscription, HubError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        self.command(Command::Register(id, Subscriber::new(tx, topics.clone())))
            .await?;

        Ok(Subscription::new(id, topics, rx))
    }

    /// Remove a subscriber and close its buffer
    ///
    /// Unregistering an id that is not (or no longer) registered is a no-op.
    pub async fn unregister(&self, id: SubscriberId) -> Result<(), HubError> {
        self.command(Command::Unregister(id)).await
    }

    /// Queue a message for subscribers of `topic` (all subscribers if empty)
    ///
    /// Waits while the command queue is full.
    pub async fn send(&self, data: impl Into<Bytes>, topic: &str) -> Result<(), HubError> {
        self.publish(Message::to_topic(data, topic)).await
    }

    /// Queue a message for every subscriber
    pub async fn broadcast(&self, data: impl Into<Bytes>) -> Result<(), HubError> {
        self.publish(Message::broadcast(data)).await
    }

    /// Queue a prepared message
    pub async fn publish(&self, message: Message) -> Result<(), HubError> {
        self.command(Command::Publish(message)).await
    }

    /// Number of registered subscribers, as seen by the control loop
    ///
    /// Answered after every request queued before it has been applied.
    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Count(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Hub counters
    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }

    /// Whether the control loop has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn command(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}
