//! Subscriber handles and registry entries
//!
//! A subscriber is split in two: the [`Subscriber`] entry owned by the hub's
//! control loop (sending half of the outbound buffer plus its topic set), and
//! the [`Subscription`] held by the connection (receiving half). Dropping the
//! entry closes the buffer, which is how the hub disconnects a subscriber.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use super::message::Message;

/// Unique handle for a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(super) u64);

impl SubscriberId {
    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a delivery attempt evicted a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Eviction {
    /// Outbound buffer full; the subscriber is too slow
    Full,
    /// Receiving side already dropped
    Gone,
}

/// Registry entry, owned exclusively by the control loop
pub(super) struct Subscriber {
    tx: mpsc::Sender<Bytes>,
    topics: BTreeSet<String>,
}

impl Subscriber {
    pub(super) fn new(tx: mpsc::Sender<Bytes>, topics: BTreeSet<String>) -> Self {
        Self { tx, topics }
    }

    /// Whether this subscriber should see the message
    pub(super) fn wants(&self, message: &Message) -> bool {
        message.is_for(&self.topics)
    }

    /// Non-blocking enqueue onto the outbound buffer
    pub(super) fn offer(&self, data: Bytes) -> Result<(), Eviction> {
        match self.tx.try_send(data) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Eviction::Full),
            Err(TrySendError::Closed(_)) => Err(Eviction::Gone),
        }
    }
}

/// Receiving end of a registration
///
/// Yields payloads until the hub unregisters or evicts the subscriber, or
/// shuts down.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    topics: BTreeSet<String>,
    rx: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub(super) fn new(id: SubscriberId, topics: BTreeSet<String>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self { id, topics, rx }
    }

    /// Handle to pass to [`HubHandle::unregister`](super::HubHandle::unregister)
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Topics this subscriber follows
    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    /// Wait for the next payload; `None` once the hub closed the buffer
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a payload if one is already buffered
    pub fn try_recv(&mut self) -> Result<Bytes, TryRecvError> {
        self.rx.try_recv()
    }
}
