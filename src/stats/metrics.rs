//! Counters for scans, claims and hub delivery
//!
//! All counters are lock-free atomics shared behind an `Arc`; readers take a
//! [`ScanSnapshot`] / [`HubSnapshot`] which is what `/api/stats` serializes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Scan routing and claim counters
#[derive(Debug)]
pub struct ScanStats {
    lookups_succeeded: AtomicU64,
    lookups_failed: AtomicU64,
    claims_delivered: AtomicU64,
    claims_timed_out: AtomicU64,
    claims_rejected: AtomicU64,
}

impl ScanStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            lookups_succeeded: AtomicU64::new(0),
            lookups_failed: AtomicU64::new(0),
            claims_delivered: AtomicU64::new(0),
            claims_timed_out: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_lookup(&self, succeeded: bool) {
        if succeeded {
            self.lookups_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.lookups_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_claimed(&self) {
        self.claims_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_claim_timeout(&self) {
        self.claims_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_claim_busy(&self) {
        self.claims_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            lookups_succeeded: self.lookups_succeeded.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            claims_delivered: self.claims_delivered.load(Ordering::Relaxed),
            claims_timed_out: self.claims_timed_out.load(Ordering::Relaxed),
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSnapshot {
    /// Default-routed lookups that found a member
    pub lookups_succeeded: u64,
    /// Default-routed lookups that failed (not found or upstream error)
    pub lookups_failed: u64,
    /// Claims that received a scan
    pub claims_delivered: u64,
    /// Claims that expired without a scan
    pub claims_timed_out: u64,
    /// Claims rejected because another was outstanding
    pub claims_rejected: u64,
}

/// Broadcast hub counters
///
/// Written only by the hub control loop.
#[derive(Debug)]
pub struct HubStats {
    started_at: Instant,
    active_subscribers: AtomicU64,
    total_subscribers: AtomicU64,
    messages_published: AtomicU64,
    messages_delivered: AtomicU64,
    subscribers_evicted: AtomicU64,
}

impl HubStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            active_subscribers: AtomicU64::new(0),
            total_subscribers: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            subscribers_evicted: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscriber_added(&self) {
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
        self.total_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn subscriber_removed(&self) {
        self.active_subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn subscriber_evicted(&self) {
        self.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
        self.subscriber_removed();
    }

    pub(crate) fn message_published(&self, delivered: u64) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.messages_delivered.fetch_add(delivered, Ordering::Relaxed);
    }

    /// Time since the hub started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Read all counters
    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            uptime_secs: self.uptime().as_secs(),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
            total_subscribers: self.total_subscribers.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            subscribers_evicted: self.subscribers_evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for HubStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`HubStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    /// Seconds since the hub started
    pub uptime_secs: u64,
    /// Currently registered subscribers
    pub active_subscribers: u64,
    /// Subscribers ever registered
    pub total_subscribers: u64,
    /// Messages accepted by the control loop
    pub messages_published: u64,
    /// Per-subscriber deliveries (one message to three subscribers counts three)
    pub messages_delivered: u64,
    /// Subscribers dropped because their buffer was full or closed
    pub subscribers_evicted: u64,
}
