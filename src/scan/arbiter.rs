//! Single-claimant scan handoff
//!
//! Normally every scan goes to default routing. A caller that needs to read
//! exactly one physical scan (e.g. to enrol a new card) claims the next scan;
//! while that claim is outstanding the next scan is delivered to the claimant
//! alone and routing then reverts to the default.
//!
//! The arbiter is an explicit two-state machine (`Idle`, `Claimed`) behind a
//! mutex. Both the claim path and the routing path only ever swap the state
//! while holding the lock, and every claim carries an id so that the revert
//! to `Idle` happens exactly once no matter which side gets there first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::stats::ScanStats;

use super::error::ClaimError;
use super::source::ScanEvent;

/// How long a claim waits for a scan by default
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(5);

enum Route {
    Idle,
    Claimed {
        claim_id: u64,
        tx: oneshot::Sender<ScanEvent>,
    },
}

/// Outcome of routing a scan through the arbiter
#[derive(Debug, PartialEq, Eq)]
pub enum Routed {
    /// The scan was handed to the outstanding claimant
    Claimed,
    /// No claimant; the caller must apply default routing
    Default(ScanEvent),
}

/// Arbitrates ownership of the next scan
pub struct ScanArbiter {
    route: Mutex<Route>,
    next_claim_id: AtomicU64,
    timeout: Duration,
    stats: Arc<ScanStats>,
}

impl ScanArbiter {
    /// Create an arbiter with the given claim timeout
    pub fn new(timeout: Duration) -> Self {
        Self::with_stats(timeout, Arc::new(ScanStats::new()))
    }

    /// Create an arbiter that records claim outcomes into shared stats
    pub fn with_stats(timeout: Duration, stats: Arc<ScanStats>) -> Self {
        Self {
            route: Mutex::new(Route::Idle),
            next_claim_id: AtomicU64::new(1),
            timeout,
            stats,
        }
    }

    /// Get the claim timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the stats this arbiter records into
    pub fn stats(&self) -> &Arc<ScanStats> {
        &self.stats
    }

    /// Whether a claim is currently outstanding
    pub fn is_claimed(&self) -> bool {
        matches!(*self.route.lock(), Route::Claimed { .. })
    }

    /// Claim the next scan using the configured timeout
    pub async fn claim_next(&self) -> Result<ScanEvent, ClaimError> {
        self.claim_next_within(self.timeout).await
    }

    /// Claim the next scan, waiting at most `timeout`
    ///
    /// Fails immediately with [`ClaimError::AlreadyClaimed`] when another
    /// claim is outstanding; claims are rejected, never queued. Dropping the
    /// returned future releases the claim.
    pub async fn claim_next_within(&self, timeout: Duration) -> Result<ScanEvent, ClaimError> {
        let (tx, mut rx) = oneshot::channel();

        let claim_id = {
            let mut route = self.route.lock();
            if matches!(*route, Route::Claimed { .. }) {
                self.stats.record_claim_busy();
                tracing::debug!("Scan claim rejected: already claimed");
                return Err(ClaimError::AlreadyClaimed);
            }

            let claim_id = self.next_claim_id.fetch_add(1, Ordering::Relaxed);
            *route = Route::Claimed { claim_id, tx };
            claim_id
        };

        let _release = ClaimRelease {
            arbiter: self,
            claim_id,
        };

        tracing::debug!(claim_id = claim_id, timeout = ?timeout, "Waiting for claimed scan");

        if let Ok(Ok(scan)) = tokio::time::timeout(timeout, &mut rx).await {
            self.stats.record_claimed();
            tracing::info!(claim_id = claim_id, scan = %scan, "Claimed scan delivered");
            return Ok(scan);
        }

        // A scan may have been routed to us between the deadline and the
        // release; once released, nothing else can reach `rx`.
        self.release(claim_id);
        match rx.try_recv() {
            Ok(scan) => {
                self.stats.record_claimed();
                Ok(scan)
            }
            Err(_) => {
                self.stats.record_claim_timeout();
                tracing::debug!(claim_id = claim_id, "Scan claim timed out");
                Err(ClaimError::Timeout(timeout))
            }
        }
    }

    /// Route a scan to the outstanding claimant, if any
    ///
    /// Always leaves the arbiter `Idle`. If the claimant has already gone
    /// away the scan is returned for default routing.
    pub fn route(&self, scan: ScanEvent) -> Routed {
        let mut route = self.route.lock();

        match std::mem::replace(&mut *route, Route::Idle) {
            Route::Idle => Routed::Default(scan),
            Route::Claimed { claim_id, tx } => match tx.send(scan) {
                Ok(()) => {
                    tracing::debug!(claim_id = claim_id, "Scan routed to claimant");
                    Routed::Claimed
                }
                Err(scan) => {
                    tracing::debug!(claim_id = claim_id, "Claimant gone, using default routing");
                    Routed::Default(scan)
                }
            },
        }
    }

    fn release(&self, claim_id: u64) {
        let mut route = self.route.lock();
        if let Route::Claimed { claim_id: current, .. } = &*route {
            if *current == claim_id {
                *route = Route::Idle;
            }
        }
    }
}

impl Default for ScanArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_CLAIM_TIMEOUT)
    }
}

struct ClaimRelease<'a> {
    arbiter: &'a ScanArbiter,
    claim_id: u64,
}

impl Drop for ClaimRelease<'_> {
    fn drop(&mut self) {
        self.arbiter.release(self.claim_id);
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, task};

    use super::*;

    fn scan(id: &str) -> ScanEvent {
        ScanEvent::from_raw(id).unwrap()
    }

    async fn wait_for_claim(arbiter: &ScanArbiter) {
        while !arbiter.is_claimed() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unclaimed_scan_uses_default_routing() {
        let arbiter = ScanArbiter::default();

        assert_eq!(arbiter.route(scan("ab12")), Routed::Default(scan("ab12")));
        assert!(!arbiter.is_claimed());
    }

    #[tokio::test]
    async fn test_claim_receives_next_scan() {
        let arbiter = Arc::new(ScanArbiter::default());

        let claimant = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.claim_next().await })
        };
        wait_for_claim(&arbiter).await;

        assert_eq!(arbiter.route(scan("CARD7")), Routed::Claimed);
        assert_eq!(claimant.await.unwrap(), Ok(scan("CARD7")));

        // Routing is back to default for the scan after
        assert!(!arbiter.is_claimed());
        assert_eq!(arbiter.route(scan("next")), Routed::Default(scan("next")));
        assert_eq!(arbiter.stats().snapshot().claims_delivered, 1);
    }

    #[tokio::test]
    async fn test_second_claim_is_rejected() {
        let arbiter = Arc::new(ScanArbiter::default());

        let first = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.claim_next().await })
        };
        wait_for_claim(&arbiter).await;

        assert_eq!(arbiter.claim_next().await, Err(ClaimError::AlreadyClaimed));

        // The first claim is unaffected by the rejected one
        assert_eq!(arbiter.route(scan("x1")), Routed::Claimed);
        assert_eq!(first.await.unwrap(), Ok(scan("x1")));
        assert_eq!(arbiter.stats().snapshot().claims_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_times_out_and_restores_default() {
        let arbiter = ScanArbiter::default();

        let result = arbiter.claim_next().await;
        assert_eq!(result, Err(ClaimError::Timeout(DEFAULT_CLAIM_TIMEOUT)));
        assert!(!arbiter.is_claimed());
        assert_eq!(arbiter.route(scan("late")), Routed::Default(scan("late")));

        // A fresh claim works after the timeout
        let arbiter = Arc::new(arbiter);
        let claimant = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.claim_next().await })
        };
        wait_for_claim(&arbiter).await;
        assert_eq!(arbiter.route(scan("again")), Routed::Claimed);
        assert_eq!(claimant.await.unwrap(), Ok(scan("again")));
        assert_eq!(arbiter.stats().snapshot().claims_timed_out, 1);
    }

    #[tokio::test]
    async fn test_dropped_claim_releases() {
        let arbiter = ScanArbiter::default();

        {
            let mut claim = task::spawn(arbiter.claim_next());
            assert_pending!(claim.poll());
            assert!(arbiter.is_claimed());
        }

        assert!(!arbiter.is_claimed());
        assert_eq!(arbiter.route(scan("ab")), Routed::Default(scan("ab")));
    }
}
