//! Default scan routing
//!
//! Scans nobody has claimed are looked up and pushed to the display of every
//! account that has a member sheet bound. Each account is served by its own
//! task so a slow or failing sheet never holds up another account's display.
//!
//! Per account (topic), the subscriber sees:
//!
//! 1. `{"scanning":true}` as soon as the scan arrives
//! 2. the member record, or `{"error":"..."}` if the lookup failed
//!
//! Visit recording happens between the two; its failure is only logged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::directory::MemberDirectory;
use crate::hub::{HubError, HubHandle};
use crate::scan::{FeedEnd, Routed, ScanArbiter, ScanEvent, ScanFeed};
use crate::stats::ScanStats;

/// Status payload sent before a lookup starts
pub const SCANNING_PAYLOAD: &[u8] = br#"{"scanning":true}"#;

/// Encode an error as the `{"error": ...}` payload clients expect
pub fn error_payload(err: &impl fmt::Display) -> Bytes {
    match serde_json::to_vec(&serde_json::json!({ "error": err.to_string() })) {
        Ok(json) => Bytes::from(json),
        Err(_) => Bytes::from_static(br#"{"error":"error"}"#),
    }
}

/// Which member sheet each account (topic) is working against
#[derive(Debug, Default)]
pub struct SheetBindings {
    sheets: RwLock<HashMap<String, String>>,
}

impl SheetBindings {
    /// Create an empty binding table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `topic` to a datastore, replacing any previous binding
    pub fn bind(&self, topic: impl Into<String>, sheet: impl Into<String>) {
        let topic = topic.into();
        let sheet = sheet.into();
        tracing::info!(topic = %topic, sheet = %sheet, "Sheet bound");
        self.sheets.write().insert(topic, sheet);
    }

    /// Remove a binding, returning the sheet it pointed at
    pub fn unbind(&self, topic: &str) -> Option<String> {
        self.sheets.write().remove(topic)
    }

    /// Sheet bound to `topic`
    pub fn get(&self, topic: &str) -> Option<String> {
        self.sheets.read().get(topic).cloned()
    }

    /// Copy of every `(topic, sheet)` pair
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.sheets
            .read()
            .iter()
            .map(|(topic, sheet)| (topic.clone(), sheet.clone()))
            .collect()
    }

    /// Number of bound topics
    pub fn len(&self) -> usize {
        self.sheets.read().len()
    }

    /// Whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default routing: lookup, visit recording and broadcast
pub struct ScanRouter<D> {
    hub: HubHandle,
    directory: Arc<D>,
    bindings: Arc<SheetBindings>,
    stats: Arc<ScanStats>,
}

impl<D: MemberDirectory> ScanRouter<D> {
    /// Create a router publishing through `hub`
    pub fn new(
        hub: HubHandle,
        directory: Arc<D>,
        bindings: Arc<SheetBindings>,
        stats: Arc<ScanStats>,
    ) -> Self {
        Self {
            hub,
            directory,
            bindings,
            stats,
        }
    }

    /// Feed every unclaimed scan through default routing until the feed
    /// ends or shutdown fires
    pub async fn run(
        self: Arc<Self>,
        mut feed: ScanFeed,
        arbiter: Arc<ScanArbiter>,
        shutdown: CancellationToken,
    ) -> FeedEnd {
        loop {
            let scan = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                scan = feed.next() => scan,
            };

            let Some(scan) = scan else {
                tracing::info!("Reached the end of RFID scanner input");
                break;
            };

            match arbiter.route(scan) {
                Routed::Claimed => {}
                Routed::Default(scan) => {
                    self.dispatch(scan);
                }
            }
        }

        feed.finish().await
    }

    /// Start one announcement task per bound account
    ///
    /// Returns the number of tasks started.
    pub fn dispatch(self: &Arc<Self>, scan: ScanEvent) -> usize {
        let bindings = self.bindings.snapshot();

        if bindings.is_empty() {
            tracing::debug!(scan = %scan, "No sheets bound, scan ignored");
        }

        for (topic, sheet) in &bindings {
            let router = Arc::clone(self);
            let topic = topic.clone();
            let sheet = sheet.clone();
            let scan = scan.clone();

            tokio::spawn(async move {
                if let Err(e) = router.announce(&topic, &sheet, &scan).await {
                    tracing::debug!(topic = %topic, error = %e, "Scan announcement dropped");
                }
            });
        }

        bindings.len()
    }

    /// Look a scan up in one sheet and publish the outcome to `topic`
    pub async fn announce(&self, topic: &str, sheet: &str, scan: &ScanEvent) -> Result<(), HubError> {
        self.hub.send(Bytes::from_static(SCANNING_PAYLOAD), topic).await?;

        let user = match self.directory.lookup_user(sheet, scan.as_str()).await {
            Ok(user) => user,
            Err(e) => {
                self.stats.record_lookup(false);
                tracing::error!(topic = %topic, sheet = %sheet, scan = %scan, error = %e, "Member lookup failed");
                return self.hub.send(error_payload(&e), topic).await;
            }
        };

        let payload = match serde_json::to_vec(&user) {
            Ok(json) => json,
            Err(e) => {
                self.stats.record_lookup(false);
                tracing::error!(error = %e, "Failed to encode member as JSON");
                return self.hub.send(error_payload(&e), topic).await;
            }
        };

        if let Err(e) = self.directory.record_visit(sheet, &user.member_id).await {
            tracing::error!(sheet = %sheet, member = %user.member_id, error = %e, "Failed to record visit");
        }

        self.stats.record_lookup(true);
        tracing::info!(topic = %topic, member = %user.member_id, "Member checked in");

        self.hub.send(payload, topic).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::directory::{DirectoryError, MemoryDirectory, User};
    use crate::hub::{Hub, HubConfig, Subscription};

    struct FlakyDirectory;

    impl MemberDirectory for FlakyDirectory {
        async fn lookup_user(&self, _: &str, scan_id: &str) -> Result<User, DirectoryError> {
            Ok(User {
                member_id: "bs-9".to_string(),
                debt: false,
                email: String::new(),
                expiration: None,
                scan_id: scan_id.to_string(),
                name: "Flaky".to_string(),
                photo: String::new(),
            })
        }

        async fn record_visit(&self, _: &str, _: &str) -> Result<(), DirectoryError> {
            Err(DirectoryError::Transient("quota exceeded".to_string()))
        }
    }

    fn directory() -> Arc<MemoryDirectory> {
        let directory = MemoryDirectory::new();
        directory.insert(
            "sheet-1",
            User {
                member_id: "bs-1".to_string(),
                debt: false,
                email: "ada@example.com".to_string(),
                expiration: None,
                scan_id: "ab12".to_string(),
                name: "Ada".to_string(),
                photo: String::new(),
            },
        );
        Arc::new(directory)
    }

    async fn next_json(sub: &mut Subscription) -> Value {
        let data = sub.recv().await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    fn scan(id: &str) -> ScanEvent {
        ScanEvent::from_raw(id).unwrap()
    }

    #[test]
    fn test_error_payload() {
        let payload = error_payload(&DirectoryError::user_not_found("x"));
        let json: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["error"], "user \"x\" was not found");
    }

    #[test]
    fn test_bindings() {
        let bindings = SheetBindings::new();
        assert!(bindings.is_empty());

        bindings.bind("a@example.com", "s1");
        bindings.bind("a@example.com", "s2");
        assert_eq!(bindings.get("a@example.com"), Some("s2".to_string()));
        assert_eq!(bindings.len(), 1);

        assert_eq!(bindings.unbind("a@example.com"), Some("s2".to_string()));
        assert!(bindings.get("a@example.com").is_none());
    }

    #[tokio::test]
    async fn test_announce_found_member() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let directory = directory();
        let router = ScanRouter::new(hub.clone(), Arc::clone(&directory), Arc::default(), Arc::default());
        let mut sub = hub.register(["ada@example.com"]).await.unwrap();

        router.announce("ada@example.com", "sheet-1", &scan("AB12")).await.unwrap();

        assert_eq!(next_json(&mut sub).await["scanning"], true);
        let user = next_json(&mut sub).await;
        assert_eq!(user["bsID"], "bs-1");
        assert_eq!(user["name"], "Ada");
        assert_eq!(directory.visits("sheet-1").len(), 1);
        assert_eq!(router.stats.snapshot().lookups_succeeded, 1);
    }

    #[tokio::test]
    async fn test_announce_unknown_card_sends_error() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let router = ScanRouter::new(hub.clone(), directory(), Arc::default(), Arc::default());
        let mut sub = hub.register(["t"]).await.unwrap();

        router.announce("t", "sheet-1", &scan("ffff")).await.unwrap();

        assert_eq!(next_json(&mut sub).await["scanning"], true);
        let err = next_json(&mut sub).await;
        assert_eq!(err["error"], "user \"ffff\" was not found");
        assert_eq!(router.stats.snapshot().lookups_failed, 1);
    }

    #[tokio::test]
    async fn test_visit_failure_still_delivers_member() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let router = ScanRouter::new(hub.clone(), Arc::new(FlakyDirectory), Arc::default(), Arc::default());
        let mut sub = hub.register(["t"]).await.unwrap();

        router.announce("t", "any", &scan("c0ffee")).await.unwrap();

        assert_eq!(next_json(&mut sub).await["scanning"], true);
        assert_eq!(next_json(&mut sub).await["bsID"], "bs-9");
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_per_binding() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let bindings = Arc::new(SheetBindings::new());
        bindings.bind("a", "sheet-1");
        bindings.bind("b", "missing");
        let router = Arc::new(ScanRouter::new(hub.clone(), directory(), bindings, Arc::default()));

        let mut a = hub.register(["a"]).await.unwrap();
        let mut b = hub.register(["b"]).await.unwrap();

        assert_eq!(router.dispatch(scan("ab12")), 2);

        assert_eq!(next_json(&mut a).await["scanning"], true);
        assert_eq!(next_json(&mut a).await["bsID"], "bs-1");
        assert_eq!(next_json(&mut b).await["scanning"], true);
        assert!(next_json(&mut b).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_run_skips_claimed_scans() {
        let shutdown = CancellationToken::new();
        let (hub, _task) = Hub::spawn(HubConfig::default(), shutdown.clone());
        let bindings = Arc::new(SheetBindings::new());
        bindings.bind("t", "sheet-1");
        let router = Arc::new(ScanRouter::new(hub.clone(), directory(), bindings, Arc::default()));
        let arbiter = Arc::new(ScanArbiter::default());
        let mut sub = hub.register(["t"]).await.unwrap();

        let (mut writer, reader) = tokio::io::duplex(64);
        let feed = crate::scan::ScanSource::new(reader).spawn(shutdown.clone());
        let dispatcher = tokio::spawn(Arc::clone(&router).run(feed, Arc::clone(&arbiter), shutdown.clone()));

        let claimant = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.claim_next().await })
        };
        while !arbiter.is_claimed() {
            tokio::task::yield_now().await;
        }

        writer.write_all(b"NEW1\nab12\n").await.unwrap();
        drop(writer);

        assert_eq!(claimant.await.unwrap().unwrap().as_str(), "NEW1");

        // Only the second scan reaches the display
        assert_eq!(next_json(&mut sub).await["scanning"], true);
        assert_eq!(next_json(&mut sub).await["bsID"], "bs-1");

        assert!(matches!(dispatcher.await.unwrap(), FeedEnd::Exhausted));
    }
}
