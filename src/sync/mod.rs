//! Data sync manager: cached snapshot + periodic remote refresh.
//!
//! The manager owns the held [`Snapshot`]. At startup it is loaded from the
//! store ([`SyncManager::load_cached`]); each [`SyncManager::refresh`] queries
//! every configured endpoint concurrently, merges whatever succeeded onto the
//! held snapshot and commits the result only when the server reports a new
//! `lastUpdate`. A commit is persisted and handed to the render callback.
//!
//! Failures never reach the caller. They degrade to "keep the last known good
//! snapshot" and are reported on the [`SyncEventBus`].
//!
//! Refreshes may overlap (the scheduler does not wait for the previous one).
//! Each refresh takes a sequence number when it starts; a result older than
//! the last committed one is discarded.

pub mod events;
pub mod merge;
pub mod scheduler;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;

use crate::api::ApiClient;
use crate::config::{Config, EndpointConfig};
use crate::snapshot::Snapshot;
use crate::stats::{self, WalletReport};
use crate::store::SnapshotStore;

pub use events::{SyncEvent, SyncEventBus};

/// Callback invoked with every committed snapshot.
pub type RenderCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Refreshing,
}

/// Why a refresh did not produce a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoChangeReason {
    /// The server's `lastUpdate` matched the held one.
    Unchanged,
    /// No endpoint answered successfully.
    AllEndpointsFailed,
    /// A newer refresh had already committed.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(Snapshot),
    NoChange(NoChangeReason),
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated(_))
    }
}

struct Held {
    snapshot: Snapshot,
    /// Sequence number of the refresh that produced `snapshot` (0 = cache).
    committed_seq: u64,
}

/// Marks a refresh as in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyncManager {
    api: ApiClient,
    endpoints: Vec<EndpointConfig>,
    store: Arc<dyn SnapshotStore>,
    storage_key: String,
    held: Mutex<Held>,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
    /// Sequence number of the last rendered snapshot.
    rendered_seq: Mutex<Option<u64>>,
    render: Option<RenderCallback>,
    events: SyncEventBus,
}

impl SyncManager {
    /// Create a manager holding an empty snapshot. Call [`load_cached`] before
    /// the first refresh to start from the persisted state.
    ///
    /// [`load_cached`]: SyncManager::load_cached
    pub fn new(config: &Config, store: Arc<dyn SnapshotStore>) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Self {
            api: ApiClient::new(config)?,
            endpoints: config.endpoints.clone(),
            store,
            storage_key: config.storage_key.clone(),
            held: Mutex::new(Held {
                snapshot: Snapshot::default(),
                committed_seq: 0,
            }),
            next_seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            rendered_seq: Mutex::new(None),
            render: None,
            events: SyncEventBus::default(),
        })
    }

    /// Install the render callback.
    pub fn with_render<F>(mut self, render: F) -> Self
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.render = Some(Box::new(render));
        self
    }

    pub fn events(&self) -> &SyncEventBus {
        &self.events
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Current held snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.lock_held().snapshot.clone()
    }

    pub fn state(&self) -> SyncState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            SyncState::Refreshing
        } else {
            SyncState::Idle
        }
    }

    /// Sequence number of the refresh behind the held snapshot.
    pub fn committed_seq(&self) -> u64 {
        self.lock_held().committed_seq
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the persisted snapshot and make it the held one.
    ///
    /// Never fails: a missing value, an unreadable store or a corrupt blob
    /// all yield the empty snapshot.
    pub fn load_cached(&self) -> Snapshot {
        let snapshot = match self.store.read(&self.storage_key) {
            Ok(Some(raw)) => match Snapshot::from_json(&raw) {
                Ok(snapshot) => {
                    tracing::info!("Loaded {} items from cache", snapshot.items.len());
                    self.events.emit(SyncEvent::CacheLoaded {
                        items: snapshot.items.len(),
                    });
                    snapshot
                }
                Err(e) => {
                    tracing::warn!("Failed to parse cached snapshot: {} — starting empty", e);
                    self.events.emit(SyncEvent::CacheCorrupt {
                        error: e.to_string(),
                    });
                    Snapshot::default()
                }
            },
            Ok(None) => {
                tracing::info!("No cached snapshot found, starting empty");
                Snapshot::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read cached snapshot: {} — starting empty", e);
                self.events.emit(SyncEvent::CacheCorrupt {
                    error: e.to_string(),
                });
                Snapshot::default()
            }
        };

        self.lock_held().snapshot = snapshot.clone();
        snapshot
    }

    /// Serialize `snapshot` and write it to the store. Failures are logged and
    /// reported as [`SyncEvent::PersistFailed`].
    pub fn persist(&self, snapshot: &Snapshot) {
        let result = snapshot
            .to_json()
            .and_then(|json| self.store.write(&self.storage_key, &json));
        if let Err(e) = result {
            tracing::error!("Failed to persist snapshot: {}", e);
            self.events.emit(SyncEvent::PersistFailed {
                error: e.to_string(),
            });
        }
    }

    /// Query every endpoint and commit the merged snapshot if the server
    /// reports new data.
    pub async fn refresh(&self) -> RefreshOutcome {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight::enter(&self.in_flight);
        tracing::debug!(seq, "Refresh started");

        let results = join_all(self.endpoints.iter().map(|endpoint| self.api.fetch(endpoint))).await;

        let mut succeeded = 0;
        for (endpoint, result) in self.endpoints.iter().zip(&results) {
            match result {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(seq, endpoint = %endpoint.name, "Endpoint failed: {}", e);
                    self.events.emit(SyncEvent::EndpointFailed {
                        seq,
                        endpoint: endpoint.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        if succeeded == 0 {
            self.events.emit(SyncEvent::AllEndpointsFailed { seq });
            return RefreshOutcome::NoChange(NoChangeReason::AllEndpointsFailed);
        }

        let committed = {
            let mut held = self.lock_held();
            if seq < held.committed_seq {
                tracing::debug!(seq, committed = held.committed_seq, "Discarding stale refresh");
                self.events.emit(SyncEvent::StaleDiscarded {
                    seq,
                    committed: held.committed_seq,
                });
                return RefreshOutcome::NoChange(NoChangeReason::Stale);
            }

            let merged = merge::merge(&held.snapshot, &self.endpoints, &results);
            if !merge::has_changed(&held.snapshot, &merged) {
                tracing::debug!(seq, "No new data");
                self.events.emit(SyncEvent::Unchanged { seq });
                return RefreshOutcome::NoChange(NoChangeReason::Unchanged);
            }

            held.snapshot = merged.snapshot;
            held.committed_seq = seq;
            // Persisted under the lock: commits and writes happen in the same order.
            // `held` is a std mutex, so nothing below may `.await` while it is locked.
            self.persist(&held.snapshot);
            held.snapshot.clone()
        };

        tracing::info!(
            seq,
            "Snapshot updated from server ({} items)",
            committed.items.len()
        );
        self.events.emit(SyncEvent::Committed {
            seq,
            items: committed.items.len(),
        });
        self.notify_render(seq, &committed);
        RefreshOutcome::Updated(committed)
    }

    /// Render the held snapshot, e.g. right after [`load_cached`].
    ///
    /// [`load_cached`]: SyncManager::load_cached
    pub fn render_current(&self) {
        let (seq, snapshot) = {
            let held = self.lock_held();
            (held.committed_seq, held.snapshot.clone())
        };
        self.notify_render(seq, &snapshot);
    }

    fn notify_render(&self, seq: u64, snapshot: &Snapshot) {
        let Some(render) = &self.render else {
            return;
        };
        let mut rendered = self.rendered_seq.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*rendered, Some(last) if seq < last) {
            return;
        }
        render(snapshot);
        *rendered = Some(seq);
    }

    /// Look up a wallet in the held race history, falling back to the holders
    /// API. An unreachable holders API reads as "not found".
    pub async fn lookup_wallet(&self, address: &str) -> WalletReport {
        if let Some(summary) = stats::wallet_summary(&self.snapshot(), address) {
            return WalletReport::Winner(summary);
        }
        match self.api.check_wallet(address).await {
            Ok(true) => WalletReport::Holder,
            Ok(false) => WalletReport::NotFound,
            Err(e) => {
                tracing::debug!("Holder check unavailable: {}", e);
                WalletReport::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointKind;
    use crate::error::{Result, SyncError};
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "derbyPublicData";
    const CACHED: &str = r#"{"races":[{"id":1,"winner":"ABC","timestamp":"2024-01-01T00:00:00Z"}],"lastUpdate":"2024-01-01T00:00:00Z"}"#;

    struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        fn read(&self, _key: &str) -> Result<Option<String>> {
            Err(SyncError::Storage("unavailable".into()))
        }
        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(SyncError::Storage("read-only".into()))
        }
    }

    fn config_for(server: &MockServer) -> Config {
        Config {
            api_base_url: server.uri(),
            ..Config::default()
        }
    }

    fn combined_config(server: &MockServer) -> Config {
        Config {
            api_base_url: server.uri(),
            endpoints: vec![
                EndpointConfig {
                    name: "winners".into(),
                    kind: EndpointKind::Winners,
                    path: "/api/winners".into(),
                },
                EndpointConfig {
                    name: "holders".into(),
                    kind: EndpointKind::Holders,
                    path: "/api/holders".into(),
                },
                EndpointConfig {
                    name: "stats".into(),
                    kind: EndpointKind::Stats,
                    path: "/api/stats".into(),
                },
            ],
            ..Config::default()
        }
    }

    fn races_body(last_updated: &str, ids: &[u64]) -> serde_json::Value {
        let winners: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "winner": format!("W{}", id),
                    "timestamp": "2024-01-02T00:00:00Z"
                })
            })
            .collect();
        serde_json::json!({
            "success": true,
            "data": {
                "recentWinners": winners,
                "totalRaces": ids.len(),
                "totalPrizes": ids.len() as f64 * 0.005,
                "lastUpdated": last_updated
            }
        })
    }

    async fn mount_races(server: &MockServer, last_updated: &str, ids: &[u64]) {
        Mock::given(method("GET"))
            .and(path("/api/races"))
            .respond_with(ResponseTemplate::new(200).set_body_json(races_body(last_updated, ids)))
            .mount(server)
            .await;
    }

    fn counting_manager(
        config: &Config,
        store: Arc<MemoryStore>,
    ) -> (SyncManager, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let manager = SyncManager::new(config, store)
            .unwrap()
            .with_render(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        (manager, renders)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_load_cached_malformed_values() {
        let server = MockServer::start().await;
        for raw in [
            "",
            "{",
            "null",
            "\"text\"",
            r#"{"items": 5}"#,
            r#"{"races": [{"nope": true}]}"#,
            r#"{"lastUpdate": 12}"#,
        ] {
            let store = Arc::new(MemoryStore::with_entry(KEY, raw));
            let manager = SyncManager::new(&config_for(&server), store).unwrap();
            let mut rx = manager.events().subscribe();

            let snapshot = manager.load_cached();
            assert_eq!(snapshot, Snapshot::default(), "raw: {:?}", raw);
            assert!(
                matches!(rx.try_recv(), Ok(SyncEvent::CacheCorrupt { .. })),
                "raw: {:?}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_load_cached_missing_and_unreadable() {
        let server = MockServer::start().await;
        let manager =
            SyncManager::new(&config_for(&server), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(manager.load_cached(), Snapshot::default());

        let manager = SyncManager::new(&config_for(&server), Arc::new(BrokenStore)).unwrap();
        let mut rx = manager.events().subscribe();
        assert_eq!(manager.load_cached(), Snapshot::default());
        assert!(rx.try_recv().unwrap().is_failure());
    }

    #[tokio::test]
    async fn test_same_last_update_neither_persists_nor_renders() {
        let server = MockServer::start().await;
        mount_races(&server, "2024-01-01T00:00:00Z", &[1]).await;

        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let (manager, renders) = counting_manager(&config_for(&server), store.clone());
        let cached = manager.load_cached();
        assert_eq!(cached.items.len(), 1);

        let outcome = manager.refresh().await;
        assert_eq!(outcome, RefreshOutcome::NoChange(NoChangeReason::Unchanged));
        assert_eq!(store.writes(), 0);
        assert_eq!(renders.load(Ordering::SeqCst), 0);
        assert_eq!(manager.snapshot(), cached);
    }

    #[tokio::test]
    async fn test_advanced_last_update_commits_new_winners() {
        let server = MockServer::start().await;
        mount_races(&server, "2024-01-02T00:00:00Z", &[3, 2, 1]).await;

        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let (manager, renders) = counting_manager(&config_for(&server), store.clone());
        let before = manager.load_cached().items.len();

        let outcome = manager.refresh().await;
        let RefreshOutcome::Updated(snapshot) = outcome else {
            panic!("expected an update");
        };
        assert_eq!(snapshot.items.len(), before + 2);
        assert_eq!(snapshot.last_update.as_deref(), Some("2024-01-02T00:00:00Z"));
        assert_eq!(store.writes(), 1);
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        let persisted = store.read(KEY).unwrap().unwrap();
        assert_eq!(Snapshot::from_json(&persisted).unwrap(), snapshot);
        assert_eq!(manager.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_refresh_idempotent_under_no_change() {
        let server = MockServer::start().await;
        mount_races(&server, "2024-01-02T00:00:00Z", &[2, 1]).await;

        let store = Arc::new(MemoryStore::new());
        let (manager, renders) = counting_manager(&config_for(&server), store.clone());
        manager.load_cached();

        assert!(manager.refresh().await.is_updated());
        assert_eq!(
            manager.refresh().await,
            RefreshOutcome::NoChange(NoChangeReason::Unchanged)
        );
        assert_eq!(store.writes(), 1);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_endpoints_500_keeps_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let (manager, renders) = counting_manager(&combined_config(&server), store.clone());
        let mut rx = manager.events().subscribe();
        let cached = manager.load_cached();

        let outcome = manager.refresh().await;
        assert_eq!(
            outcome,
            RefreshOutcome::NoChange(NoChangeReason::AllEndpointsFailed)
        );
        assert_eq!(manager.snapshot(), cached);
        assert_eq!(store.writes(), 0);
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        let events = drain(&mut rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::EndpointFailed { .. }))
            .count();
        assert_eq!(failures, 3);
        assert!(events.contains(&SyncEvent::AllEndpointsFailed { seq: 1 }));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_held_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/winners"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/holders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [{"address": "H9", "balance": 9.0, "percentage": 90.0, "rank": 1}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {"totalHolders": 1, "lastUpdated": "2024-01-02T00:00:00Z"}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let (manager, _renders) = counting_manager(&combined_config(&server), store.clone());
        manager.load_cached();

        let RefreshOutcome::Updated(snapshot) = manager.refresh().await else {
            panic!("expected an update");
        };
        let wins: Vec<_> = snapshot.race_wins().collect();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].winner_address, "ABC");
        assert_eq!(snapshot.holders().count(), 1);
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_success_false_counts_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/races"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": false, "data": null})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let (manager, _) = counting_manager(&config_for(&server), store);
        assert_eq!(
            manager.refresh().await,
            RefreshOutcome::NoChange(NoChangeReason::AllEndpointsFailed)
        );
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_not_raised() {
        let server = MockServer::start().await;
        mount_races(&server, "2024-01-02T00:00:00Z", &[1]).await;

        let manager = SyncManager::new(&config_for(&server), Arc::new(BrokenStore)).unwrap();
        let mut rx = manager.events().subscribe();
        manager.load_cached();

        assert!(manager.refresh().await.is_updated());
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::PersistFailed { .. })));
        assert_eq!(manager.snapshot().items.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_response_does_not_clobber_fresher_data() {
        let server = MockServer::start().await;
        // First request: old data, answered slowly.
        Mock::given(method("GET"))
            .and(path("/api/races"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(races_body("2024-01-02T00:00:00Z", &[1]))
                    .set_delay(Duration::from_millis(500)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Every later request: newer data, answered at once.
        mount_races(&server, "2024-01-03T00:00:00Z", &[2, 1]).await;

        let store = Arc::new(MemoryStore::new());
        let (manager, renders) = counting_manager(&config_for(&server), store.clone());
        let manager = Arc::new(manager);
        manager.load_cached();

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), SyncState::Refreshing);

        let fast = manager.refresh().await;
        assert!(fast.is_updated());
        assert_eq!(manager.committed_seq(), 2);

        let slow = slow.await.unwrap();
        assert_eq!(slow, RefreshOutcome::NoChange(NoChangeReason::Stale));
        assert_eq!(manager.state(), SyncState::Idle);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.last_update.as_deref(), Some("2024-01-03T00:00:00Z"));
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(store.writes(), 1);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_render_current_after_load() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let (manager, renders) = counting_manager(&config_for(&server), store);
        manager.load_cached();
        manager.render_current();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_lookup_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/check-wallet/H1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"isHolder": true})),
            )
            .mount(&server)
            .await;

        let config = Config {
            api_base_url: server.uri(),
            holders_api_url: Some(format!("{}/api", server.uri())),
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::with_entry(KEY, CACHED));
        let manager = SyncManager::new(&config, store).unwrap();
        manager.load_cached();

        assert!(matches!(
            manager.lookup_wallet("abc").await,
            WalletReport::Winner(summary) if summary.races_won == 1
        ));
        assert_eq!(manager.lookup_wallet("H1").await, WalletReport::Holder);
        // Unmatched paths answer 404.
        assert_eq!(manager.lookup_wallet("H2").await, WalletReport::NotFound);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Config {
            endpoints: vec![],
            ..Config::default()
        };
        assert!(SyncManager::new(&config, Arc::new(MemoryStore::new())).is_err());
    }
}
