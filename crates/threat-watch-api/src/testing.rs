use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use threat_watch_core::{
    classify_engagement, Alert, EngagementMetrics, KeywordRule, ObservedPost, ScoredItem,
    UpsertOutcome,
};
use time::macros::datetime;
use tokio::sync::Notify;

use crate::gateway::{PersistenceError, PersistenceGateway};
use crate::source::{
    CredentialSet, FetchFuture, ItemSource, SearchQuery, SourceConnector, SourceCredentials,
    SourceFetchError,
};
use crate::MonitorError;

pub(crate) fn post(id: &str, text: &str) -> ObservedPost {
    ObservedPost {
        id: id.to_string(),
        text: text.to_string(),
        author_id: format!("author-{id}"),
        created_at: datetime!(2026-10-01 12:00:00 UTC),
        metrics: EngagementMetrics::default(),
        text_malformed: false,
    }
}

pub(crate) fn credentials() -> CredentialSet {
    CredentialSet {
        api_key: Some("key".to_string()),
        api_secret: Some("secret".to_string()),
        access_token: Some("token".to_string()),
        access_token_secret: Some("token-secret".to_string()),
        bearer_token: Some("bearer".to_string()),
    }
}

/// In-memory gateway with the same upsert semantics as the `SQLite` store.
#[derive(Default)]
pub(crate) struct MemoryGateway {
    items: Mutex<BTreeMap<String, ScoredItem>>,
    alerts: Mutex<BTreeMap<String, Alert>>,
    keywords: Mutex<Vec<KeywordRule>>,
    failing_items: Mutex<BTreeSet<String>>,
    fail_alerts: Mutex<bool>,
    fail_keywords: Mutex<bool>,
}

impl MemoryGateway {
    pub(crate) fn with_keywords(rules: Vec<KeywordRule>) -> Self {
        let gateway = Self::default();
        *gateway.keywords.lock() = rules;
        gateway
    }

    pub(crate) fn set_keywords(&self, rules: Vec<KeywordRule>) {
        *self.keywords.lock() = rules;
    }

    pub(crate) fn fail_item(&self, item_id: &str) {
        self.failing_items.lock().insert(item_id.to_string());
    }

    pub(crate) fn fail_alerts(&self) {
        *self.fail_alerts.lock() = true;
    }

    pub(crate) fn fail_keywords(&self) {
        *self.fail_keywords.lock() = true;
    }

    pub(crate) fn item(&self, item_id: &str) -> Option<ScoredItem> {
        self.items.lock().get(item_id).cloned()
    }

    pub(crate) fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().values().cloned().collect()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn upsert(&self, item: &ScoredItem) -> Result<UpsertOutcome, PersistenceError> {
        if self.failing_items.lock().contains(&item.id) {
            return Err(PersistenceError::Storage(format!("forced failure for {}", item.id)));
        }

        let mut items = self.items.lock();
        if let Some(existing) = items.get_mut(&item.id) {
            existing.metrics = item.metrics;
            existing.engagement_level = classify_engagement(&item.metrics);
            return Ok(UpsertOutcome::Updated);
        }
        items.insert(item.id.clone(), item.clone());
        Ok(UpsertOutcome::Inserted)
    }

    fn record_alert(&self, alert: &Alert) -> Result<(), PersistenceError> {
        if *self.fail_alerts.lock() {
            return Err(PersistenceError::Storage("alerts table unavailable".to_string()));
        }

        let mut alerts = self.alerts.lock();
        if alerts.contains_key(&alert.alert_id) {
            return Err(PersistenceError::DuplicateAlert { alert_id: alert.alert_id.clone() });
        }
        alerts.insert(alert.alert_id.clone(), alert.clone());
        Ok(())
    }

    fn load_active_keywords(&self) -> Result<Vec<KeywordRule>, PersistenceError> {
        if *self.fail_keywords.lock() {
            return Err(PersistenceError::Storage("keyword table unavailable".to_string()));
        }
        Ok(self.keywords.lock().clone())
    }
}

/// Source that replays scripted batches, then returns empty batches. Once held, each
/// fetch waits for [`ScriptedSource::release_fetch`] before returning.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    batches: Mutex<VecDeque<Result<Vec<ObservedPost>, SourceFetchError>>>,
    queries: Mutex<Vec<SearchQuery>>,
    fetches: AtomicUsize,
    completed: AtomicUsize,
    held: AtomicBool,
    started: Notify,
    released: Notify,
}

impl ScriptedSource {
    pub(crate) fn push(&self, batch: Result<Vec<ObservedPost>, SourceFetchError>) {
        self.batches.lock().push_back(batch);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().clone()
    }

    pub(crate) fn hold_fetches(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Resolves once a fetch has taken its batch.
    pub(crate) async fn fetch_started(&self) {
        self.started.notified().await;
    }

    pub(crate) fn release_fetch(&self) {
        self.released.notify_one();
    }

    pub(crate) fn completed_fetches(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl ItemSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_recent<'a>(&'a self, query: &'a SearchQuery) -> FetchFuture<'a> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().push(query.clone());
            let next = self.batches.lock().pop_front();
            self.started.notify_one();
            if self.held.load(Ordering::SeqCst) {
                self.released.notified().await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            next.unwrap_or_else(|| Ok(Vec::new()))
        })
    }
}

/// Connector handing out one shared [`ScriptedSource`].
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    pub(crate) source: Arc<ScriptedSource>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SourceConnector for ScriptedConnector {
    fn connect(&self, _credentials: &SourceCredentials) -> Result<Arc<dyn ItemSource>, MonitorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.source.clone())
    }
}
