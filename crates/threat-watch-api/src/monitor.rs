use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use threat_watch_core::{KeywordConfig, ObservedPost, ScoredItem};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertManager;
use crate::gateway::PersistenceGateway;
use crate::source::{ItemSource, SearchQuery, MAX_MAX_RESULTS, MIN_MAX_RESULTS};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(120);

/// Shared slot holding the active keyword snapshot.
#[derive(Clone)]
pub struct KeywordHandle {
    current: Arc<RwLock<Arc<KeywordConfig>>>,
}

impl KeywordHandle {
    #[must_use]
    pub fn new(config: KeywordConfig) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(config))) }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<KeywordConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn install(&self, config: KeywordConfig) {
        *self.current.write() = Arc::new(config);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_results: u32,
}

impl MonitorSettings {
    #[must_use]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(MIN_MAX_RESULTS, MAX_MAX_RESULTS);
        self
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_results: MAX_MAX_RESULTS,
        }
    }
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub persisted: usize,
    pub failed: usize,
    pub alerts: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Processed(CycleReport),
    NoKeywords,
    FetchFailed,
    BatchAborted,
    Cancelled,
}

/// Scores, persists and alerts one batch. Runs synchronously.
pub struct BatchProcessor {
    gateway: Arc<dyn PersistenceGateway>,
    alerts: AlertManager,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        let alerts = AlertManager::new(Arc::clone(&gateway));
        Self { gateway, alerts }
    }

    #[must_use]
    pub fn process(&self, posts: Vec<ObservedPost>, config: &KeywordConfig) -> CycleReport {
        let fetched = posts.len();
        let mut persisted = 0;
        let mut failed = 0;
        let mut alerts = 0;

        for post in posts {
            let item = ScoredItem::from_post(post, config);
            if let Err(err) = self.gateway.upsert(&item) {
                tracing::warn!(item_id = %item.id, error = %err, "failed to persist scored item; skipping");
                failed += 1;
                continue;
            }
            persisted += 1;

            if self.alerts.maybe_alert(&item).is_some() {
                alerts += 1;
            }
        }

        CycleReport { fetched, persisted, failed, alerts, completed_at: OffsetDateTime::now_utc() }
    }
}

/// One background polling task. Owned by the task it runs in.
pub struct MonitorLoop {
    source: Arc<dyn ItemSource>,
    processor: Arc<BatchProcessor>,
    keywords: KeywordHandle,
    settings: MonitorSettings,
    cancel: CancellationToken,
    last_cycle: Arc<Mutex<Option<CycleReport>>>,
}

impl MonitorLoop {
    #[must_use]
    pub fn new(
        source: Arc<dyn ItemSource>,
        processor: Arc<BatchProcessor>,
        keywords: KeywordHandle,
        settings: MonitorSettings,
        cancel: CancellationToken,
        last_cycle: Arc<Mutex<Option<CycleReport>>>,
    ) -> Self {
        Self { source, processor, keywords, settings, cancel, last_cycle }
    }

    /// Poll until cancelled. Fetch failures back off and retry; nothing here ends the loop
    /// except cancellation.
    pub async fn run(self) {
        tracing::info!(
            source = self.source.name(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "monitoring loop started"
        );

        while !self.cancel.is_cancelled() {
            let delay = match self.run_cycle().await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::FetchFailed | CycleOutcome::BatchAborted => self.settings.error_backoff,
                CycleOutcome::Processed(_) | CycleOutcome::NoKeywords => self.settings.poll_interval,
            };

            if !self.sleep_or_cancelled(delay).await {
                break;
            }
        }

        tracing::info!(source = self.source.name(), "monitoring loop stopped");
    }

    /// Run one fetch-and-process cycle against the current keyword snapshot.
    ///
    /// A fetch already in flight runs to completion; a stop requested meanwhile drops
    /// its batch.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let config = self.keywords.snapshot();
        let Some(query) = SearchQuery::from_config(&config, self.settings.max_results) else {
            tracing::warn!("no active keywords configured; skipping fetch");
            return CycleOutcome::NoKeywords;
        };

        let posts = match self.source.fetch_recent(&query).await {
            Ok(posts) => posts,
            Err(err) => {
                tracing::warn!(
                    source = self.source.name(),
                    error = %err,
                    backoff_secs = self.settings.error_backoff.as_secs(),
                    "fetch failed; backing off"
                );
                return CycleOutcome::FetchFailed;
            }
        };

        if self.cancel.is_cancelled() {
            tracing::debug!(dropped = posts.len(), "stop requested; dropping fetched batch");
            return CycleOutcome::Cancelled;
        }

        let processor = Arc::clone(&self.processor);
        let report =
            match tokio::task::spawn_blocking(move || processor.process(posts, &config)).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(error = %err, "batch processing task aborted");
                    return CycleOutcome::BatchAborted;
                }
            };

        tracing::info!(
            fetched = report.fetched,
            persisted = report.persisted,
            failed = report.failed,
            alerts = report.alerts,
            "monitoring cycle complete"
        );
        *self.last_cycle.lock() = Some(report.clone());
        CycleOutcome::Processed(report)
    }

    async fn sleep_or_cancelled(&self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.cancel.cancelled() => false,
        }
    }
}
