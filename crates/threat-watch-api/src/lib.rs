use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use threat_watch_core::{CoreError, KeywordConfig, KeywordRule, ScoreResult, UpsertOutcome};
use threat_watch_store_sqlite::{ActiveAlertView, DashboardSnapshot, StoredKeywordRule};
use time::OffsetDateTime;

pub mod alerts;
pub mod controller;
pub mod gateway;
pub mod monitor;
pub mod source;

#[cfg(test)]
mod testing;

pub use alerts::AlertManager;
pub use controller::{MonitorController, MonitorStatus, ReloadReport, StartOutcome, StopOutcome};
pub use gateway::{PersistenceError, PersistenceGateway, SqliteGateway};
pub use monitor::{CycleReport, MonitorSettings};
pub use source::{CredentialSet, RecentSearchConnector, RecentSearchSettings, SourceFetchError};

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const DEFAULT_ALERT_LIMIT: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("source setup failed: {0}")]
    SourceSetup(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("runtime unavailable: {0}")]
    Runtime(String),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub db_path: PathBuf,
    pub credentials: CredentialSet,
    pub monitor: MonitorSettings,
    pub source: RecentSearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordUpdateRequest {
    pub keyword: String,
    pub category: String,
    pub weight: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordUpdate {
    pub keyword: String,
    pub outcome: UpsertOutcome,
    pub keyword_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardView {
    pub monitoring_active: bool,
    #[serde(flatten)]
    pub snapshot: DashboardSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveResult {
    pub alert_id: String,
    pub resolved: bool,
}

/// Operator-facing facade: monitoring control plus the read and keyword operations
/// that share its database.
pub struct ThreatWatchApi {
    gateway: Arc<SqliteGateway>,
    controller: MonitorController,
}

impl ThreatWatchApi {
    /// Open the database, load keywords and build a stopped controller.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open(config: ApiConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(SqliteGateway::open(&config.db_path)?);
        let connector = Arc::new(RecentSearchConnector::new(config.source));
        Ok(Self::with_parts(gateway, connector, config.credentials, config.monitor))
    }

    #[must_use]
    pub fn with_parts(
        gateway: Arc<SqliteGateway>,
        connector: Arc<dyn source::SourceConnector>,
        credentials: CredentialSet,
        settings: MonitorSettings,
    ) -> Self {
        let controller = MonitorController::new(gateway.clone(), connector, credentials, settings);
        Self { gateway, controller }
    }

    #[must_use]
    pub fn controller(&self) -> &MonitorController {
        &self.controller
    }

    /// # Errors
    /// Returns [`MonitorError::Config`] when source credentials are incomplete.
    pub fn start_monitoring(&self) -> Result<StartOutcome, MonitorError> {
        self.controller.start()
    }

    #[must_use]
    pub fn stop_monitoring(&self) -> StopOutcome {
        self.controller.stop()
    }

    #[must_use]
    pub fn monitoring_status(&self) -> MonitorStatus {
        self.controller.status()
    }

    /// # Errors
    /// Returns an error when persisted rules cannot be loaded or are invalid.
    pub fn reload_keywords(&self) -> Result<ReloadReport, MonitorError> {
        self.controller.reload_keywords()
    }

    /// # Errors
    /// Returns an error when the rules cannot be read.
    pub fn list_keywords(&self) -> Result<Vec<StoredKeywordRule>, MonitorError> {
        Ok(self.gateway.with_store(|store| store.list_keywords())?)
    }

    /// Persist one keyword rule, then reload the active snapshot.
    ///
    /// # Errors
    /// Returns [`MonitorError::Core`] for an invalid rule and a persistence error when the
    /// write or reload fails.
    pub fn upsert_keyword(&self, request: KeywordUpdateRequest) -> Result<KeywordUpdate, MonitorError> {
        let rule = KeywordRule::new(request.keyword, request.category, request.weight).normalized()?;
        let outcome = self.gateway.with_store(|store| {
            store.upsert_keyword(&rule, request.active, OffsetDateTime::now_utc())
        })?;
        tracing::info!(keyword = %rule.keyword, outcome = outcome.as_str(), "keyword rule saved");

        let reload = self.controller.reload_keywords()?;
        Ok(KeywordUpdate { keyword: rule.keyword, outcome, keyword_count: reload.keyword_count })
    }

    /// # Errors
    /// Returns an error when any aggregate query fails.
    pub fn dashboard(&self) -> Result<DashboardView, MonitorError> {
        let snapshot = self.gateway.with_store(|store| store.dashboard(OffsetDateTime::now_utc()))?;
        Ok(DashboardView { monitoring_active: self.controller.is_running(), snapshot })
    }

    /// # Errors
    /// Returns an error when alerts cannot be read.
    pub fn active_alerts(&self, limit: Option<u32>) -> Result<Vec<ActiveAlertView>, MonitorError> {
        let limit = limit.unwrap_or(DEFAULT_ALERT_LIMIT);
        Ok(self.gateway.with_store(|store| store.list_active_alerts(limit))?)
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<ResolveResult, MonitorError> {
        let resolved = self
            .gateway
            .with_store(|store| store.resolve_alert(alert_id, OffsetDateTime::now_utc()))?;
        if resolved {
            tracing::info!(%alert_id, "alert resolved");
        }
        Ok(ResolveResult { alert_id: alert_id.to_string(), resolved })
    }

    #[must_use]
    pub fn score_text(&self, text: &str) -> ScoreResult {
        self.controller.score_text(text)
    }

    #[must_use]
    pub fn keywords(&self) -> Arc<KeywordConfig> {
        self.controller.keywords()
    }

    /// Stop monitoring and wait for the loop task to exit.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }
}
