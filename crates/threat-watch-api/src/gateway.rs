use std::path::Path;

use anyhow::Context;
use parking_lot::Mutex;
use threat_watch_core::{Alert, KeywordRule, ScoredItem, UpsertOutcome};
use threat_watch_store_sqlite::{AlertWrite, SqliteStore};
use time::OffsetDateTime;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("alert {alert_id} is already recorded")]
    DuplicateAlert { alert_id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for PersistenceError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Write side of the monitoring pipeline.
///
/// Implementations are synchronous; the monitor calls them from a blocking section.
pub trait PersistenceGateway: Send + Sync {
    /// Insert a scored item, or refresh only its volatile engagement fields.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Storage`] when the write fails.
    fn upsert(&self, item: &ScoredItem) -> Result<UpsertOutcome, PersistenceError>;

    /// Insert an alert.
    ///
    /// # Errors
    /// Returns [`PersistenceError::DuplicateAlert`] when the alert id exists already.
    fn record_alert(&self, alert: &Alert) -> Result<(), PersistenceError>;

    /// Active keyword rules ordered by weight descending, then keyword ascending.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Storage`] when the rules cannot be read.
    fn load_active_keywords(&self) -> Result<Vec<KeywordRule>, PersistenceError>;
}

/// [`PersistenceGateway`] over one serialized `SQLite` connection.
pub struct SqliteGateway {
    store: Mutex<SqliteStore>,
}

impl SqliteGateway {
    /// Open the database at `path` and apply pending migrations.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut store = SqliteStore::open(path)?;
        store
            .migrate()
            .with_context(|| format!("failed to migrate database at {}", path.display()))?;
        Ok(Self::from_store(store))
    }

    #[must_use]
    pub fn from_store(store: SqliteStore) -> Self {
        Self { store: Mutex::new(store) }
    }

    /// Run `op` with exclusive access to the store.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Storage`] wrapping any error raised by `op`.
    pub fn with_store<T>(
        &self,
        op: impl FnOnce(&mut SqliteStore) -> anyhow::Result<T>,
    ) -> Result<T, PersistenceError> {
        let mut store = self.store.lock();
        op(&mut store).map_err(PersistenceError::from)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn upsert(&self, item: &ScoredItem) -> Result<UpsertOutcome, PersistenceError> {
        self.with_store(|store| store.upsert_item(item, OffsetDateTime::now_utc()))
    }

    fn record_alert(&self, alert: &Alert) -> Result<(), PersistenceError> {
        match self.with_store(|store| store.record_alert(alert))? {
            AlertWrite::Recorded => Ok(()),
            AlertWrite::Duplicate => {
                Err(PersistenceError::DuplicateAlert { alert_id: alert.alert_id.clone() })
            }
        }
    }

    fn load_active_keywords(&self) -> Result<Vec<KeywordRule>, PersistenceError> {
        self.with_store(|store| store.load_active_keywords())
    }
}
