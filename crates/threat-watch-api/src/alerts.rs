use std::sync::Arc;

use threat_watch_core::{Alert, ScoredItem};
use time::OffsetDateTime;

use crate::gateway::{PersistenceError, PersistenceGateway};

/// Records at most one alert per `(item, threat level)`.
#[derive(Clone)]
pub struct AlertManager {
    gateway: Arc<dyn PersistenceGateway>,
}

impl AlertManager {
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    #[must_use]
    pub fn maybe_alert(&self, item: &ScoredItem) -> Option<Alert> {
        self.maybe_alert_at(item, OffsetDateTime::now_utc())
    }

    /// Record an alert for `item` when its threat level warrants one.
    ///
    /// Returns the recorded alert, or `None` when the item is `low`, the alert exists
    /// already, or the write failed. Failures never propagate to the caller.
    #[must_use]
    pub fn maybe_alert_at(&self, item: &ScoredItem, now: OffsetDateTime) -> Option<Alert> {
        let alert = Alert::for_item(item, now)?;

        match self.gateway.record_alert(&alert) {
            Ok(()) => {
                tracing::info!(
                    alert_id = %alert.alert_id,
                    item_id = %alert.item_id,
                    threat_level = %alert.threat_level,
                    final_score = alert.final_score,
                    "threat alert recorded"
                );
                Some(alert)
            }
            Err(PersistenceError::DuplicateAlert { alert_id }) => {
                tracing::debug!(%alert_id, item_id = %item.id, "alert already recorded");
                None
            }
            Err(err) => {
                tracing::warn!(item_id = %item.id, error = %err, "failed to record alert");
                None
            }
        }
    }
}
