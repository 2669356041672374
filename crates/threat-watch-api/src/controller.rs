use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use threat_watch_core::{score, KeywordConfig, ScoreResult};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::gateway::PersistenceGateway;
use crate::monitor::{BatchProcessor, CycleReport, KeywordHandle, MonitorLoop, MonitorSettings};
use crate::source::{CredentialSet, SourceConnector};
use crate::MonitorError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorStatus {
    pub running: bool,
    pub keyword_count: usize,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReport {
    pub keyword_count: usize,
}

struct ActiveLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct MonitoringState {
    active: Option<ActiveLoop>,
    draining: Vec<JoinHandle<()>>,
}

/// Start/stop state machine owning at most one [`MonitorLoop`] task.
pub struct MonitorController {
    gateway: Arc<dyn PersistenceGateway>,
    connector: Arc<dyn SourceConnector>,
    credentials: CredentialSet,
    settings: MonitorSettings,
    processor: Arc<BatchProcessor>,
    keywords: KeywordHandle,
    state: Mutex<MonitoringState>,
    last_cycle: Arc<Mutex<Option<CycleReport>>>,
}

impl MonitorController {
    /// Build a stopped controller and load the initial keyword snapshot.
    ///
    /// When the persisted rules cannot be loaded the built-in fallback set is used.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        connector: Arc<dyn SourceConnector>,
        credentials: CredentialSet,
        settings: MonitorSettings,
    ) -> Self {
        let initial = match load_keyword_config(gateway.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load keyword rules; using built-in defaults");
                KeywordConfig::fallback()
            }
        };
        tracing::info!(keyword_count = initial.len(), "keyword snapshot loaded");

        Self {
            processor: Arc::new(BatchProcessor::new(Arc::clone(&gateway))),
            gateway,
            connector,
            credentials,
            settings,
            keywords: KeywordHandle::new(initial),
            state: Mutex::new(MonitoringState::default()),
            last_cycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the monitoring loop on the current tokio runtime.
    ///
    /// # Errors
    /// Returns [`MonitorError::Config`] when credentials are incomplete, and
    /// [`MonitorError::SourceSetup`] or [`MonitorError::Runtime`] when the loop cannot be
    /// spawned. Nothing is started on error.
    pub fn start(&self) -> Result<StartOutcome, MonitorError> {
        let mut state = self.state.lock();
        if state.active.is_some() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let credentials = self.credentials.complete()?;
        let runtime = Handle::try_current()
            .map_err(|err| MonitorError::Runtime(format!("no tokio runtime available: {err}")))?;
        let source = self.connector.connect(&credentials)?;

        state.draining.retain(|task| !task.is_finished());
        if !state.draining.is_empty() {
            tracing::debug!(
                draining = state.draining.len(),
                "previous monitoring loop still finishing its cycle"
            );
        }

        let cancel = CancellationToken::new();
        let monitor = MonitorLoop::new(
            source,
            Arc::clone(&self.processor),
            self.keywords.clone(),
            self.settings,
            cancel.clone(),
            Arc::clone(&self.last_cycle),
        );
        let task = runtime.spawn(monitor.run());
        state.active = Some(ActiveLoop { cancel, task });

        tracing::info!("monitoring started");
        Ok(StartOutcome::Started)
    }

    /// Request the loop to stop. The task observes the request between cycles; a fetch or
    /// batch already in flight finishes first.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.state.lock();
        let Some(active) = state.active.take() else {
            return StopOutcome::AlreadyStopped;
        };

        active.cancel.cancel();
        state.draining.push(active.task);
        tracing::info!("monitoring stop requested");
        StopOutcome::Stopped
    }

    /// Stop the loop and wait for it, and any loop still draining, to finish.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut state = self.state.lock();
            let mut tasks = Vec::new();
            if let Some(active) = state.active.take() {
                active.cancel.cancel();
                tasks.push(active.task);
            }
            tasks.append(&mut state.draining);
            tasks
        };

        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "monitoring loop ended abnormally");
                }
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().active.is_some()
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.is_running(),
            keyword_count: self.keywords.snapshot().len(),
            last_cycle: self.last_cycle.lock().clone(),
        }
    }

    /// Replace the keyword snapshot with the currently active persisted rules.
    ///
    /// # Errors
    /// Returns an error when the rules cannot be loaded or are invalid; the previous
    /// snapshot stays in place.
    pub fn reload_keywords(&self) -> Result<ReloadReport, MonitorError> {
        let config = load_keyword_config(self.gateway.as_ref()).inspect_err(|err| {
            tracing::warn!(error = %err, "keyword reload failed; keeping previous snapshot");
        })?;

        let keyword_count = config.len();
        self.keywords.install(config);
        tracing::info!(keyword_count, "keyword snapshot reloaded");
        Ok(ReloadReport { keyword_count })
    }

    #[must_use]
    pub fn keywords(&self) -> Arc<KeywordConfig> {
        self.keywords.snapshot()
    }

    /// Score `text` against the current snapshot without persisting anything.
    #[must_use]
    pub fn score_text(&self, text: &str) -> ScoreResult {
        score(text, &self.keywords.snapshot())
    }
}

fn load_keyword_config(gateway: &dyn PersistenceGateway) -> Result<KeywordConfig, MonitorError> {
    let rules = gateway.load_active_keywords()?;
    Ok(KeywordConfig::new(rules)?)
}
