use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use threat_watch_api::{
    ApiConfig, CredentialSet, DashboardView, KeywordUpdate, KeywordUpdateRequest, MonitorError,
    MonitorSettings, MonitorStatus, RecentSearchSettings, ReloadReport, ResolveResult,
    StartOutcome, StopOutcome, ThreatWatchApi, API_CONTRACT_VERSION,
};
use threat_watch_core::ScoreResult;
use threat_watch_store_sqlite::{ActiveAlertView, StoredKeywordRule};

mod logging;

use logging::{LogFormat, LogLevel};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Clone)]
struct ServiceState {
    api: Arc<ThreatWatchApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct StartResponse {
    outcome: StartOutcome,
}

#[derive(Debug, Clone, Serialize)]
struct StopResponse {
    outcome: StopOutcome,
}

#[derive(Debug, Clone, Deserialize)]
struct AlertsQuery {
    limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoreRequest {
    text: String,
}

#[derive(Debug, Parser)]
#[command(name = "threat-watch-service")]
#[command(about = "HTTP control surface for the threat-watch monitor")]
struct Args {
    #[arg(long, env = "TW_DB", default_value = "./threat_watch.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "TW_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "TW_POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,
    #[arg(long, env = "TW_ERROR_BACKOFF_SECS", default_value_t = 120)]
    error_backoff_secs: u64,
    #[arg(long, env = "TW_MAX_RESULTS", default_value_t = 100)]
    max_results: u32,
    #[arg(long, env = "TW_SEARCH_BASE_URL", default_value = threat_watch_api::source::DEFAULT_SEARCH_BASE_URL)]
    search_base_url: String,
    #[arg(long, env = "TW_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
    #[arg(long, env = "TW_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[arg(long, env = "TW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Start monitoring as soon as the service is up.
    #[arg(long, env = "TW_AUTOSTART")]
    autostart: bool,
    #[arg(long, env = "TWITTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "TWITTER_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    #[arg(long, env = "TWITTER_ACCESS_TOKEN_SECRET", hide_env_values = true)]
    access_token_secret: Option<String>,
    #[arg(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,
}

impl Args {
    fn api_config(&self) -> ApiConfig {
        ApiConfig {
            db_path: self.db.clone(),
            credentials: CredentialSet {
                api_key: self.api_key.clone(),
                api_secret: self.api_secret.clone(),
                access_token: self.access_token.clone(),
                access_token_secret: self.access_token_secret.clone(),
                bearer_token: self.bearer_token.clone(),
            },
            monitor: MonitorSettings {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                error_backoff: Duration::from_secs(self.error_backoff_secs),
                ..MonitorSettings::default()
            }
            .with_max_results(self.max_results),
            source: RecentSearchSettings {
                base_url: self.search_base_url.clone(),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

impl From<MonitorError> for ServiceError {
    fn from(err: MonitorError) -> Self {
        let status = match err {
            MonitorError::Config(_) | MonitorError::Core(_) => StatusCode::BAD_REQUEST,
            MonitorError::SourceSetup(_)
            | MonitorError::Persistence(_)
            | MonitorError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        ServiceState::error(status, err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/monitoring/start", post(monitoring_start))
        .route("/v1/monitoring/stop", post(monitoring_stop))
        .route("/v1/monitoring/status", get(monitoring_status))
        .route("/v1/keywords", get(keywords_list).post(keywords_upsert))
        .route("/v1/keywords/reload", post(keywords_reload))
        .route("/v1/dashboard", get(dashboard))
        .route("/v1/alerts", get(alerts_list))
        .route("/v1/alerts/:alert_id/resolve", post(alerts_resolve))
        .route("/v1/score", post(score_text))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_level, args.log_format)?;

    let api = Arc::new(ThreatWatchApi::open(args.api_config())?);
    if args.autostart {
        match api.start_monitoring() {
            Ok(outcome) => tracing::info!(?outcome, "autostart"),
            Err(err) => tracing::warn!(error = %err, "autostart failed; monitoring stays stopped"),
        }
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "threat-watch service listening");
    axum::serve(listener, app(ServiceState { api: Arc::clone(&api) }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    api.shutdown().await;
    tracing::info!("threat-watch service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn monitoring_start(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<StartResponse>>, ServiceError> {
    let outcome = state.api.start_monitoring()?;
    Ok(Json(envelope(StartResponse { outcome })))
}

async fn monitoring_stop(State(state): State<ServiceState>) -> Json<ServiceEnvelope<StopResponse>> {
    Json(envelope(StopResponse { outcome: state.api.stop_monitoring() }))
}

async fn monitoring_status(State(state): State<ServiceState>) -> Json<ServiceEnvelope<MonitorStatus>> {
    Json(envelope(state.api.monitoring_status()))
}

async fn keywords_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<StoredKeywordRule>>>, ServiceError> {
    Ok(Json(envelope(state.api.list_keywords()?)))
}

async fn keywords_upsert(
    State(state): State<ServiceState>,
    Json(request): Json<KeywordUpdateRequest>,
) -> Result<Json<ServiceEnvelope<KeywordUpdate>>, ServiceError> {
    Ok(Json(envelope(state.api.upsert_keyword(request)?)))
}

async fn keywords_reload(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ReloadReport>>, ServiceError> {
    Ok(Json(envelope(state.api.reload_keywords()?)))
}

async fn dashboard(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<DashboardView>>, ServiceError> {
    Ok(Json(envelope(state.api.dashboard()?)))
}

async fn alerts_list(
    State(state): State<ServiceState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<ServiceEnvelope<Vec<ActiveAlertView>>>, ServiceError> {
    Ok(Json(envelope(state.api.active_alerts(query.limit)?)))
}

async fn alerts_resolve(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
) -> Result<Json<ServiceEnvelope<ResolveResult>>, ServiceError> {
    let result = state.api.resolve_alert(&alert_id)?;
    if !result.resolved {
        return Err(ServiceState::error(StatusCode::NOT_FOUND, format!("alert {alert_id} not found")));
    }
    Ok(Json(envelope(result)))
}

async fn score_text(
    State(state): State<ServiceState>,
    Json(request): Json<ScoreRequest>,
) -> Json<ServiceEnvelope<ScoreResult>> {
    Json(envelope(state.api.score_text(&request.text)))
}
