use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, StatusCode};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use threat_watch_core::{EngagementMetrics, KeywordConfig, ObservedPost};
use time::OffsetDateTime;

use crate::MonitorError;

pub const DEFAULT_SEARCH_BASE_URL: &str = "https://api.twitter.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MIN_MAX_RESULTS: u32 = 10;
pub const MAX_MAX_RESULTS: u32 = 100;

const RECENT_SEARCH_PATH: &str = "/2/tweets/search/recent";
const TWEET_FIELDS: &str = "created_at,author_id,public_metrics";
const USER_AGENT: &str = concat!("threat-watch/", env!("CARGO_PKG_VERSION"));

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ObservedPost>, SourceFetchError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceFetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("authentication failed")]
    AuthFailed,
    #[error("rate limited by source")]
    RateLimited,
    #[error("source returned HTTP {status}")]
    Api { status: u16 },
    #[error("failed to decode source response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceFetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One recent-search request: an OR-expression of quoted keyword phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub expression: String,
    pub max_results: u32,
}

impl SearchQuery {
    /// Build the query for a keyword snapshot, or `None` when it has no keywords.
    #[must_use]
    pub fn from_config(config: &KeywordConfig, max_results: u32) -> Option<Self> {
        config.search_expression().map(|expression| Self {
            expression,
            max_results: max_results.clamp(MIN_MAX_RESULTS, MAX_MAX_RESULTS),
        })
    }

    /// Full query text sent to the source: original posts in English only.
    #[must_use]
    pub fn query_string(&self) -> String {
        format!("({}) -is:retweet lang:en", self.expression)
    }
}

/// A data source the monitor polls for recent posts.
pub trait ItemSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_recent<'a>(&'a self, query: &'a SearchQuery) -> FetchFuture<'a>;
}

/// Builds an [`ItemSource`] once credentials are known to be complete.
pub trait SourceConnector: Send + Sync {
    /// # Errors
    /// Returns [`MonitorError::SourceSetup`] when the client cannot be constructed.
    fn connect(&self, credentials: &SourceCredentials) -> Result<Arc<dyn ItemSource>, MonitorError>;
}

/// Source credentials as configured; any of them may be missing.
#[derive(Clone, Default)]
pub struct CredentialSet {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub bearer_token: Option<String>,
}

impl CredentialSet {
    /// Require every credential to be present and non-blank.
    ///
    /// # Errors
    /// Returns [`MonitorError::Config`] naming each missing credential.
    pub fn complete(&self) -> Result<SourceCredentials, MonitorError> {
        let entries = [
            ("TWITTER_API_KEY", &self.api_key),
            ("TWITTER_API_SECRET", &self.api_secret),
            ("TWITTER_ACCESS_TOKEN", &self.access_token),
            ("TWITTER_ACCESS_TOKEN_SECRET", &self.access_token_secret),
            ("TWITTER_BEARER_TOKEN", &self.bearer_token),
        ];

        let missing = entries
            .iter()
            .filter(|(_, value)| value.as_deref().map(str::trim).unwrap_or_default().is_empty())
            .map(|(name, _)| *name)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(MonitorError::Config(format!(
                "missing source credentials: {}",
                missing.join(", ")
            )));
        }

        let value = |field: &Option<String>| field.as_deref().unwrap_or_default().trim().to_string();
        Ok(SourceCredentials {
            api_key: value(&self.api_key),
            api_secret: value(&self.api_secret),
            access_token: value(&self.access_token),
            access_token_secret: value(&self.access_token_secret),
            bearer_token: value(&self.bearer_token),
        })
    }
}

impl Debug for CredentialSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = |field: &Option<String>| if field.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("CredentialSet")
            .field("api_key", &state(&self.api_key))
            .field("api_secret", &state(&self.api_secret))
            .field("access_token", &state(&self.access_token))
            .field("access_token_secret", &state(&self.access_token_secret))
            .field("bearer_token", &state(&self.bearer_token))
            .finish()
    }
}

/// A complete credential set. Only the bearer token is used for recent search.
#[derive(Clone)]
pub struct SourceCredentials {
    api_key: String,
    api_secret: String,
    access_token: String,
    access_token_secret: String,
    bearer_token: String,
}

impl SourceCredentials {
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }
}

impl Debug for SourceCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &str| if value.is_empty() { "<empty>" } else { "<redacted>" };
        f.debug_struct("SourceCredentials")
            .field("api_key", &redacted(&self.api_key))
            .field("api_secret", &redacted(&self.api_secret))
            .field("access_token", &redacted(&self.access_token))
            .field("access_token_secret", &redacted(&self.access_token_secret))
            .field("bearer_token", &redacted(&self.bearer_token))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentSearchSettings {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for RecentSearchSettings {
    fn default() -> Self {
        Self { base_url: DEFAULT_SEARCH_BASE_URL.to_string(), request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }
}

/// Connects [`RecentSearchClient`]s to the configured search endpoint.
#[derive(Debug, Clone, Default)]
pub struct RecentSearchConnector {
    settings: RecentSearchSettings,
}

impl RecentSearchConnector {
    #[must_use]
    pub fn new(settings: RecentSearchSettings) -> Self {
        Self { settings }
    }
}

impl SourceConnector for RecentSearchConnector {
    fn connect(&self, credentials: &SourceCredentials) -> Result<Arc<dyn ItemSource>, MonitorError> {
        let client = RecentSearchClient::new(&self.settings, credentials)?;
        Ok(Arc::new(client))
    }
}

/// HTTP client for the recent-search endpoint.
pub struct RecentSearchClient {
    client: reqwest::Client,
    search_url: String,
    bearer_token: String,
}

impl RecentSearchClient {
    /// # Errors
    /// Returns [`MonitorError::SourceSetup`] when the HTTP client cannot be built.
    pub fn new(
        settings: &RecentSearchSettings,
        credentials: &SourceCredentials,
    ) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| MonitorError::SourceSetup(format!("HTTP client init failed: {err}")))?;

        Ok(Self {
            client,
            search_url: format!("{}{RECENT_SEARCH_PATH}", settings.base_url.trim_end_matches('/')),
            bearer_token: credentials.bearer_token().to_string(),
        })
    }

    async fn do_fetch(&self, query: &SearchQuery) -> Result<Vec<ObservedPost>, SourceFetchError> {
        let max_results = query.max_results.to_string();
        let response = self
            .client
            .get(&self.search_url)
            .bearer_auth(&self.bearer_token)
            .header(header::ACCEPT, "application/json")
            .query(&[
                ("query", query.query_string().as_str()),
                ("max_results", max_results.as_str()),
                ("tweet.fields", TWEET_FIELDS),
            ])
            .send()
            .await?;

        if let Some(err) = status_error(response.status()) {
            return Err(err);
        }

        let body = response.bytes().await?;
        decode_posts(&body, OffsetDateTime::now_utc())
    }
}

impl ItemSource for RecentSearchClient {
    fn name(&self) -> &str {
        "recent-search"
    }

    fn fetch_recent<'a>(&'a self, query: &'a SearchQuery) -> FetchFuture<'a> {
        Box::pin(self.do_fetch(query))
    }
}

fn status_error(status: StatusCode) -> Option<SourceFetchError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceFetchError::AuthFailed,
        StatusCode::TOO_MANY_REQUESTS => SourceFetchError::RateLimited,
        other => SourceFetchError::Api { status: other.as_u16() },
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    text: TextBytes,
    #[serde(default)]
    author_id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    public_metrics: RawMetrics,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
}

/// Post text read as bytes, so a lone surrogate escape or an invalid UTF-8 sequence in one
/// post does not fail the whole response.
#[derive(Debug)]
struct TextBytes(Vec<u8>);

impl<'de> Deserialize<'de> for TextBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TextBytesVisitor;

        impl Visitor<'_> for TextBytesVisitor {
            type Value = TextBytes;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("post text")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<TextBytes, E> {
                Ok(TextBytes(value.as_bytes().to_vec()))
            }

            fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<TextBytes, E> {
                Ok(TextBytes(value.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, value: Vec<u8>) -> Result<TextBytes, E> {
                Ok(TextBytes(value))
            }
        }

        deserializer.deserialize_bytes(TextBytesVisitor)
    }
}

/// Decode a recent-search response body. Posts without a parseable timestamp are
/// stamped with `fetched_at`; posts whose text is not valid Unicode are kept with a lossy
/// text and flagged so they score neutral.
fn decode_posts(body: &[u8], fetched_at: OffsetDateTime) -> Result<Vec<ObservedPost>, SourceFetchError> {
    let response: SearchResponse =
        serde_json::from_slice(body).map_err(|err| SourceFetchError::Decode(err.to_string()))?;

    Ok(response
        .data
        .into_iter()
        .map(|raw| {
            let created_at = raw
                .created_at
                .as_deref()
                .and_then(|value| {
                    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
                        .ok()
                })
                .unwrap_or_else(|| {
                    tracing::debug!(item_id = %raw.id, "post has no usable created_at; using fetch time");
                    fetched_at
                });

            let (text, text_malformed) = match String::from_utf8(raw.text.0) {
                Ok(text) => (text, false),
                Err(err) => {
                    tracing::warn!(item_id = %raw.id, "post text is not valid unicode; scoring as neutral");
                    (String::from_utf8_lossy(err.as_bytes()).into_owned(), true)
                }
            };

            ObservedPost {
                id: raw.id,
                text,
                author_id: raw.author_id,
                created_at,
                metrics: EngagementMetrics {
                    likes: raw.public_metrics.like_count,
                    retweets: raw.public_metrics.retweet_count,
                    replies: raw.public_metrics.reply_count,
                    quotes: raw.public_metrics.quote_count,
                },
                text_malformed,
            }
        })
        .collect())
}
