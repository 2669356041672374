use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Threat classification thresholds on `final_score` and `keyword_score`.
pub const HIGH_FINAL_SCORE_BELOW: f64 = -0.7;
pub const HIGH_KEYWORD_SCORE_BELOW: i64 = -15;
pub const MEDIUM_FINAL_SCORE_BELOW: f64 = -0.3;
pub const MEDIUM_KEYWORD_SCORE_BELOW: i64 = -8;

/// Engagement tier thresholds; a tier applies when engagement is strictly greater.
pub const VIRAL_ENGAGEMENT_ABOVE: u64 = 1000;
pub const HIGH_ENGAGEMENT_ABOVE: u64 = 100;
pub const MEDIUM_ENGAGEMENT_ABOVE: u64 = 10;

const KEYWORD_SCORE_DIVISOR: f64 = 10.0;
const NEGATION_FACTOR: f64 = -0.5;
const NEGATION_WINDOW: usize = 2;

const DEFAULT_KEYWORD_RULES: [(&str, &str, u32); 5] = [
    ("anti india", "political", 10),
    ("kashmir terrorism", "security", 9),
    ("india fake news", "propaganda", 8),
    ("bharat terrorist", "hate", 10),
    ("indian army fake", "military", 9),
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Whether an item at this level warrants an alert.
    #[must_use]
    pub fn is_alertable(self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }
}

impl Display for ThreatLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTier {
    Low,
    Medium,
    High,
    Viral,
}

impl EngagementTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Viral => "viral",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "viral" => Some(Self::Viral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Result of persisting a scored item keyed by its source id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct KeywordRule {
    pub keyword: String,
    pub category: String,
    pub weight: u32,
}

impl KeywordRule {
    #[must_use]
    pub fn new(keyword: impl Into<String>, category: impl Into<String>, weight: u32) -> Self {
        Self { keyword: keyword.into(), category: category.into(), weight }
    }

    /// Return the rule with its keyword trimmed and lowercased.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the keyword is blank or the weight is zero.
    pub fn normalized(&self) -> Result<Self, CoreError> {
        let keyword = self.keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(CoreError::Validation("keyword MUST be non-empty".to_string()));
        }
        if self.weight == 0 {
            return Err(CoreError::Validation(format!(
                "weight MUST be a positive integer for keyword `{keyword}`"
            )));
        }

        Ok(Self { keyword, category: self.category.trim().to_string(), weight: self.weight })
    }
}

/// Immutable snapshot of the active keyword rules, in load order.
#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
pub struct KeywordConfig {
    rules: Vec<KeywordRule>,
}

impl KeywordConfig {
    /// Build a snapshot from loaded rules. Keywords are normalized and duplicates
    /// (after lowercasing) collapse onto their first occurrence.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when any rule is invalid.
    pub fn new(rules: impl IntoIterator<Item = KeywordRule>) -> Result<Self, CoreError> {
        let mut normalized: Vec<KeywordRule> = Vec::new();
        for rule in rules {
            let rule = rule.normalized()?;
            if normalized.iter().any(|existing| existing.keyword == rule.keyword) {
                continue;
            }
            normalized.push(rule);
        }

        Ok(Self { rules: normalized })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in rule set used when persisted rules cannot be loaded.
    #[must_use]
    pub fn fallback() -> Self {
        Self { rules: default_keyword_rules() }
    }

    #[must_use]
    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// OR-combine every keyword as a quoted phrase, e.g. `"a b" OR "c"`.
    /// Returns `None` for an empty snapshot.
    #[must_use]
    pub fn search_expression(&self) -> Option<String> {
        if self.rules.is_empty() {
            return None;
        }

        let phrases = self
            .rules
            .iter()
            .map(|rule| format!("\"{}\"", rule.keyword.replace('"', "")))
            .collect::<Vec<_>>();
        Some(phrases.join(" OR "))
    }
}

#[must_use]
pub fn default_keyword_rules() -> Vec<KeywordRule> {
    DEFAULT_KEYWORD_RULES
        .iter()
        .map(|(keyword, category, weight)| KeywordRule::new(*keyword, *category, *weight))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EngagementMetrics {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub quotes: u64,
}

impl EngagementMetrics {
    /// Weighted amplification: `likes + 3*retweets + 2*replies + 2*quotes`.
    #[must_use]
    pub fn engagement(&self) -> u64 {
        self.likes
            .saturating_add(self.retweets.saturating_mul(3))
            .saturating_add(self.replies.saturating_mul(2))
            .saturating_add(self.quotes.saturating_mul(2))
    }
}

#[must_use]
pub fn classify_engagement(metrics: &EngagementMetrics) -> EngagementTier {
    let engagement = metrics.engagement();
    if engagement > VIRAL_ENGAGEMENT_ABOVE {
        EngagementTier::Viral
    } else if engagement > HIGH_ENGAGEMENT_ABOVE {
        EngagementTier::High
    } else if engagement > MEDIUM_ENGAGEMENT_ABOVE {
        EngagementTier::Medium
    } else {
        EngagementTier::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    pub sentiment_score: f64,
    pub keyword_score: i64,
    pub final_score: f64,
    pub threat_level: ThreatLevel,
    pub matched_keywords: Vec<String>,
}

impl ScoreResult {
    /// Deterministic result for input that cannot be scored.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            sentiment_score: 0.0,
            keyword_score: 0,
            final_score: 0.0,
            threat_level: ThreatLevel::Low,
            matched_keywords: Vec::new(),
        }
    }
}

#[must_use]
pub fn classify_threat(final_score: f64, keyword_score: i64) -> ThreatLevel {
    if final_score < HIGH_FINAL_SCORE_BELOW || keyword_score < HIGH_KEYWORD_SCORE_BELOW {
        ThreatLevel::High
    } else if final_score < MEDIUM_FINAL_SCORE_BELOW || keyword_score < MEDIUM_KEYWORD_SCORE_BELOW
    {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

/// Score one text against a keyword snapshot.
///
/// Each configured keyword found as a case-insensitive substring subtracts its weight once,
/// regardless of how often it occurs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(text: &str, config: &KeywordConfig) -> ScoreResult {
    let sentiment_score = sentiment_polarity(text);
    let lowered = text.to_lowercase();

    let mut penalty: u64 = 0;
    let mut matched_keywords = Vec::new();
    for rule in config.rules() {
        if lowered.contains(rule.keyword.as_str()) {
            penalty = penalty.saturating_add(u64::from(rule.weight));
            matched_keywords.push(rule.keyword.clone());
        }
    }

    let keyword_score = i64::try_from(penalty).map_or(i64::MIN, |value| -value);
    let final_score = sentiment_score + keyword_score as f64 / KEYWORD_SCORE_DIVISOR;

    ScoreResult {
        sentiment_score,
        keyword_score,
        final_score,
        threat_level: classify_threat(final_score, keyword_score),
        matched_keywords,
    }
}

/// Score raw bytes; input that is not valid UTF-8 yields [`ScoreResult::neutral`].
#[must_use]
pub fn score_bytes(raw: &[u8], config: &KeywordConfig) -> ScoreResult {
    match std::str::from_utf8(raw) {
        Ok(text) => score(text, config),
        Err(_) => ScoreResult::neutral(),
    }
}

/// Lexicon polarity estimate in `[-1, 1]`; text without lexicon hits scores `0.0`.
#[must_use]
pub fn sentiment_polarity(text: &str) -> f64 {
    let tokens = tokenize(text);
    let mut total = 0.0_f64;
    let mut hits = 0_u32;

    for (index, token) in tokens.iter().enumerate() {
        let Some(mut value) = lexicon_polarity(token) else {
            continue;
        };

        if let Some(factor) = index
            .checked_sub(1)
            .and_then(|previous| tokens.get(previous))
            .and_then(|previous| intensifier(previous))
        {
            value *= factor;
        }

        let window_start = index.saturating_sub(NEGATION_WINDOW);
        if tokens[window_start..index].iter().any(|candidate| is_negator(candidate)) {
            value *= NEGATION_FACTOR;
        }

        total += value;
        hits += 1;
    }

    if hits == 0 {
        return 0.0;
    }

    (total / f64::from(hits)).clamp(-1.0, 1.0)
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !(ch.is_alphabetic() || ch == '\''))
        .map(|raw| raw.trim_matches('\'').to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_negator(token: &str) -> bool {
    matches!(token, "not" | "no" | "never" | "nor" | "nothing" | "nobody" | "cannot")
        || token.ends_with("n't")
}

fn intensifier(token: &str) -> Option<f64> {
    match token {
        "quite" => Some(1.1),
        "too" => Some(1.2),
        "very" | "really" | "so" | "totally" | "highly" => Some(1.3),
        "absolutely" => Some(1.4),
        "extremely" => Some(1.5),
        _ => None,
    }
}

fn lexicon_polarity(word: &str) -> Option<f64> {
    let polarity = match word {
        "excellent" | "wonderful" | "awesome" | "impressive" | "best" | "perfect" => 1.0,
        "incredible" | "brilliant" => 0.9,
        "beautiful" => 0.85,
        "great" | "happy" | "proud" | "welcome" => 0.8,
        "remarkable" | "successful" => 0.75,
        "good" | "loved" => 0.7,
        "amazing" | "nice" => 0.6,
        "love" | "lovely" | "better" | "glad" | "safe" => 0.5,
        "strong" => 0.43,
        "fantastic" => 0.4,
        "peaceful" => 0.25,
        "positive" => 0.23,
        "failure" => -0.3,
        "worse" | "poor" | "false" => -0.4,
        "angry" | "sad" | "fake" | "wrong" | "corrupt" | "useless" | "failed" => -0.5,
        "dangerous" | "disappointing" => -0.6,
        "bad" | "ugly" | "shameful" => -0.7,
        "disappointed" => -0.75,
        "hate" | "hateful" | "stupid" | "violent" => -0.8,
        "terrible" | "awful" | "horrible" | "worst" | "evil" | "disgusting" | "pathetic"
        | "cruel" => -1.0,
        _ => return None,
    };
    Some(polarity)
}

/// One post as returned by the data source, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObservedPost {
    pub id: String,
    pub text: String,
    pub author_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub metrics: EngagementMetrics,
    /// The source sent text that is not valid Unicode; `text` holds a lossy rendering.
    #[serde(default)]
    pub text_malformed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
    pub id: String,
    pub text: String,
    pub author_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub metrics: EngagementMetrics,
    pub sentiment_score: f64,
    pub keyword_score: i64,
    pub final_score: f64,
    pub threat_level: ThreatLevel,
    pub engagement_level: EngagementTier,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
}

impl ScoredItem {
    /// Score and classify one observed post. Malformed text scores as
    /// [`ScoreResult::neutral`].
    #[must_use]
    pub fn from_post(post: ObservedPost, config: &KeywordConfig) -> Self {
        let result =
            if post.text_malformed { ScoreResult::neutral() } else { score(&post.text, config) };
        let engagement_level = classify_engagement(&post.metrics);
        Self {
            id: post.id,
            text: post.text,
            author_id: post.author_id,
            created_at: post.created_at,
            metrics: post.metrics,
            sentiment_score: result.sentiment_score,
            keyword_score: result.keyword_score,
            final_score: result.final_score,
            threat_level: result.threat_level,
            engagement_level,
            matched_keywords: result.matched_keywords,
        }
    }

    /// Validate the invariants a persisted item must hold.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] for a blank id, out-of-range scores, or an
    /// engagement tier that disagrees with the metrics.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("item id MUST be non-empty".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(CoreError::Validation(format!(
                "sentiment_score MUST be in [-1, 1], got {}",
                self.sentiment_score
            )));
        }
        if self.keyword_score > 0 {
            return Err(CoreError::Validation(format!(
                "keyword_score MUST be <= 0, got {}",
                self.keyword_score
            )));
        }
        if !self.final_score.is_finite() {
            return Err(CoreError::Validation("final_score MUST be finite".to_string()));
        }
        if classify_engagement(&self.metrics) != self.engagement_level {
            return Err(CoreError::Validation(format!(
                "engagement_level {} does not match metrics",
                self.engagement_level.as_str()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub alert_id: String,
    pub item_id: String,
    pub threat_level: ThreatLevel,
    pub final_score: f64,
    pub matched_keywords: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: AlertStatus,
}

impl Alert {
    /// Build the active alert for an item, or `None` when its threat level is `low`.
    #[must_use]
    pub fn for_item(item: &ScoredItem, created_at: OffsetDateTime) -> Option<Self> {
        if !item.threat_level.is_alertable() {
            return None;
        }

        Some(Self {
            alert_id: alert_key(&item.id, item.threat_level),
            item_id: item.id.clone(),
            threat_level: item.threat_level,
            final_score: item.final_score,
            matched_keywords: item.matched_keywords.clone(),
            created_at,
            status: AlertStatus::Active,
        })
    }
}

/// Deterministic alert identity for one item at one threat level.
#[must_use]
pub fn alert_key(item_id: &str, threat_level: ThreatLevel) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item_id.as_bytes());
    hasher.update(b":");
    hasher.update(threat_level.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("alert-{}", &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    fn fixture_config() -> KeywordConfig {
        match KeywordConfig::new([
            KeywordRule::new("bharat terrorist", "hate", 10),
            KeywordRule::new("anti india", "political", 10),
            KeywordRule::new("india fake news", "propaganda", 8),
            KeywordRule::new("fake news", "propaganda", 3),
        ]) {
            Ok(config) => config,
            Err(err) => panic!("fixture config should be valid: {err}"),
        }
    }

    fn fixture_post(id: &str, text: &str, metrics: EngagementMetrics) -> ObservedPost {
        ObservedPost {
            id: id.to_string(),
            text: text.to_string(),
            author_id: "author-1".to_string(),
            created_at: datetime!(2026-10-01 12:00:00 UTC),
            metrics,
            text_malformed: false,
        }
    }

    fn metrics(likes: u64, retweets: u64, replies: u64, quotes: u64) -> EngagementMetrics {
        EngagementMetrics { likes, retweets, replies, quotes }
    }

    #[test]
    fn keyword_phrase_with_neutral_text_scores_high() {
        let result = score("bharat terrorist attack", &fixture_config());
        assert!(result.sentiment_score.abs() < f64::EPSILON);
        assert_eq!(result.keyword_score, -10);
        assert!((result.final_score - (-1.0)).abs() < 1e-9);
        assert_eq!(result.threat_level, ThreatLevel::High);
        assert_eq!(result.matched_keywords, vec!["bharat terrorist".to_string()]);
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let result = score("Anti India, anti india, ANTI INDIA", &fixture_config());
        assert_eq!(result.keyword_score, -10);
        assert_eq!(result.matched_keywords, vec!["anti india".to_string()]);
    }

    #[test]
    fn overlapping_keywords_all_contribute_in_config_order() {
        let result = score("more india fake news today", &fixture_config());
        assert_eq!(result.keyword_score, -11);
        assert_eq!(
            result.matched_keywords,
            vec!["india fake news".to_string(), "fake news".to_string()]
        );
    }

    #[test]
    fn keyword_matching_is_substring_not_token_based() {
        let result = score("#antiindiacampaign is trending", &fixture_config());
        assert!(result.matched_keywords.is_empty());

        let result = score("the anti indiaphile crowd", &fixture_config());
        assert_eq!(result.matched_keywords, vec!["anti india".to_string()]);
    }

    #[test]
    fn keyword_score_alone_drives_medium_and_high() {
        let config = match KeywordConfig::new([
            KeywordRule::new("alpha", "test", 9),
            KeywordRule::new("beta", "test", 7),
        ]) {
            Ok(config) => config,
            Err(err) => panic!("config should be valid: {err}"),
        };

        let medium = score("alpha", &config);
        assert_eq!(medium.keyword_score, -9);
        assert_eq!(medium.threat_level, ThreatLevel::High, "final_score -0.9 is below -0.7");

        assert_eq!(classify_threat(0.5, -9), ThreatLevel::Medium);
        assert_eq!(classify_threat(0.5, -8), ThreatLevel::Low);
        assert_eq!(classify_threat(0.9, -16), ThreatLevel::High);
        assert_eq!(classify_threat(0.9, -15), ThreatLevel::Medium);

        let both = score("alpha beta", &config);
        assert_eq!(both.keyword_score, -16);
        assert_eq!(both.threat_level, ThreatLevel::High);
    }

    #[test]
    fn threat_thresholds_are_strict() {
        assert_eq!(classify_threat(-0.7, 0), ThreatLevel::Medium);
        assert_eq!(classify_threat(-0.700_001, 0), ThreatLevel::High);
        assert_eq!(classify_threat(-0.3, 0), ThreatLevel::Low);
        assert_eq!(classify_threat(-0.300_001, 0), ThreatLevel::Medium);
    }

    #[test]
    fn sentiment_handles_negation_and_intensifiers() {
        assert!((sentiment_polarity("this is good") - 0.7).abs() < 1e-9);
        assert!((sentiment_polarity("this is not good") - (-0.35)).abs() < 1e-9);
        assert!((sentiment_polarity("very bad") - (-0.91)).abs() < 1e-9);
        assert!((sentiment_polarity("great and terrible") - (-0.1)).abs() < 1e-9);
        assert!((sentiment_polarity("it isn't awful") - 0.5).abs() < 1e-9);
        assert!(sentiment_polarity("no sentiment words here").abs() < f64::EPSILON);
    }

    #[test]
    fn sentiment_is_clamped() {
        let value = sentiment_polarity("extremely excellent");
        assert!((value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_utf8_scores_neutral() {
        let result = score_bytes(&[0x66, 0xff, 0xfe, 0x61], &fixture_config());
        assert_eq!(result, ScoreResult::neutral());

        let valid = score_bytes("bharat terrorist".as_bytes(), &fixture_config());
        assert_eq!(valid.keyword_score, -10);
    }

    #[test]
    fn malformed_post_text_scores_neutral_but_keeps_metrics() -> Result<(), CoreError> {
        let mut post = fixture_post("9", "bharat terrorist \u{fffd} attack", metrics(50, 5, 1, 0));
        post.text_malformed = true;

        let item = ScoredItem::from_post(post, &fixture_config());
        assert_eq!(item.threat_level, ThreatLevel::Low);
        assert_eq!(item.keyword_score, 0);
        assert!(item.matched_keywords.is_empty());
        assert_eq!(item.engagement_level, EngagementTier::Medium);
        assert!(Alert::for_item(&item, item.created_at).is_none());
        item.validate()
    }

    #[test]
    fn engagement_tier_boundaries_are_strict() {
        assert_eq!(classify_engagement(&metrics(1000, 0, 0, 0)), EngagementTier::High);
        assert_eq!(classify_engagement(&metrics(1001, 0, 0, 0)), EngagementTier::Viral);
        assert_eq!(classify_engagement(&metrics(100, 0, 0, 0)), EngagementTier::Medium);
        assert_eq!(classify_engagement(&metrics(101, 0, 0, 0)), EngagementTier::High);
        assert_eq!(classify_engagement(&metrics(10, 0, 0, 0)), EngagementTier::Low);
        assert_eq!(classify_engagement(&metrics(11, 0, 0, 0)), EngagementTier::Medium);
    }

    #[test]
    fn engagement_weights_retweets_replies_and_quotes() {
        let sample = metrics(50, 5, 1, 0);
        assert_eq!(sample.engagement(), 67);
        assert_eq!(classify_engagement(&sample), EngagementTier::Medium);
        assert_eq!(metrics(0, 0, 0, 0).engagement(), 0);
        assert_eq!(metrics(u64::MAX, 1, 0, 0).engagement(), u64::MAX);
    }

    #[test]
    fn missing_metric_fields_default_to_zero() -> Result<(), serde_json::Error> {
        let parsed: EngagementMetrics = serde_json::from_str(r#"{"likes": 12}"#)?;
        assert_eq!(parsed, metrics(12, 0, 0, 0));
        assert_eq!(classify_engagement(&parsed), EngagementTier::Medium);
        Ok(())
    }

    #[test]
    fn config_normalizes_and_deduplicates_keywords() -> Result<(), CoreError> {
        let config = KeywordConfig::new([
            KeywordRule::new("  Anti India ", "political", 10),
            KeywordRule::new("ANTI INDIA", "other", 3),
            KeywordRule::new("kashmir terrorism", "security", 9),
        ])?;
        assert_eq!(config.len(), 2);
        assert_eq!(config.rules()[0], KeywordRule::new("anti india", "political", 10));
        assert_eq!(config.rules()[1].keyword, "kashmir terrorism");
        Ok(())
    }

    #[test]
    fn config_rejects_blank_keyword_and_zero_weight() {
        let blank = KeywordConfig::new([KeywordRule::new("   ", "political", 3)]);
        assert!(matches!(blank, Err(CoreError::Validation(message)) if message.contains("non-empty")));

        let zero = KeywordConfig::new([KeywordRule::new("anti india", "political", 0)]);
        assert!(matches!(zero, Err(CoreError::Validation(message)) if message.contains("positive")));
    }

    #[test]
    fn search_expression_or_combines_quoted_keywords() {
        assert_eq!(KeywordConfig::empty().search_expression(), None);
        assert_eq!(
            fixture_config().search_expression().as_deref(),
            Some(r#""bharat terrorist" OR "anti india" OR "india fake news" OR "fake news""#)
        );
    }

    #[test]
    fn fallback_config_matches_default_rules() {
        let fallback = KeywordConfig::fallback();
        assert_eq!(fallback.len(), 5);
        assert_eq!(fallback.rules(), default_keyword_rules().as_slice());
        assert!(fallback.rules().iter().all(|rule| rule.normalized().as_ref() == Ok(rule)));
    }

    #[test]
    fn low_threat_item_never_produces_alert() {
        let item = ScoredItem::from_post(
            fixture_post("1", "what a wonderful day", metrics(1, 0, 0, 0)),
            &fixture_config(),
        );
        assert_eq!(item.threat_level, ThreatLevel::Low);
        assert!(Alert::for_item(&item, datetime!(2026-10-01 12:05:00 UTC)).is_none());
    }

    #[test]
    fn alert_for_threatening_item_uses_deterministic_key() {
        let item = ScoredItem::from_post(
            fixture_post("1848", "bharat terrorist attack", metrics(50, 5, 1, 0)),
            &fixture_config(),
        );
        assert_eq!(item.engagement_level, EngagementTier::Medium);

        let first = Alert::for_item(&item, datetime!(2026-10-01 12:05:00 UTC));
        let second = Alert::for_item(&item, datetime!(2026-10-02 08:00:00 UTC));
        let (Some(first), Some(second)) = (first, second) else {
            panic!("high threat item should produce an alert");
        };
        assert_eq!(first.alert_id, second.alert_id);
        assert_eq!(first.status, AlertStatus::Active);
        assert_eq!(first.item_id, "1848");
        assert_eq!(first.matched_keywords, vec!["bharat terrorist".to_string()]);
        assert!(first.alert_id.starts_with("alert-"));
        assert_eq!(first.alert_id.len(), "alert-".len() + 32);
    }

    #[test]
    fn alert_key_distinguishes_items_and_levels() {
        let base = alert_key("1848", ThreatLevel::Medium);
        assert_ne!(base, alert_key("1848", ThreatLevel::High));
        assert_ne!(base, alert_key("1849", ThreatLevel::Medium));
        assert_eq!(base, alert_key("1848", ThreatLevel::Medium));
    }

    #[test]
    fn scored_item_validation_rejects_inconsistent_rows() {
        let mut item = ScoredItem::from_post(
            fixture_post("7", "anti india", metrics(5, 0, 0, 0)),
            &fixture_config(),
        );
        assert_eq!(item.validate(), Ok(()));

        item.engagement_level = EngagementTier::Viral;
        assert!(item.validate().is_err());

        item.engagement_level = EngagementTier::Low;
        item.keyword_score = 4;
        assert!(item.validate().is_err());

        item.keyword_score = -10;
        item.id = " ".to_string();
        assert!(item.validate().is_err());
    }

    #[test]
    fn enum_wire_names_round_trip() {
        for level in [ThreatLevel::Low, ThreatLevel::Medium, ThreatLevel::High] {
            assert_eq!(ThreatLevel::parse(level.as_str()), Some(level));
        }
        for tier in
            [EngagementTier::Low, EngagementTier::Medium, EngagementTier::High, EngagementTier::Viral]
        {
            assert_eq!(EngagementTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(AlertStatus::parse("resolved"), Some(AlertStatus::Resolved));
        assert_eq!(AlertStatus::parse("closed"), None);
    }

    fn word_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "bharat", "terrorist", "anti", "india", "fake", "news", "the", "good", "bad", "not",
            "very", "kashmir", "today", "great", "awful", "people",
        ])
        .prop_flat_map(|word| {
            any::<bool>().prop_map(move |upper| {
                if upper {
                    word.to_uppercase()
                } else {
                    word.to_string()
                }
            })
        })
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(word_strategy(), 0..14).prop_map(|words| words.join(" "))
    }

    proptest! {
        #[test]
        fn property_final_score_is_sentiment_plus_tenth_of_keyword_score(text in text_strategy()) {
            let result = score(&text, &fixture_config());
            #[allow(clippy::cast_precision_loss)]
            let expected = result.sentiment_score + result.keyword_score as f64 / 10.0;
            prop_assert_eq!(result.final_score.to_bits(), expected.to_bits());
            prop_assert!((-1.0..=1.0).contains(&result.sentiment_score));
            prop_assert!(result.keyword_score <= 0);
        }

        #[test]
        fn property_matched_keywords_are_exactly_present_substrings(text in text_strategy()) {
            let config = fixture_config();
            let lowered = text.to_lowercase();
            let expected = config
                .rules()
                .iter()
                .filter(|rule| lowered.contains(rule.keyword.as_str()))
                .map(|rule| rule.keyword.clone())
                .collect::<Vec<_>>();
            let first = score(&text, &config);
            let second = score(&text, &config);
            prop_assert_eq!(&first.matched_keywords, &expected);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn property_without_keywords_threat_depends_only_on_sentiment(text in text_strategy()) {
            let result = score(&text, &KeywordConfig::empty());
            prop_assert_eq!(result.keyword_score, 0);
            prop_assert!(result.matched_keywords.is_empty());
            prop_assert_eq!(result.threat_level, classify_threat(result.sentiment_score, 0));
        }
    }
}
