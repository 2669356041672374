use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use threat_watch_core::{
    default_keyword_rules, Alert, AlertStatus, EngagementMetrics, EngagementTier, KeywordRule,
    ScoredItem, ThreatLevel, UpsertOutcome,
};
use time::{Duration, OffsetDateTime};

const LATEST_SCHEMA_VERSION: i64 = 1;

const RECENT_THREATS_LIMIT: i64 = 20;
const TOP_AUTHORS_LIMIT: i64 = 10;
const DAY_WINDOW: Duration = Duration::hours(24);
const WEEK_WINDOW: Duration = Duration::days(7);

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS keyword_rules (
  keyword TEXT PRIMARY KEY,
  category TEXT NOT NULL,
  weight INTEGER NOT NULL CHECK (weight > 0),
  active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
  item_id TEXT PRIMARY KEY,
  text TEXT NOT NULL,
  author_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  created_at_unix INTEGER NOT NULL,
  like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),
  retweet_count INTEGER NOT NULL DEFAULT 0 CHECK (retweet_count >= 0),
  reply_count INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0),
  quote_count INTEGER NOT NULL DEFAULT 0 CHECK (quote_count >= 0),
  sentiment_score REAL NOT NULL CHECK (sentiment_score BETWEEN -1.0 AND 1.0),
  keyword_score INTEGER NOT NULL CHECK (keyword_score <= 0),
  final_score REAL NOT NULL,
  threat_level TEXT NOT NULL CHECK (threat_level IN ('low','medium','high')),
  engagement_level TEXT NOT NULL CHECK (engagement_level IN ('low','medium','high','viral')),
  matched_keywords_json TEXT NOT NULL,
  first_seen_at TEXT NOT NULL,
  last_seen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
  alert_id TEXT PRIMARY KEY,
  item_id TEXT NOT NULL,
  threat_level TEXT NOT NULL CHECK (threat_level IN ('medium','high')),
  final_score REAL NOT NULL,
  matched_keywords_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  created_at_unix INTEGER NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('active','resolved')),
  resolved_at TEXT,
  FOREIGN KEY (item_id) REFERENCES items(item_id)
);

CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at_unix);
CREATE INDEX IF NOT EXISTS idx_items_threat_level ON items(threat_level, created_at_unix);
CREATE INDEX IF NOT EXISTS idx_items_author ON items(author_id);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status, created_at_unix);
CREATE INDEX IF NOT EXISTS idx_alerts_item ON alerts(item_id);
";

const ITEM_COLUMNS: &str = "item_id, text, author_id, created_at,
    like_count, retweet_count, reply_count, quote_count,
    sentiment_score, keyword_score, final_score, threat_level, engagement_level,
    matched_keywords_json";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Result of inserting an alert row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertWrite {
    Recorded,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredKeywordRule {
    pub keyword: String,
    pub category: String,
    pub weight: u32,
    pub active: bool,
    pub updated_at: String,
}

impl StoredKeywordRule {
    #[must_use]
    pub fn rule(&self) -> KeywordRule {
        KeywordRule::new(self.keyword.clone(), self.category.clone(), self.weight)
    }
}

/// An active alert joined with the item that raised it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveAlertView {
    #[serde(flatten)]
    pub alert: Alert,
    pub text: String,
    pub author_id: String,
    pub like_count: u64,
    pub retweet_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourlyCount {
    pub hour: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorActivity {
    pub author_id: String,
    pub threat_count: u64,
    pub avg_final_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSnapshot {
    pub generated_at: String,
    pub threat_stats: BTreeMap<String, u64>,
    pub hourly_stats: Vec<HourlyCount>,
    pub recent_threats: Vec<ScoredItem>,
    pub top_authors: Vec<AuthorActivity>,
}

impl SqliteStore {
    /// Open a SQLite-backed item store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Insert a scored item, or refresh the volatile engagement fields of an existing one.
    ///
    /// Scores, threat level and matched keywords of an existing row are never overwritten.
    ///
    /// # Errors
    /// Returns an error when the item is invalid or the write transaction fails.
    pub fn upsert_item(&mut self, item: &ScoredItem, seen_at: OffsetDateTime) -> Result<UpsertOutcome> {
        item.validate().map_err(|err| anyhow!("item validation failed: {err}"))?;

        let seen_at = rfc3339(seen_at)?;
        let tx = self.conn.transaction().context("failed to start upsert transaction")?;

        let existed = tx
            .query_row("SELECT 1 FROM items WHERE item_id = ?1", params![item.id], |_| Ok(()))
            .optional()
            .context("failed to check for existing item")?
            .is_some();

        tx.execute(
            "INSERT INTO items(
                item_id, text, author_id, created_at, created_at_unix,
                like_count, retweet_count, reply_count, quote_count,
                sentiment_score, keyword_score, final_score, threat_level, engagement_level,
                matched_keywords_json, first_seen_at, last_seen_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?16
            )
            ON CONFLICT(item_id) DO UPDATE SET
                like_count = excluded.like_count,
                retweet_count = excluded.retweet_count,
                reply_count = excluded.reply_count,
                quote_count = excluded.quote_count,
                engagement_level = excluded.engagement_level,
                last_seen_at = excluded.last_seen_at",
            params![
                item.id,
                item.text,
                item.author_id,
                rfc3339(item.created_at)?,
                item.created_at.unix_timestamp(),
                to_sql_count(item.metrics.likes, "like_count")?,
                to_sql_count(item.metrics.retweets, "retweet_count")?,
                to_sql_count(item.metrics.replies, "reply_count")?,
                to_sql_count(item.metrics.quotes, "quote_count")?,
                item.sentiment_score,
                item.keyword_score,
                item.final_score,
                item.threat_level.as_str(),
                item.engagement_level.as_str(),
                serde_json::to_string(&item.matched_keywords)
                    .context("failed to serialize matched keywords")?,
                seen_at,
            ],
        )
        .with_context(|| format!("failed to upsert item {}", item.id))?;

        tx.commit().context("failed to commit upsert transaction")?;

        Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
    }

    /// Load one persisted item by id.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_item(&self, item_id: &str) -> Result<Option<ScoredItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![item_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(scored_item_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Insert an alert row. An existing `alert_id` reports [`AlertWrite::Duplicate`]
    /// and leaves the stored alert untouched.
    ///
    /// # Errors
    /// Returns an error when the referenced item is missing or the insert fails.
    pub fn record_alert(&mut self, alert: &Alert) -> Result<AlertWrite> {
        if !alert.threat_level.is_alertable() {
            return Err(anyhow!(
                "alert {} has non-alertable threat level {}",
                alert.alert_id,
                alert.threat_level
            ));
        }

        let inserted = self
            .conn
            .execute(
                "INSERT INTO alerts(
                    alert_id, item_id, threat_level, final_score, matched_keywords_json,
                    created_at, created_at_unix, status, resolved_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
                ON CONFLICT(alert_id) DO NOTHING",
                params![
                    alert.alert_id,
                    alert.item_id,
                    alert.threat_level.as_str(),
                    alert.final_score,
                    serde_json::to_string(&alert.matched_keywords)
                        .context("failed to serialize matched keywords")?,
                    rfc3339(alert.created_at)?,
                    alert.created_at.unix_timestamp(),
                    alert.status.as_str(),
                ],
            )
            .with_context(|| format!("failed to insert alert {}", alert.alert_id))?;

        Ok(if inserted == 0 { AlertWrite::Duplicate } else { AlertWrite::Recorded })
    }

    /// Active alerts, newest first, joined with their item.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_active_alerts(&self, limit: u32) -> Result<Vec<ActiveAlertView>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                a.alert_id, a.item_id, a.threat_level, a.final_score, a.matched_keywords_json,
                a.created_at, a.status, i.text, i.author_id, i.like_count, i.retweet_count
             FROM alerts a
             JOIN items i ON i.item_id = a.item_id
             WHERE a.status = 'active'
             ORDER BY a.created_at_unix DESC, a.alert_id ASC
             LIMIT ?1",
        )?;

        let mut rows = stmt.query(params![i64::from(limit)])?;
        let mut alerts = Vec::new();
        while let Some(row) = rows.next()? {
            let threat_level_raw: String = row.get(2)?;
            let status_raw: String = row.get(6)?;
            let matched_keywords_json: String = row.get(4)?;

            alerts.push(ActiveAlertView {
                alert: Alert {
                    alert_id: row.get(0)?,
                    item_id: row.get(1)?,
                    threat_level: ThreatLevel::parse(&threat_level_raw)
                        .ok_or_else(|| anyhow!("unknown threat_level: {threat_level_raw}"))?,
                    final_score: row.get(3)?,
                    matched_keywords: serde_json::from_str(&matched_keywords_json)
                        .context("failed to deserialize matched keywords")?,
                    created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
                    status: AlertStatus::parse(&status_raw)
                        .ok_or_else(|| anyhow!("unknown alert status: {status_raw}"))?,
                },
                text: row.get(7)?,
                author_id: row.get(8)?,
                like_count: from_sql_count(row.get(9)?, "like_count")?,
                retweet_count: from_sql_count(row.get(10)?, "retweet_count")?,
            });
        }

        Ok(alerts)
    }

    /// Mark an alert resolved. Returns `false` when no alert has this id.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn resolve_alert(&mut self, alert_id: &str, resolved_at: OffsetDateTime) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE alerts
                 SET status = 'resolved', resolved_at = COALESCE(resolved_at, ?2)
                 WHERE alert_id = ?1",
                params![alert_id, rfc3339(resolved_at)?],
            )
            .with_context(|| format!("failed to resolve alert {alert_id}"))?;
        Ok(changed > 0)
    }

    /// Active keyword rules ordered by weight descending, then keyword ascending.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn load_active_keywords(&self) -> Result<Vec<KeywordRule>> {
        Ok(self
            .list_keywords()?
            .into_iter()
            .filter(|stored| stored.active)
            .map(|stored| stored.rule())
            .collect())
    }

    /// All keyword rules, active or not, in the same order as [`Self::load_active_keywords`].
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_keywords(&self) -> Result<Vec<StoredKeywordRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT keyword, category, weight, active, updated_at
             FROM keyword_rules
             ORDER BY weight DESC, keyword ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredKeywordRule {
                keyword: row.get(0)?,
                category: row.get(1)?,
                weight: row.get(2)?,
                active: row.get::<_, i64>(3)? == 1,
                updated_at: row.get(4)?,
            })
        })?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row.context("failed to decode keyword rule")?);
        }
        Ok(rules)
    }

    /// Insert or replace one keyword rule.
    ///
    /// # Errors
    /// Returns an error when the rule is invalid or the write fails.
    pub fn upsert_keyword(
        &mut self,
        rule: &KeywordRule,
        active: bool,
        updated_at: OffsetDateTime,
    ) -> Result<UpsertOutcome> {
        let rule = rule.normalized().map_err(|err| anyhow!("keyword validation failed: {err}"))?;
        let tx = self.conn.transaction().context("failed to start keyword transaction")?;

        let existed = tx
            .query_row("SELECT 1 FROM keyword_rules WHERE keyword = ?1", params![rule.keyword], |_| {
                Ok(())
            })
            .optional()
            .context("failed to check for existing keyword")?
            .is_some();

        tx.execute(
            "INSERT INTO keyword_rules(keyword, category, weight, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(keyword) DO UPDATE SET
                category = excluded.category,
                weight = excluded.weight,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                rule.keyword,
                rule.category,
                i64::from(rule.weight),
                i64::from(active),
                rfc3339(updated_at)?,
            ],
        )
        .with_context(|| format!("failed to upsert keyword `{}`", rule.keyword))?;

        tx.commit().context("failed to commit keyword transaction")?;
        Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
    }

    /// Insert the built-in keyword rules that are not present yet. Returns how many were added.
    ///
    /// # Errors
    /// Returns an error when any insert fails.
    pub fn seed_default_keywords(&mut self, updated_at: OffsetDateTime) -> Result<usize> {
        let updated_at = rfc3339(updated_at)?;
        let tx = self.conn.transaction().context("failed to start seed transaction")?;

        let mut inserted = 0;
        for rule in default_keyword_rules() {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO keyword_rules(keyword, category, weight, active, updated_at)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![rule.keyword, rule.category, i64::from(rule.weight), updated_at],
                )
                .with_context(|| format!("failed to seed keyword `{}`", rule.keyword))?;
        }

        tx.commit().context("failed to commit seed transaction")?;
        Ok(inserted)
    }

    /// Aggregate recent activity as of `now`.
    ///
    /// # Errors
    /// Returns an error when any aggregate query fails.
    pub fn dashboard(&self, now: OffsetDateTime) -> Result<DashboardSnapshot> {
        let day_start = (now - DAY_WINDOW).unix_timestamp();
        let week_start = (now - WEEK_WINDOW).unix_timestamp();

        let mut threat_stats = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT threat_level, COUNT(*) FROM items
                 WHERE created_at_unix > ?1
                 GROUP BY threat_level",
            )?;
            let mut rows = stmt.query(params![day_start])?;
            while let Some(row) = rows.next()? {
                threat_stats.insert(row.get::<_, String>(0)?, from_sql_count(row.get(1)?, "count")?);
            }
        }

        let mut hourly_stats = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT strftime('%Y-%m-%dT%H:00:00Z', created_at_unix, 'unixepoch') AS hour,
                        COUNT(*)
                 FROM items
                 WHERE created_at_unix > ?1
                 GROUP BY hour
                 ORDER BY hour ASC",
            )?;
            let mut rows = stmt.query(params![day_start])?;
            while let Some(row) = rows.next()? {
                hourly_stats.push(HourlyCount {
                    hour: row.get(0)?,
                    count: from_sql_count(row.get(1)?, "count")?,
                });
            }
        }

        let mut recent_threats = Vec::new();
        {
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items
                 WHERE threat_level IN ('medium','high')
                 ORDER BY created_at_unix DESC, item_id ASC
                 LIMIT ?1"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![RECENT_THREATS_LIMIT])?;
            while let Some(row) = rows.next()? {
                recent_threats.push(scored_item_from_row(row)?);
            }
        }

        let mut top_authors = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT author_id, COUNT(*) AS threat_count, AVG(final_score)
                 FROM items
                 WHERE threat_level IN ('medium','high') AND created_at_unix > ?1
                 GROUP BY author_id
                 ORDER BY threat_count DESC, author_id ASC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![week_start, TOP_AUTHORS_LIMIT])?;
            while let Some(row) = rows.next()? {
                top_authors.push(AuthorActivity {
                    author_id: row.get(0)?,
                    threat_count: from_sql_count(row.get(1)?, "threat_count")?,
                    avg_final_score: row.get(2)?,
                });
            }
        }

        Ok(DashboardSnapshot {
            generated_at: rfc3339(now)?,
            threat_stats,
            hourly_stats,
            recent_threats,
            top_authors,
        })
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn scored_item_from_row(row: &Row<'_>) -> Result<ScoredItem> {
    let threat_level_raw: String = row.get(11)?;
    let engagement_level_raw: String = row.get(12)?;
    let matched_keywords_json: String = row.get(13)?;

    Ok(ScoredItem {
        id: row.get(0)?,
        text: row.get(1)?,
        author_id: row.get(2)?,
        created_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
        metrics: EngagementMetrics {
            likes: from_sql_count(row.get(4)?, "like_count")?,
            retweets: from_sql_count(row.get(5)?, "retweet_count")?,
            replies: from_sql_count(row.get(6)?, "reply_count")?,
            quotes: from_sql_count(row.get(7)?, "quote_count")?,
        },
        sentiment_score: row.get(8)?,
        keyword_score: row.get(9)?,
        final_score: row.get(10)?,
        threat_level: ThreatLevel::parse(&threat_level_raw)
            .ok_or_else(|| anyhow!("unknown threat_level: {threat_level_raw}"))?,
        engagement_level: EngagementTier::parse(&engagement_level_raw)
            .ok_or_else(|| anyhow!("unknown engagement_level: {engagement_level_raw}"))?,
        matched_keywords: serde_json::from_str(&matched_keywords_json)
            .context("failed to deserialize matched keywords")?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn to_sql_count(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{column} value {value} exceeds sqlite range"))
}

fn from_sql_count(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("{column} value {value} is negative"))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
