use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use threat_watch_core::{score, KeywordConfig, KeywordRule};
use threat_watch_store_sqlite::SqliteStore;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_ALERT_LIMIT: u32 = 50;

#[derive(Debug, Parser)]
#[command(name = "tw")]
#[command(about = "Threat Watch CLI")]
struct Cli {
    #[arg(long, env = "TW_DB", default_value = "./threat_watch.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Keywords {
        #[command(subcommand)]
        command: KeywordsCommand,
    },
    Alerts {
        #[command(subcommand)]
        command: AlertsCommand,
    },
    /// Score a text against the stored active keywords without persisting it.
    Score(ScoreArgs),
    Dashboard,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum KeywordsCommand {
    List,
    Add(KeywordAddArgs),
    SeedDefaults,
}

#[derive(Debug, Args)]
struct KeywordAddArgs {
    #[arg(long)]
    keyword: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    weight: u32,
    #[arg(long, default_value_t = false)]
    inactive: bool,
}

#[derive(Debug, Subcommand)]
enum AlertsCommand {
    List(AlertsListArgs),
    Resolve(AlertsResolveArgs),
}

#[derive(Debug, Args)]
struct AlertsListArgs {
    #[arg(long, default_value_t = DEFAULT_ALERT_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct AlertsResolveArgs {
    #[arg(long)]
    alert_id: String,
}

#[derive(Debug, Args)]
struct ScoreArgs {
    #[arg(long)]
    text: String,
    /// Use the built-in keyword set instead of the database.
    #[arg(long, default_value_t = false)]
    default_keywords: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Keywords { command } => {
            store.migrate()?;
            run_keywords(command, &mut store)
        }
        Command::Alerts { command } => {
            store.migrate()?;
            run_alerts(command, &mut store)
        }
        Command::Score(args) => {
            store.migrate()?;
            run_score(&args, &store)
        }
        Command::Dashboard => {
            store.migrate()?;
            emit_json(serde_json::to_value(store.dashboard(OffsetDateTime::now_utc())?)?)
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Backup(args) => {
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out.display().to_string()
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            let ok = report.quick_check_ok && report.foreign_key_violations.is_empty();
            let mut value = serde_json::to_value(report)?;
            if let Value::Object(object) = &mut value {
                object.insert("ok".to_string(), Value::Bool(ok));
            }
            emit_json(value)
        }
    }
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_keywords(command: KeywordsCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        KeywordsCommand::List => {
            emit_json(serde_json::json!({ "keywords": store.list_keywords()? }))
        }
        KeywordsCommand::Add(args) => {
            let rule = KeywordRule::new(args.keyword, args.category, args.weight)
                .normalized()
                .map_err(|err| anyhow!("invalid keyword rule: {err}"))?;
            let outcome = store.upsert_keyword(&rule, !args.inactive, OffsetDateTime::now_utc())?;
            emit_json(serde_json::json!({
                "keyword": rule.keyword,
                "category": rule.category,
                "weight": rule.weight,
                "active": !args.inactive,
                "outcome": outcome.as_str()
            }))
        }
        KeywordsCommand::SeedDefaults => {
            let inserted = store.seed_default_keywords(OffsetDateTime::now_utc())?;
            emit_json(serde_json::json!({
                "inserted": inserted,
                "keyword_count": store.load_active_keywords()?.len()
            }))
        }
    }
}

fn run_alerts(command: AlertsCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        AlertsCommand::List(args) => {
            emit_json(serde_json::json!({ "alerts": store.list_active_alerts(args.limit)? }))
        }
        AlertsCommand::Resolve(args) => {
            let resolved = store.resolve_alert(&args.alert_id, OffsetDateTime::now_utc())?;
            emit_json(serde_json::json!({
                "alert_id": args.alert_id,
                "resolved": resolved
            }))
        }
    }
}

fn run_score(args: &ScoreArgs, store: &SqliteStore) -> Result<()> {
    let config = if args.default_keywords {
        KeywordConfig::fallback()
    } else {
        KeywordConfig::new(store.load_active_keywords()?)
            .map_err(|err| anyhow!("stored keyword rules are invalid: {err}"))?
    };
    let result = score(&args.text, &config);
    let mut value = serde_json::to_value(result).context("failed to encode score result")?;
    if let Value::Object(object) = &mut value {
        object.insert("keyword_count".to_string(), Value::from(config.len()));
    }
    emit_json(value)
}
