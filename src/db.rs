//! SQLite ledger with Diesel ORM
//!
//! Stores one generated argument per ordered psalm pair and the evaluator
//! history for each argument. Schema evolution runs as an ordered list of
//! recorded migration steps every time the store is opened.

use crate::evaluation::{EvaluationChecks, NewEvaluation};
use crate::matrix::{self, PairCell, StatusMatrix};
use crate::pair::{self, Pair, TOTAL_PAIRS};
use crate::schema::*;
use crate::usage::{self, DailyProgress, DailyUsageBucket, TokenUsage, UsageRow, UsageTotals};
use chrono::{SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sql_types::{BigInt, Integer, Nullable};
use diesel::sqlite::SqliteConnection;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Store location used when neither the CLI, env nor config name one.
pub const DEFAULT_DB_PATH: &str = "data/psalm_pairs.sqlite3";

/// Timestamp format written by every ledger table (UTC, second precision).
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Migrations
// ============================================================================

/// One idempotent change to the store.
#[derive(Debug, Clone, Copy)]
pub enum MigrationStep {
    /// Statements that are safe to re-run (`IF NOT EXISTS`).
    Sql(&'static str),
    /// Add a column unless `PRAGMA table_info` already lists it.
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

/// A numbered, named group of steps recorded in `schema_migrations`.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub steps: &'static [MigrationStep],
}

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        version INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    )
"#;

/// Ordered migration sequence. Append only; never edit an applied step.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_base_tables",
        steps: &[MigrationStep::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS pair_arguments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                psalm_x INTEGER NOT NULL,
                psalm_y INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                response_text TEXT NOT NULL,
                response_json TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (psalm_x, psalm_y)
            );
            CREATE TABLE IF NOT EXISTS pair_evaluations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                score REAL NOT NULL,
                justification TEXT NOT NULL,
                evaluator_model TEXT NOT NULL,
                evaluation_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(pair_id) REFERENCES pair_arguments(id) ON DELETE CASCADE,
                UNIQUE (pair_id)
            );
            "#,
        )],
    },
    Migration {
        version: 2,
        name: "add_generation_usage",
        steps: &[
            MigrationStep::AddColumn {
                table: "pair_arguments",
                column: "total_tokens",
                definition: "INTEGER",
            },
            MigrationStep::AddColumn {
                table: "pair_arguments",
                column: "reasoning_tokens",
                definition: "INTEGER",
            },
            MigrationStep::AddColumn {
                table: "pair_arguments",
                column: "non_reasoning_tokens",
                definition: "INTEGER",
            },
        ],
    },
    Migration {
        version: 3,
        name: "add_evaluation_details",
        steps: &[
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "evaluator_version",
                definition: "INTEGER NOT NULL DEFAULT 1",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "checks_json",
                definition: "TEXT",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "flags_json",
                definition: "TEXT",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "vocabulary_specificity",
                definition: "REAL",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "total_tokens",
                definition: "INTEGER",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "reasoning_tokens",
                definition: "INTEGER",
            },
            MigrationStep::AddColumn {
                table: "pair_evaluations",
                column: "non_reasoning_tokens",
                definition: "INTEGER",
            },
        ],
    },
    Migration {
        version: 4,
        name: "evaluation_history",
        // Rebuild so each evaluator version keeps its own row per pair
        steps: &[MigrationStep::Sql(
            r#"
            CREATE TABLE pair_evaluations_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                score REAL NOT NULL,
                justification TEXT NOT NULL,
                evaluator_model TEXT NOT NULL,
                evaluator_version INTEGER NOT NULL DEFAULT 1,
                evaluation_json TEXT NOT NULL,
                checks_json TEXT,
                flags_json TEXT,
                vocabulary_specificity REAL,
                total_tokens INTEGER,
                reasoning_tokens INTEGER,
                non_reasoning_tokens INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY(pair_id) REFERENCES pair_arguments(id) ON DELETE CASCADE,
                UNIQUE (pair_id, evaluator_version)
            );
            INSERT INTO pair_evaluations_history (
                id, pair_id, score, justification, evaluator_model, evaluator_version,
                evaluation_json, checks_json, flags_json, vocabulary_specificity,
                total_tokens, reasoning_tokens, non_reasoning_tokens, created_at
            )
            SELECT
                id, pair_id, score, justification, evaluator_model, COALESCE(evaluator_version, 1),
                evaluation_json, checks_json, flags_json, vocabulary_specificity,
                total_tokens, reasoning_tokens, non_reasoning_tokens, created_at
            FROM pair_evaluations;
            DROP TABLE pair_evaluations;
            ALTER TABLE pair_evaluations_history RENAME TO pair_evaluations;
            CREATE INDEX IF NOT EXISTS idx_evaluations_pair ON pair_evaluations(pair_id);
            CREATE INDEX IF NOT EXISTS idx_evaluations_version ON pair_evaluations(evaluator_version);
            "#,
        )],
    },
    Migration {
        version: 5,
        name: "create_pass_runs",
        steps: &[MigrationStep::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS pass_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                run_id TEXT NOT NULL UNIQUE,
                pass TEXT NOT NULL,
                model TEXT NOT NULL,
                requested INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'running',
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pass_runs_started_at ON pass_runs(started_at);
            "#,
        )],
    },
];

/// Latest migration version this build knows about.
pub fn current_schema_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Queryable migration record
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = schema_migrations)]
pub struct AppliedMigration {
    pub id: i32,
    pub version: i32,
    pub name: String,
    pub applied_at: String,
}

/// Insertable generation record
#[derive(Insertable)]
#[diesel(table_name = pair_arguments)]
struct NewPairArgument<'a> {
    psalm_x: i32,
    psalm_y: i32,
    prompt: &'a str,
    response_text: &'a str,
    response_json: &'a str,
    model: &'a str,
    created_at: &'a str,
    total_tokens: Option<i64>,
    reasoning_tokens: Option<i64>,
    non_reasoning_tokens: Option<i64>,
}

/// Queryable generation record
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = pair_arguments)]
pub struct GenerationRecord {
    pub id: i32,
    pub psalm_x: i32,
    pub psalm_y: i32,
    pub prompt: String,
    pub response_text: String,
    pub response_json: String,
    pub model: String,
    pub created_at: String,
    pub total_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub non_reasoning_tokens: Option<i64>,
}

impl GenerationRecord {
    pub fn pair(&self) -> Option<Pair> {
        Pair::new(self.psalm_x, self.psalm_y)
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.total_tokens, self.reasoning_tokens, self.non_reasoning_tokens)
    }
}

/// What the generation pass persists for one pair.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPayload<'a> {
    pub prompt: &'a str,
    pub response_text: &'a str,
    pub response_json: &'a serde_json::Value,
    pub model: &'a str,
}

/// Insertable evaluation record
#[derive(Insertable)]
#[diesel(table_name = pair_evaluations)]
struct NewPairEvaluation<'a> {
    pair_id: i32,
    score: f64,
    justification: &'a str,
    evaluator_model: &'a str,
    evaluator_version: i32,
    evaluation_json: &'a str,
    checks_json: Option<&'a str>,
    flags_json: Option<&'a str>,
    vocabulary_specificity: Option<f64>,
    total_tokens: Option<i64>,
    reasoning_tokens: Option<i64>,
    non_reasoning_tokens: Option<i64>,
    created_at: &'a str,
}

/// Queryable evaluation record
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = pair_evaluations)]
pub struct EvaluationRecord {
    pub id: i32,
    pub pair_id: i32,
    pub score: f64,
    pub justification: String,
    pub evaluator_model: String,
    pub evaluator_version: i32,
    pub evaluation_json: String,
    pub checks_json: Option<String>,
    pub flags_json: Option<String>,
    pub vocabulary_specificity: Option<f64>,
    pub total_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub non_reasoning_tokens: Option<i64>,
    pub created_at: String,
}

impl EvaluationRecord {
    /// Structured checks; `None` for rows written before checks were recorded.
    pub fn checks(&self) -> Option<EvaluationChecks> {
        self.checks_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn flags(&self) -> Vec<String> {
        self.flags_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.total_tokens, self.reasoning_tokens, self.non_reasoning_tokens)
    }
}

/// Which pass a run log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Generate,
    Evaluate,
}

impl PassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Generate => "generate",
            PassKind::Evaluate => "evaluate",
        }
    }
}

/// Insertable pass run
#[derive(Insertable)]
#[diesel(table_name = pass_runs)]
struct NewPassRun<'a> {
    run_id: &'a str,
    pass: &'a str,
    model: &'a str,
    requested: i32,
    processed: i32,
    status: &'a str,
    error: Option<&'a str>,
    started_at: &'a str,
    completed_at: Option<&'a str>,
}

/// Queryable pass run
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = pass_runs)]
pub struct RunRecord {
    pub id: i32,
    pub run_id: String,
    pub pass: String,
    pub model: String,
    pub requested: i32,
    pub processed: i32,
    pub status: String,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Ledger progress counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Counts {
    pub generated: i64,
    /// Pairs with at least one evaluation, any version.
    pub evaluated: i64,
    pub total_pairs: i64,
}

/// A recently generated argument with its current evaluation, if any.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentArgument {
    pub id: i32,
    pub psalm_x: i32,
    pub psalm_y: i32,
    pub response_text: String,
    pub created_at: String,
    pub score: Option<f64>,
    pub justification: Option<String>,
    pub evaluator_version: Option<i32>,
    pub evaluated_at: Option<String>,
}

// ============================================================================
// Helper structs for raw SQL queries
// ============================================================================

/// Helper for PRAGMA table_info queries
#[derive(QueryableByName, Debug)]
struct PragmaTableInfo {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas: wait on locks held by an overlapping run, enforce cascades.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    Validation(String),
    Migration { version: i32, message: String },
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::Validation(msg) => write!(f, "{}", msg),
            DbError::Migration { version, message } => {
                write!(f, "Migration {} failed: {}", version, message)
            }
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Open database at specified path, creating parent directories and
    /// bringing the schema up to date.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::Connection(format!("Could not create {}: {}", parent.display(), e))
                })?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: Duration::from_secs(30),
            }))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    // ========================================================================
    // Schema Migrator
    // ========================================================================

    /// Apply every migration not yet recorded. Returns the versions applied.
    pub fn run_migrations(&self) -> Result<Vec<i32>> {
        let mut conn = self.get_conn()?;
        conn.batch_execute(CREATE_MIGRATIONS_TABLE)?;

        let mut applied = Vec::new();
        for migration in MIGRATIONS {
            let ran = conn
                .immediate_transaction::<bool, DbError, _>(|conn| {
                    let done: i64 = schema_migrations::table
                        .filter(schema_migrations::version.eq(migration.version))
                        .count()
                        .get_result(conn)?;
                    if done > 0 {
                        return Ok(false);
                    }

                    for step in migration.steps {
                        apply_step(conn, step)?;
                    }

                    let now = timestamp_now();
                    diesel::insert_into(schema_migrations::table)
                        .values((
                            schema_migrations::version.eq(migration.version),
                            schema_migrations::name.eq(migration.name),
                            schema_migrations::applied_at.eq(&now),
                        ))
                        .execute(conn)?;
                    Ok(true)
                })
                .map_err(|e| DbError::Migration {
                    version: migration.version,
                    message: e.to_string(),
                })?;

            if ran {
                info!(version = migration.version, name = migration.name, "Applied schema migration");
                applied.push(migration.version);
            }
        }
        Ok(applied)
    }

    /// Migrations recorded in the store, ascending.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.get_conn()?;
        let rows = schema_migrations::table
            .order(schema_migrations::version.asc())
            .select(AppliedMigration::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// Column names of `table`, in table order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        column_names(&mut conn, table)
    }

    // ========================================================================
    // Pair Ledger
    // ========================================================================

    pub fn record_exists(&self, pair: Pair) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let count: i64 = pair_arguments::table
            .filter(pair_arguments::psalm_x.eq(pair.x))
            .filter(pair_arguments::psalm_y.eq(pair.y))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn all_recorded_pairs(&self) -> Result<HashSet<Pair>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<(i32, i32)> = pair_arguments::table
            .select((pair_arguments::psalm_x, pair_arguments::psalm_y))
            .load(&mut conn)?;
        Ok(rows.into_iter().filter_map(|(x, y)| Pair::new(x, y)).collect())
    }

    /// Insert the argument for `pair` unless one exists; return the row id
    /// either way.
    ///
    /// When the row already exists its payload is left untouched, but any
    /// usage column that is still NULL takes the caller's value.
    pub fn insert_if_absent(
        &self,
        pair: Pair,
        payload: &GenerationPayload<'_>,
        usage: TokenUsage,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = timestamp_now();
        let response_json = payload.response_json.to_string();

        let new_row = NewPairArgument {
            psalm_x: pair.x,
            psalm_y: pair.y,
            prompt: payload.prompt,
            response_text: payload.response_text,
            response_json: &response_json,
            model: payload.model,
            created_at: &now,
            total_tokens: usage.total,
            reasoning_tokens: usage.reasoning,
            non_reasoning_tokens: usage.non_reasoning,
        };

        conn.immediate_transaction::<i32, DbError, _>(|conn| {
            let inserted = diesel::insert_or_ignore_into(pair_arguments::table)
                .values(&new_row)
                .execute(conn)?;

            let id: i32 = pair_arguments::table
                .filter(pair_arguments::psalm_x.eq(pair.x))
                .filter(pair_arguments::psalm_y.eq(pair.y))
                .select(pair_arguments::id)
                .first(conn)?;

            if inserted == 0 {
                debug!(x = pair.x, y = pair.y, id, "Pair already recorded, reusing existing row");
                backfill_usage(conn, id, usage)?;
            }
            Ok(id)
        })
    }

    /// Next `limit` unrecorded pairs in canonical order.
    pub fn pending_pairs(&self, limit: usize) -> Result<Vec<Pair>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let recorded = self.all_recorded_pairs()?;
        Ok(pair::pending_from(&recorded, limit))
    }

    pub fn counts(&self) -> Result<Counts> {
        let mut conn = self.get_conn()?;
        let generated: i64 = pair_arguments::table.count().get_result(&mut conn)?;
        let evaluated: i64 = pair_evaluations::table
            .select(diesel::dsl::count_distinct(pair_evaluations::pair_id))
            .first(&mut conn)?;
        Ok(Counts {
            generated,
            evaluated,
            total_pairs: TOTAL_PAIRS,
        })
    }

    pub fn get_pair(&self, pair: Pair) -> Result<Option<GenerationRecord>> {
        let mut conn = self.get_conn()?;
        let record = pair_arguments::table
            .filter(pair_arguments::psalm_x.eq(pair.x))
            .filter(pair_arguments::psalm_y.eq(pair.y))
            .select(GenerationRecord::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(record)
    }

    /// Newest arguments first, each with its current evaluation.
    pub fn recent_arguments(&self, limit: i64) -> Result<Vec<RecentArgument>> {
        let mut conn = self.get_conn()?;
        let records = pair_arguments::table
            .order(pair_arguments::id.desc())
            .limit(limit)
            .select(GenerationRecord::as_select())
            .load(&mut conn)?;

        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        let evaluations = pair_evaluations::table
            .filter(pair_evaluations::pair_id.eq_any(ids))
            .select(EvaluationRecord::as_select())
            .load(&mut conn)?;
        let current = latest_by_pair(evaluations);

        Ok(records
            .into_iter()
            .map(|record| {
                let evaluation = current.get(&record.id);
                RecentArgument {
                    id: record.id,
                    psalm_x: record.psalm_x,
                    psalm_y: record.psalm_y,
                    response_text: record.response_text,
                    created_at: record.created_at,
                    score: evaluation.map(|e| e.score),
                    justification: evaluation.map(|e| e.justification.clone()),
                    evaluator_version: evaluation.map(|e| e.evaluator_version),
                    evaluated_at: evaluation.map(|e| e.created_at.clone()),
                }
            })
            .collect())
    }

    // ========================================================================
    // Evaluation Ledger
    // ========================================================================

    /// Oldest generated arguments with no evaluation at any version.
    pub fn pending_evaluations(&self, limit: i64) -> Result<Vec<GenerationRecord>> {
        let mut conn = self.get_conn()?;
        let records = pair_arguments::table
            .left_join(pair_evaluations::table)
            .filter(pair_evaluations::id.is_null())
            .order(pair_arguments::id.asc())
            .limit(limit)
            .select(GenerationRecord::as_select())
            .load(&mut conn)?;
        Ok(records)
    }

    /// Oldest generated arguments with no evaluation at `version`.
    pub fn pending_evaluations_for_version(
        &self,
        version: i32,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>> {
        let mut conn = self.get_conn()?;
        let records = pair_arguments::table
            .left_join(
                pair_evaluations::table.on(pair_evaluations::pair_id
                    .eq(pair_arguments::id)
                    .and(pair_evaluations::evaluator_version.eq(version))),
            )
            .filter(pair_evaluations::id.is_null())
            .order(pair_arguments::id.asc())
            .limit(limit)
            .select(GenerationRecord::as_select())
            .load(&mut conn)?;
        Ok(records)
    }

    /// Write the evaluation of `pair_id` at `evaluation.evaluator_version`,
    /// replacing any earlier row for that same version.
    pub fn upsert_evaluation(&self, pair_id: i32, evaluation: &NewEvaluation) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = timestamp_now();
        let evaluation_json = evaluation.evaluation_json.to_string();
        let checks_json = serde_json::to_string(&evaluation.checks)
            .map_err(|e| DbError::Validation(format!("Could not encode checks: {}", e)))?;
        let flags_json = serde_json::to_string(&evaluation.flags)
            .map_err(|e| DbError::Validation(format!("Could not encode flags: {}", e)))?;

        let row = NewPairEvaluation {
            pair_id,
            score: evaluation.score,
            justification: &evaluation.justification,
            evaluator_model: &evaluation.evaluator_model,
            evaluator_version: evaluation.evaluator_version,
            evaluation_json: &evaluation_json,
            checks_json: Some(checks_json.as_str()),
            flags_json: Some(flags_json.as_str()),
            vocabulary_specificity: Some(evaluation.vocabulary_specificity),
            total_tokens: evaluation.usage.total,
            reasoning_tokens: evaluation.usage.reasoning,
            non_reasoning_tokens: evaluation.usage.non_reasoning,
            created_at: &now,
        };

        conn.immediate_transaction::<i32, DbError, _>(|conn| {
            let exists: i64 = pair_arguments::table
                .filter(pair_arguments::id.eq(pair_id))
                .count()
                .get_result(conn)?;
            if exists == 0 {
                return Err(DbError::Validation(format!(
                    "Pair argument {} does not exist. Run 'psalm-pairs pending' to see outstanding work.",
                    pair_id
                )));
            }

            diesel::replace_into(pair_evaluations::table)
                .values(&row)
                .execute(conn)?;

            let id: i32 = pair_evaluations::table
                .filter(pair_evaluations::pair_id.eq(pair_id))
                .filter(pair_evaluations::evaluator_version.eq(evaluation.evaluator_version))
                .select(pair_evaluations::id)
                .first(conn)?;
            Ok(id)
        })
    }

    /// Every evaluation of one argument, ascending by evaluator version.
    pub fn evaluations_for_pair(&self, pair_id: i32) -> Result<Vec<EvaluationRecord>> {
        let mut conn = self.get_conn()?;
        let rows = pair_evaluations::table
            .filter(pair_evaluations::pair_id.eq(pair_id))
            .order(pair_evaluations::evaluator_version.asc())
            .select(EvaluationRecord::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// All scores grouped by evaluator version.
    pub fn scores_by_version(&self) -> Result<BTreeMap<i32, Vec<f64>>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<(i32, f64)> = pair_evaluations::table
            .select((pair_evaluations::evaluator_version, pair_evaluations::score))
            .order(pair_evaluations::id.asc())
            .load(&mut conn)?;

        let mut grouped: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
        for (version, score) in rows {
            grouped.entry(version).or_default().push(score);
        }
        Ok(grouped)
    }

    // ========================================================================
    // Analytics inputs
    // ========================================================================

    /// Every generated pair with the score of its highest-version evaluation.
    pub fn pair_cells(&self) -> Result<Vec<PairCell>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<(i32, i32, Option<f64>, Option<i32>)> = pair_arguments::table
            .left_join(pair_evaluations::table)
            .select((
                pair_arguments::psalm_x,
                pair_arguments::psalm_y,
                pair_evaluations::score.nullable(),
                pair_evaluations::evaluator_version.nullable(),
            ))
            .load(&mut conn)?;

        let mut cells: BTreeMap<Pair, (Option<f64>, Option<i32>)> = BTreeMap::new();
        for (x, y, score, version) in rows {
            let Some(pair) = Pair::new(x, y) else {
                continue;
            };
            let entry = cells.entry(pair).or_insert((None, None));
            if version > entry.1 {
                *entry = (score, version);
            }
        }

        Ok(cells
            .into_iter()
            .map(|(pair, (score, _))| PairCell { pair, score })
            .collect())
    }

    pub fn score_matrix(&self) -> Result<nalgebra::DMatrix<f64>> {
        Ok(matrix::build_directed_score_matrix(&self.pair_cells()?))
    }

    pub fn status_matrix(&self) -> Result<StatusMatrix> {
        Ok(matrix::status_matrix(&self.pair_cells()?))
    }

    fn usage_rows(&self) -> Result<(Vec<UsageRow>, Vec<UsageRow>)> {
        let mut conn = self.get_conn()?;
        type Row = (String, Option<i64>, Option<i64>, Option<i64>);

        let generation: Vec<Row> = pair_arguments::table
            .select((
                pair_arguments::created_at,
                pair_arguments::total_tokens,
                pair_arguments::reasoning_tokens,
                pair_arguments::non_reasoning_tokens,
            ))
            .load(&mut conn)?;
        let evaluation: Vec<Row> = pair_evaluations::table
            .select((
                pair_evaluations::created_at,
                pair_evaluations::total_tokens,
                pair_evaluations::reasoning_tokens,
                pair_evaluations::non_reasoning_tokens,
            ))
            .load(&mut conn)?;

        let to_rows = |rows: Vec<Row>| -> Vec<UsageRow> {
            rows.into_iter()
                .map(|(created_at, total, reasoning, non_reasoning)| {
                    UsageRow::new(created_at, TokenUsage::new(total, reasoning, non_reasoning))
                })
                .collect()
        };
        Ok((to_rows(generation), to_rows(evaluation)))
    }

    pub fn usage_totals(&self) -> Result<UsageTotals> {
        let (generation, evaluation) = self.usage_rows()?;
        Ok(usage::usage_totals(&generation, &evaluation))
    }

    pub fn daily_usage(&self) -> Result<Vec<DailyUsageBucket>> {
        let (generation, evaluation) = self.usage_rows()?;
        Ok(usage::daily_usage(&generation, &evaluation))
    }

    pub fn daily_progress(&self) -> Result<Vec<DailyProgress>> {
        let (generation, _) = self.usage_rows()?;
        let mut conn = self.get_conn()?;
        let evaluated: Vec<(i32, String)> = pair_evaluations::table
            .select((pair_evaluations::pair_id, pair_evaluations::created_at))
            .load(&mut conn)?;
        Ok(usage::daily_progress(&generation, &evaluated))
    }

    // ========================================================================
    // Run Log
    // ========================================================================

    /// Open a run log entry; returns its run id.
    pub fn start_run(&self, pass: PassKind, model: &str, requested: usize) -> Result<String> {
        let mut conn = self.get_conn()?;
        let now = timestamp_now();
        let run_id = Uuid::new_v4().to_string();

        let new_run = NewPassRun {
            run_id: &run_id,
            pass: pass.as_str(),
            model,
            requested: i32::try_from(requested).unwrap_or(i32::MAX),
            processed: 0,
            status: "running",
            error: None,
            started_at: &now,
            completed_at: None,
        };

        diesel::insert_into(pass_runs::table)
            .values(&new_run)
            .execute(&mut conn)?;

        Ok(run_id)
    }

    /// Close a run log entry as completed, or failed when `error` is set.
    pub fn finish_run(&self, run_id: &str, processed: usize, error: Option<&str>) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = timestamp_now();
        let status = if error.is_some() { "failed" } else { "completed" };

        diesel::update(pass_runs::table.filter(pass_runs::run_id.eq(run_id)))
            .set((
                pass_runs::processed.eq(i32::try_from(processed).unwrap_or(i32::MAX)),
                pass_runs::status.eq(status),
                pass_runs::error.eq(error),
                pass_runs::completed_at.eq(Some(now.as_str())),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let mut conn = self.get_conn()?;
        let runs = pass_runs::table
            .order(pass_runs::id.desc())
            .limit(limit)
            .select(RunRecord::as_select())
            .load(&mut conn)?;
        Ok(runs)
    }
}

fn column_names(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let columns: Vec<PragmaTableInfo> =
        diesel::sql_query(format!("PRAGMA table_info({})", table)).load(conn)?;
    Ok(columns.into_iter().map(|c| c.name).collect())
}

fn apply_step(conn: &mut SqliteConnection, step: &MigrationStep) -> Result<()> {
    match step {
        MigrationStep::Sql(sql) => conn.batch_execute(sql)?,
        MigrationStep::AddColumn {
            table,
            column,
            definition,
        } => {
            let existing = column_names(conn, table)?;
            if !existing.iter().any(|name| name == column) {
                diesel::sql_query(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column, definition
                ))
                .execute(conn)?;
            }
        }
    }
    Ok(())
}

/// Fill usage columns that are still NULL; known values are never replaced.
fn backfill_usage(conn: &mut SqliteConnection, id: i32, usage: TokenUsage) -> Result<()> {
    if usage.is_unknown() {
        return Ok(());
    }
    diesel::sql_query(
        "UPDATE pair_arguments SET
            total_tokens = COALESCE(total_tokens, ?),
            reasoning_tokens = COALESCE(reasoning_tokens, ?),
            non_reasoning_tokens = COALESCE(non_reasoning_tokens, ?)
         WHERE id = ?",
    )
    .bind::<Nullable<BigInt>, _>(usage.total)
    .bind::<Nullable<BigInt>, _>(usage.reasoning)
    .bind::<Nullable<BigInt>, _>(usage.non_reasoning)
    .bind::<Integer, _>(id)
    .execute(conn)?;
    Ok(())
}

/// Highest-version evaluation per pair id.
fn latest_by_pair(evaluations: Vec<EvaluationRecord>) -> HashMap<i32, EvaluationRecord> {
    let mut latest: HashMap<i32, EvaluationRecord> = HashMap::new();
    for evaluation in evaluations {
        match latest.get(&evaluation.pair_id) {
            Some(existing) if existing.evaluator_version >= evaluation.evaluator_version => {}
            _ => {
                latest.insert(evaluation.pair_id, evaluation);
            }
        }
    }
    latest
}
