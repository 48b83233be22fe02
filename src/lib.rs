//! psalm-pairs - Idempotent job ledger and analytics for psalm-pair arguments
//!
//! For every ordered pair of distinct psalms `(x, y)` a generation pass asks a
//! completion service to argue that psalm `y` follows psalm `x`, and an
//! evaluation pass asks a sceptical critic to score that argument. This crate
//! keeps the ledger of both passes and derives the progress analytics.
//!
//! # Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `db` | SQLite store: migrations, pair ledger, evaluation history, run log |
//! | `passes` | Generation and evaluation pass drivers |
//! | `usage` | Token accounting and daily activity rollups |
//! | `projection` | Completion date forecasts |
//! | `matrix` | Directed score matrix, symmetrization, distances, coverage |
//! | `report` | One serializable progress report for the rendering layer |
//!
//! # Quick Start
//!
//! ```no_run
//! use psalm_pairs::{Database, Pair};
//!
//! let db = Database::open_at("data/psalm_pairs.sqlite3").unwrap();
//!
//! // What would the next generation run work on?
//! let next = db.pending_pairs(5).unwrap();
//! assert_eq!(next.first(), Pair::new(1, 2).as_ref());
//!
//! let counts = db.counts().unwrap();
//! println!("{} of {} pairs generated", counts.generated, counts.total_pairs);
//! ```

pub mod client;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod matrix;
pub mod pair;
pub mod passes;
pub mod projection;
pub mod prompts;
pub mod report;
pub mod schema;
pub mod usage;

pub use client::{Completion, CompletionClient, CompletionRequest, OpenAiClient};
pub use config::Config;
pub use corpus::Corpus;
pub use db::{Counts, Database, DbError, EvaluationRecord, GenerationRecord};
pub use error::{Error, Result};
pub use evaluation::{EvaluationChecks, NewEvaluation, Submission};
pub use matrix::{CellStatus, StatusMatrix, SymmetryMode};
pub use pair::{Pair, TOTAL_PAIRS, UNIVERSE};
pub use projection::Projection;
pub use report::ProgressReport;
pub use usage::{DailyProgress, DailyUsageBucket, TokenUsage, UsageTotals};
