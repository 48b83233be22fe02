use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use psalm_pairs::client::OpenAiClient;
use psalm_pairs::export::{self, MatrixFormat};
use psalm_pairs::matrix::{self, SymmetryMode};
use psalm_pairs::passes::{self, EvaluationOptions, GenerationOptions, PassSummary};
use psalm_pairs::usage::ProgressKey;
use psalm_pairs::{db, projection, report};
use psalm_pairs::{Config, Corpus, Database, Pair, Projection, Result};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "psalm-pairs")]
#[command(author, version, about = "Psalm pair arguments: generate, evaluate and track progress across all 22350 ordered pairs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// SQLite store (overrides config and PSALM_PAIRS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (default: nearest psalm-pairs.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate arguments for the next pending pairs
    Generate {
        /// Maximum pairs to process
        #[arg(short, long)]
        limit: Option<usize>,

        /// Completion model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Score generated arguments that have no evaluation yet
    Evaluate {
        /// Maximum arguments to process
        #[arg(short, long)]
        limit: Option<usize>,

        /// Evaluator model
        #[arg(short, long)]
        model: Option<String>,

        /// Version stamped on the new evaluations
        #[arg(long)]
        evaluator_version: Option<i32>,

        /// Also queue arguments scored only by an older evaluator version
        #[arg(long)]
        rescore: bool,
    },

    /// Show the pairs the next generation run would process
    Pending {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Progress counts and completion forecasts
    Status,

    /// Token usage totals
    Usage {
        /// Per-day breakdown
        #[arg(long)]
        daily: bool,
    },

    /// Argument and evaluation history for one pair
    History {
        /// Earlier psalm
        #[arg(value_parser = clap::value_parser!(i32).range(1..=150))]
        x: i32,

        /// Later psalm
        #[arg(value_parser = clap::value_parser!(i32).range(1..=150))]
        y: i32,
    },

    /// Recent generation and evaluation runs
    Runs {
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Export the score matrix
    Matrix {
        /// Symmetrize with min, avg or max (default: directed scores)
        #[arg(long)]
        mode: Option<SymmetryMode>,

        /// Convert to distances (2^-score); uses avg unless --mode is given
        #[arg(long)]
        distance: bool,

        /// Export the coverage status grid instead of scores (always JSON)
        #[arg(long, conflicts_with_all = ["mode", "distance"])]
        status: bool,

        /// csv or json
        #[arg(short, long, default_value = "csv")]
        format: MatrixFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full progress report as JSON
    Report {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of recent arguments to include
        #[arg(long, default_value = "20")]
        recent: i64,

        /// Also write one distance matrix per symmetry mode into this directory
        #[arg(long)]
        matrices: Option<PathBuf>,

        /// Encoding for --matrices
        #[arg(long, default_value = "csv")]
        matrix_format: MatrixFormat,
    },

    /// Show applied schema migrations
    Migrations,

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.quiet, args.verbose);

    if let Err(e) = run(args) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(if e.is_config() { 2 } else { 1 });
    }
}

fn run(args: Args) -> Result<()> {
    if let Command::Completion { shell } = args.command {
        let mut cmd = Args::command();
        generate(shell, &mut cmd, "psalm-pairs", &mut std::io::stdout());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let db_path = args.db.clone().unwrap_or_else(|| config.db_path());

    match args.command {
        Command::Generate { limit, model } => {
            let client = OpenAiClient::from_env(&config.client.base_url, config.client_timeout())?;
            let db = Database::open_at(&db_path)?;
            let corpus = Corpus::new(config.corpus_dir());
            if corpus.available().is_empty() {
                warn!(dir = %corpus.dir().display(), "No psalm files found");
            }
            let options = GenerationOptions {
                model: model.unwrap_or_else(|| config.generation.model.clone()),
                limit: limit.unwrap_or(config.generation.limit),
                reasoning_effort: config.generation.reasoning_effort.clone(),
                verbosity: config.generation.verbosity.clone(),
            };
            let summary = passes::run_generation(&db, &corpus, &client, &options)?;
            print_summary("Generated", &summary);
        }

        Command::Evaluate {
            limit,
            model,
            evaluator_version,
            rescore,
        } => {
            let client = OpenAiClient::from_env(&config.client.base_url, config.client_timeout())?;
            let db = Database::open_at(&db_path)?;
            let corpus = Corpus::new(config.corpus_dir());
            let options = EvaluationOptions {
                model: model.unwrap_or_else(|| config.evaluation.model.clone()),
                limit: limit.unwrap_or(config.evaluation.limit),
                evaluator_version: evaluator_version.unwrap_or(config.evaluation.version),
                reasoning_effort: config.evaluation.reasoning_effort.clone(),
                rescore,
            };
            let summary = passes::run_evaluation(&db, &corpus, &client, &options)?;
            print_summary("Evaluated", &summary);
        }

        Command::Pending { limit } => {
            let db = Database::open_at(&db_path)?;
            let pending = db.pending_pairs(limit)?;
            if pending.is_empty() {
                println!("{}", "All pairs have been generated.".green());
            } else {
                println!("{}", format!("Next {} pending pairs:", pending.len()).cyan().bold());
                for pair in pending {
                    println!("   {}", pair);
                }
            }
        }

        Command::Status => {
            let db = Database::open_at(&db_path)?;
            let counts = db.counts()?;
            let daily = db.daily_progress()?;
            let window = config.projection.window_days;

            println!("\n{}", "Psalm pair progress".cyan().bold());
            print_count("Generated", counts.generated, counts.total_pairs);
            print_count("Evaluated", counts.evaluated, counts.total_pairs);
            println!();

            let generation = projection::project_completion_today(
                counts.total_pairs,
                counts.generated,
                &daily,
                ProgressKey::Generated,
                window,
            );
            let evaluation = projection::project_completion_today(
                counts.total_pairs,
                counts.evaluated,
                &daily,
                ProgressKey::Evaluated,
                window,
            );
            print_projection("Generation completion", &generation);
            print_projection("Evaluation completion", &evaluation);
            println!();
        }

        Command::Usage { daily } => {
            let db = Database::open_at(&db_path)?;
            let totals = db.usage_totals()?;

            println!("\n{}", "Token usage".cyan().bold());
            println!("   {:<12} {:>14} {:>14} {:>14}", "", "total", "reasoning", "non-reasoning");
            println!(
                "   {:<12} {:>14} {:>14} {:>14}",
                "generation", totals.generation_total, totals.generation_reasoning, totals.generation_non_reasoning
            );
            println!(
                "   {:<12} {:>14} {:>14} {:>14}",
                "evaluation", totals.evaluation_total, totals.evaluation_reasoning, totals.evaluation_non_reasoning
            );
            println!(
                "   {:<12} {:>14} {:>14} {:>14}",
                "overall".bold(),
                totals.overall_total,
                totals.overall_reasoning,
                totals.overall_non_reasoning
            );

            if daily {
                println!("\n{}", "Daily".cyan().bold());
                for bucket in db.daily_usage()? {
                    println!(
                        "   {}  gen {:>10}  eval {:>10}  total {:>10}",
                        bucket.day, bucket.generation_total, bucket.evaluation_total, bucket.total
                    );
                }
            }
            println!();
        }

        Command::History { x, y } => {
            let Some(pair) = Pair::new(x, y) else {
                Args::command()
                    .error(
                        clap::error::ErrorKind::ValueValidation,
                        "a pair needs two different psalms",
                    )
                    .exit();
            };
            let db = Database::open_at(&db_path)?;
            print_history(&db, pair)?;
        }

        Command::Runs { limit } => {
            let db = Database::open_at(&db_path)?;
            let runs = db.recent_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for run in runs {
                let status = match run.status.as_str() {
                    "completed" => run.status.green(),
                    "failed" => run.status.red(),
                    _ => run.status.yellow(),
                };
                println!(
                    "{}  {:<8} {:<10} {}/{}  {}",
                    run.started_at, run.pass, status, run.processed, run.requested, run.model
                );
                if let Some(error) = run.error {
                    println!("   {}", error.dimmed());
                }
            }
        }

        Command::Matrix {
            mode,
            distance,
            status,
            format,
            output,
        } => {
            let db = Database::open_at(&db_path)?;
            let rendered = if status {
                serde_json::to_string_pretty(&export::status_matrix_to_json(&db.status_matrix()?))?
            } else {
                let directed = db.score_matrix()?;
                let selected = match (mode, distance) {
                    (None, false) => directed,
                    (Some(mode), false) => matrix::symmetrize(&directed, mode),
                    (mode, true) => matrix::to_distance(&matrix::symmetrize(
                        &directed,
                        mode.unwrap_or(SymmetryMode::Average),
                    )),
                };
                export::render_matrix(&selected, format)?
            };
            emit(output, &rendered)?;
        }

        Command::Report {
            output,
            recent,
            matrices,
            matrix_format,
        } => {
            let db = Database::open_at(&db_path)?;
            let today = Utc::now().date_naive();
            let report = report::build_report(&db, config.projection.window_days, recent, today)?;
            if let Some(dir) = matrices {
                let written = export::write_distance_matrices(&dir, &db.score_matrix()?, matrix_format)?;
                for path in written {
                    eprintln!("{} {}", "Wrote".green(), path.display());
                }
            }
            emit(output, &export::report_to_json(&report)?)?;
        }

        Command::Migrations => {
            let db = Database::open_at(&db_path)?;
            println!("\n{}", "Schema migrations".cyan().bold());
            for migration in db.applied_migrations()? {
                println!(
                    "   {} {:>2} {:<24} {}",
                    "✓".green(),
                    migration.version,
                    migration.name,
                    migration.applied_at.dimmed()
                );
            }
            println!("   Current version: {}\n", db::current_schema_version());
        }

        Command::Completion { .. } => {}
    }

    Ok(())
}

fn print_summary(verb: &str, summary: &PassSummary) {
    if summary.processed.is_empty() {
        println!("{}", "Nothing to do.".yellow());
        return;
    }
    println!(
        "{} {} of {} requested",
        verb.green().bold(),
        summary.processed.len(),
        summary.requested
    );
    for pair in &summary.processed {
        println!("   {}", pair);
    }
}

fn print_count(label: &str, done: i64, total: i64) {
    let percent = if total > 0 {
        done as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    println!("   {:<10} {:>6} / {} ({:.2}%)", label, done, total, percent);
}

fn print_projection(label: &str, projection: &Projection) {
    let value = if projection.is_defined() {
        projection.label().green()
    } else {
        projection.label().yellow()
    };
    let note = projection.note();
    if note.is_empty() {
        println!("   {}: {}", label, value);
    } else {
        println!("   {}: {}  {}", label, value, note.dimmed());
    }
}

fn print_history(db: &Database, pair: Pair) -> Result<()> {
    let Some(record) = db.get_pair(pair)? else {
        println!("{} has not been generated yet.", pair);
        return Ok(());
    };

    println!("\n{} {}", "Pair".cyan().bold(), pair);
    println!("   Model: {}  Created: {}", record.model, record.created_at);
    let usage = record.usage();
    if let Some(total) = usage.total {
        println!(
            "   Tokens: {} total, {} reasoning, {} non-reasoning",
            total,
            usage.reasoning.unwrap_or(0),
            usage.resolved_non_reasoning()
        );
    }
    println!("\n{}\n", record.response_text);

    let reverse = pair.reversed();
    if db.record_exists(reverse)? {
        println!("   See also: {}", format!("psalm-pairs history {} {}", reverse.x, reverse.y).cyan());
    }

    let evaluations = db.evaluations_for_pair(record.id)?;
    if evaluations.is_empty() {
        println!("{}", "Not evaluated yet.".yellow());
        return Ok(());
    }
    for evaluation in evaluations {
        println!(
            "   {} v{}  score {:.1}  {}",
            "Evaluation".bold(),
            evaluation.evaluator_version,
            evaluation.score,
            evaluation.created_at.dimmed()
        );
        println!("      {}", evaluation.justification);
        if let Some(checks) = evaluation.checks() {
            let marks: Vec<String> = checks
                .entries()
                .iter()
                .map(|(name, value)| format!("{}={}", name, if *value { "yes" } else { "no" }))
                .collect();
            println!("      {}", marks.join("  ").dimmed());
        }
        let flags = evaluation.flags();
        if !flags.is_empty() {
            println!("      flags: {}", flags.join(", ").red());
        }
    }
    println!();
    Ok(())
}

/// Print to stdout or write to `output`.
fn emit(output: Option<PathBuf>, contents: &str) -> Result<()> {
    match output {
        Some(path) => {
            export::write_output(&path, contents)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
        None if contents.ends_with('\n') => print!("{}", contents),
        None => println!("{}", contents),
    }
    Ok(())
}
