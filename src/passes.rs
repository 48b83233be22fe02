//! Generation and evaluation pass drivers
//!
//! Each pass pulls a batch of outstanding work from the ledger, calls the
//! completion service once per item and persists the result before moving
//! on. The first failing item stops the pass; everything written before it
//! stays committed, so re-running resumes where the last run stopped.

use crate::client::{CompletionClient, CompletionRequest, ToolSpec};
use crate::corpus::Corpus;
use crate::db::{Database, DbError, GenerationPayload, GenerationRecord, PassKind};
use crate::error::{Error, Result};
use crate::evaluation::{self, NewEvaluation, Submission, TOOL_NAME};
use crate::pair::Pair;
use crate::prompts;
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_LIMIT: usize = 50;
pub const DEFAULT_EVALUATOR_VERSION: i32 = 2;

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub limit: usize,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    pub model: String,
    pub limit: usize,
    pub evaluator_version: i32,
    pub reasoning_effort: Option<String>,
    /// Queue arguments that lack a score at `evaluator_version`, even if an
    /// older version already scored them.
    pub rescore: bool,
}

/// What one pass run did.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub run_id: Option<String>,
    pub requested: usize,
    pub processed: Vec<Pair>,
}

impl PassSummary {
    fn idle() -> Self {
        Self {
            run_id: None,
            requested: 0,
            processed: Vec::new(),
        }
    }
}

/// Generate arguments for the next `options.limit` pending pairs.
pub fn run_generation(
    db: &Database,
    corpus: &Corpus,
    client: &dyn CompletionClient,
    options: &GenerationOptions,
) -> Result<PassSummary> {
    let pending = db.pending_pairs(options.limit)?;
    if pending.is_empty() {
        info!("No pending pairs to generate");
        return Ok(PassSummary::idle());
    }

    let run_id = db.start_run(PassKind::Generate, &options.model, pending.len())?;
    info!(run_id = %run_id, requested = pending.len(), model = %options.model, "Starting generation pass");

    let mut processed = Vec::with_capacity(pending.len());
    for pair in &pending {
        if let Err(e) = generate_one(db, corpus, client, options, *pair) {
            warn!(pair = %pair, error = %e, "Generation failed, stopping pass");
            db.finish_run(&run_id, processed.len(), Some(&e.to_string()))?;
            return Err(e);
        }
        processed.push(*pair);
    }

    db.finish_run(&run_id, processed.len(), None)?;
    Ok(PassSummary {
        run_id: Some(run_id),
        requested: pending.len(),
        processed,
    })
}

fn generate_one(
    db: &Database,
    corpus: &Corpus,
    client: &dyn CompletionClient,
    options: &GenerationOptions,
    pair: Pair,
) -> Result<i32> {
    let psalm_x = corpus.format_psalm(pair.x)?;
    let psalm_y = corpus.format_psalm(pair.y)?;
    let prompt = prompts::generation_prompt(pair, &psalm_x, &psalm_y);

    let request = CompletionRequest {
        model: options.model.clone(),
        input: prompt.clone(),
        reasoning_effort: options.reasoning_effort.clone(),
        verbosity: options.verbosity.clone(),
        tool: None,
    };
    let completion = client.complete(&request)?;
    if completion.text.trim().is_empty() {
        return Err(Error::contract("output_text", "completion contained no text"));
    }

    let payload = GenerationPayload {
        prompt: &prompt,
        response_text: &completion.text,
        response_json: &completion.response,
        model: &options.model,
    };
    let id = db.insert_if_absent(pair, &payload, completion.usage)?;
    info!(
        pair = %pair,
        id,
        total_tokens = ?completion.usage.total,
        "Stored argument"
    );
    Ok(id)
}

/// Score the next `options.limit` unevaluated arguments.
pub fn run_evaluation(
    db: &Database,
    corpus: &Corpus,
    client: &dyn CompletionClient,
    options: &EvaluationOptions,
) -> Result<PassSummary> {
    let limit = i64::try_from(options.limit).unwrap_or(i64::MAX);
    let pending = if options.rescore {
        db.pending_evaluations_for_version(options.evaluator_version, limit)?
    } else {
        db.pending_evaluations(limit)?
    };
    if pending.is_empty() {
        info!("No arguments awaiting evaluation");
        return Ok(PassSummary::idle());
    }

    let run_id = db.start_run(PassKind::Evaluate, &options.model, pending.len())?;
    info!(
        run_id = %run_id,
        requested = pending.len(),
        evaluator_version = options.evaluator_version,
        "Starting evaluation pass"
    );

    let mut processed = Vec::with_capacity(pending.len());
    for record in &pending {
        match evaluate_one(db, corpus, client, options, record) {
            Ok(pair) => processed.push(pair),
            Err(e) => {
                warn!(id = record.id, error = %e, "Evaluation failed, stopping pass");
                db.finish_run(&run_id, processed.len(), Some(&e.to_string()))?;
                return Err(e);
            }
        }
    }

    db.finish_run(&run_id, processed.len(), None)?;
    Ok(PassSummary {
        run_id: Some(run_id),
        requested: pending.len(),
        processed,
    })
}

fn evaluation_tool() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Record the score and evidence checks for the argument.".to_string(),
        parameters: evaluation::tool_parameters(),
    }
}

fn evaluate_one(
    db: &Database,
    corpus: &Corpus,
    client: &dyn CompletionClient,
    options: &EvaluationOptions,
    record: &GenerationRecord,
) -> Result<Pair> {
    let pair = record.pair().ok_or_else(|| {
        DbError::Validation(format!(
            "Stored argument {} has an invalid pair ({}, {})",
            record.id, record.psalm_x, record.psalm_y
        ))
    })?;

    let psalm_x = corpus.format_psalm(pair.x)?;
    let psalm_y = corpus.format_psalm(pair.y)?;
    let request = CompletionRequest {
        model: options.model.clone(),
        input: prompts::evaluation_input(pair, &psalm_x, &psalm_y, &record.response_text),
        reasoning_effort: options.reasoning_effort.clone(),
        verbosity: None,
        tool: Some(evaluation_tool()),
    };

    let completion = client.complete(&request)?;
    let arguments = completion
        .tool_arguments
        .as_ref()
        .ok_or_else(|| Error::contract(TOOL_NAME, "response did not call the tool"))?;
    let submission = Submission::from_arguments(arguments)?;
    let evaluation = NewEvaluation::from_submission(
        submission,
        &options.model,
        options.evaluator_version,
        completion.usage,
    );

    db.upsert_evaluation(record.id, &evaluation)?;
    info!(
        pair = %pair,
        score = evaluation.score,
        evaluator_version = options.evaluator_version,
        "Stored evaluation"
    );
    Ok(pair)
}
