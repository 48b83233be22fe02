//! The structured scoring contract
//!
//! The evaluator must answer through a single `submit_evaluation` tool call.
//! [`Submission::from_arguments`] validates that payload; any missing field,
//! wrong type or out-of-range value is a contract violation for the item.

use crate::error::{Error, Result};
use crate::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

/// Name of the tool the evaluator must call.
pub const TOOL_NAME: &str = "submit_evaluation";

/// The five evidentiary checks, in contract order.
pub const CHECK_NAMES: [&str; 5] = [
    "has_verse_refs",
    "any_factual_error_detected",
    "only_generic_motifs",
    "counterargument_considered",
    "lxx_mt_numbering_acknowledged",
];

/// Anomaly tags the evaluator may raise.
pub const KNOWN_FLAGS: [&str; 6] = [
    "hallucination",
    "misquote",
    "no_refs",
    "generic",
    "structural_claim_error",
    "injection_attempt",
];

const REQUIRED_FIELDS: [&str; 4] = ["justification", "score", "checks", "vocabulary_specificity"];

/// Boolean facts about the argument's evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationChecks {
    pub has_verse_refs: bool,
    pub any_factual_error_detected: bool,
    pub only_generic_motifs: bool,
    pub counterargument_considered: bool,
    pub lxx_mt_numbering_acknowledged: bool,
}

impl EvaluationChecks {
    fn set(&mut self, name: &str, value: bool) {
        match name {
            "has_verse_refs" => self.has_verse_refs = value,
            "any_factual_error_detected" => self.any_factual_error_detected = value,
            "only_generic_motifs" => self.only_generic_motifs = value,
            "counterargument_considered" => self.counterargument_considered = value,
            "lxx_mt_numbering_acknowledged" => self.lxx_mt_numbering_acknowledged = value,
            _ => {}
        }
    }

    /// `(name, value)` pairs in contract order.
    pub fn entries(&self) -> [(&'static str, bool); 5] {
        [
            (CHECK_NAMES[0], self.has_verse_refs),
            (CHECK_NAMES[1], self.any_factual_error_detected),
            (CHECK_NAMES[2], self.only_generic_motifs),
            (CHECK_NAMES[3], self.counterargument_considered),
            (CHECK_NAMES[4], self.lxx_mt_numbering_acknowledged),
        ]
    }
}

/// A validated evaluator answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub justification: String,
    pub checks: EvaluationChecks,
    pub vocabulary_specificity: f64,
    pub flags: Vec<String>,
    pub score: f64,
}

impl Submission {
    /// Validate tool-call arguments, given either as an object or as the raw
    /// JSON string the service returned.
    pub fn from_arguments(arguments: &Value) -> Result<Self> {
        let parsed;
        let payload = match arguments {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).map_err(|e| {
                    Error::contract("arguments", format!("not valid JSON: {}", e))
                })?;
                &parsed
            }
            other => other,
        };
        let object = payload
            .as_object()
            .ok_or_else(|| Error::contract("arguments", format!("expected an object, got {}", payload)))?;

        warn_on_key_order(object);

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !object.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(Error::contract(
                "arguments",
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        let justification = match &object["justification"] {
            Value::String(text) => text.clone(),
            other => {
                return Err(Error::contract(
                    "justification",
                    format!("expected a string, got {}", other),
                ))
            }
        };

        let score = number_in_range(&object["score"], "score", 0.0, 10.0)?;
        let vocabulary_specificity = number_in_range(
            &object["vocabulary_specificity"],
            "vocabulary_specificity",
            1.0,
            10.0,
        )?;
        let checks = parse_checks(&object["checks"])?;
        let flags = parse_flags(object.get("flags"))?;

        Ok(Self {
            justification,
            checks,
            vocabulary_specificity,
            flags,
            score,
        })
    }
}

fn warn_on_key_order(object: &Map<String, Value>) {
    if let Some(first) = object.keys().next() {
        if first != "justification" {
            warn!(first = %first, "{} arguments should list justification first", TOOL_NAME);
        }
    }
    if let Some(last) = object.keys().next_back() {
        if last != "score" {
            warn!(last = %last, "{} arguments should list score last", TOOL_NAME);
        }
    }
}

/// A JSON number, or a string holding one.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn number_in_range(value: &Value, field: &str, min: f64, max: f64) -> Result<f64> {
    let number = as_number(value)
        .ok_or_else(|| Error::contract(field, format!("expected a number, got {}", value)))?;
    if !(min..=max).contains(&number) {
        return Err(Error::contract(
            field,
            format!("{} is outside {}..={}", number, min, max),
        ));
    }
    Ok(number)
}

fn parse_checks(value: &Value) -> Result<EvaluationChecks> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::contract("checks", format!("expected an object, got {}", value)))?;

    let missing: Vec<&str> = CHECK_NAMES
        .iter()
        .copied()
        .filter(|name| !object.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::contract(
            "checks",
            format!("missing required checks: {}", missing.join(", ")),
        ));
    }

    let mut checks = EvaluationChecks::default();
    for name in CHECK_NAMES {
        let value = match &object[name] {
            Value::Bool(b) => *b,
            Value::Number(n) if n.as_i64() == Some(0) => false,
            Value::Number(n) if n.as_i64() == Some(1) => true,
            other => {
                return Err(Error::contract(
                    format!("checks.{}", name),
                    format!("expected a boolean, got {}", other),
                ))
            }
        };
        checks.set(name, value);
    }
    Ok(checks)
}

fn parse_flags(value: Option<&Value>) -> Result<Vec<String>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(Error::contract(
                "flags",
                format!("expected a list of strings, got {}", other),
            ))
        }
    };

    let mut flags: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let flag = item.as_str().ok_or_else(|| {
            Error::contract("flags", format!("expected a string flag, got {}", item))
        })?;
        if !KNOWN_FLAGS.contains(&flag) {
            warn!(flag = %flag, "unrecognised evaluation flag");
        }
        if !flags.iter().any(|f| f == flag) {
            flags.push(flag.to_string());
        }
    }
    Ok(flags)
}

/// JSON schema for the `submit_evaluation` tool parameters.
pub fn tool_parameters() -> Value {
    let check_properties: Map<String, Value> = CHECK_NAMES
        .iter()
        .map(|name| (name.to_string(), json!({ "type": "boolean" })))
        .collect();

    json!({
        "type": "object",
        "properties": {
            "justification": {
                "type": "string",
                "description": "At most 35 words. The decisive evidence and any cap applied."
            },
            "checks": {
                "type": "object",
                "properties": check_properties,
                "required": CHECK_NAMES,
            },
            "vocabulary_specificity": {
                "type": "number",
                "minimum": 1,
                "maximum": 10,
                "description": "1 = shared vocabulary is ubiquitous; 10 = essentially unique within the Psalter."
            },
            "flags": {
                "type": "array",
                "items": { "type": "string", "enum": KNOWN_FLAGS }
            },
            "score": {
                "type": "number",
                "minimum": 0,
                "maximum": 10,
                "description": "Score between 0 and 10 using the full scale."
            }
        },
        "required": REQUIRED_FIELDS,
    })
}

/// A new evaluation ready to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluation {
    pub score: f64,
    pub justification: String,
    pub checks: EvaluationChecks,
    pub flags: Vec<String>,
    pub vocabulary_specificity: f64,
    pub evaluator_model: String,
    pub evaluator_version: i32,
    pub evaluation_json: Value,
    pub usage: TokenUsage,
}

impl NewEvaluation {
    pub fn from_submission(
        submission: Submission,
        evaluator_model: &str,
        evaluator_version: i32,
        usage: TokenUsage,
    ) -> Self {
        let evaluation_json = serde_json::to_value(&submission).unwrap_or(Value::Null);
        Self {
            score: submission.score,
            justification: submission.justification,
            checks: submission.checks,
            flags: submission.flags,
            vocabulary_specificity: submission.vocabulary_specificity,
            evaluator_model: evaluator_model.to_string(),
            evaluator_version,
            evaluation_json,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Value {
        json!({
            "justification": "Shared rare imagery in 3:4 and 4:2; no cap applies.",
            "checks": {
                "has_verse_refs": true,
                "any_factual_error_detected": false,
                "only_generic_motifs": false,
                "counterargument_considered": true,
                "lxx_mt_numbering_acknowledged": 0
            },
            "vocabulary_specificity": 6,
            "flags": ["generic", "generic"],
            "score": 5.5
        })
    }

    fn field_of(err: Error) -> String {
        match err {
            Error::Contract { field, .. } => field,
            other => panic!("expected contract violation, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_object() {
        let s = Submission::from_arguments(&valid()).unwrap();
        assert_eq!(s.score, 5.5);
        assert_eq!(s.vocabulary_specificity, 6.0);
        assert!(s.checks.has_verse_refs);
        assert!(!s.checks.lxx_mt_numbering_acknowledged);
        assert_eq!(s.flags, vec!["generic".to_string()]);
    }

    #[test]
    fn test_valid_string_arguments() {
        let raw = Value::String(valid().to_string());
        let s = Submission::from_arguments(&raw).unwrap();
        assert!(s.checks.counterargument_considered);
    }

    #[test]
    fn test_flags_optional_or_null() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("flags");
        assert!(Submission::from_arguments(&v).unwrap().flags.is_empty());

        v["flags"] = Value::Null;
        assert!(Submission::from_arguments(&v).unwrap().flags.is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("score");
        let err = Submission::from_arguments(&v).unwrap_err();
        assert!(err.to_string().contains("score"));
        assert_eq!(field_of(err), "arguments");
    }

    #[test]
    fn test_score_out_of_range() {
        let mut v = valid();
        v["score"] = json!(11);
        assert_eq!(field_of(Submission::from_arguments(&v).unwrap_err()), "score");
    }

    #[test]
    fn test_vocabulary_specificity_out_of_range() {
        let mut v = valid();
        v["vocabulary_specificity"] = json!(0.5);
        assert_eq!(
            field_of(Submission::from_arguments(&v).unwrap_err()),
            "vocabulary_specificity"
        );
    }

    #[test]
    fn test_score_wrong_type() {
        let mut v = valid();
        v["score"] = json!(["7"]);
        assert_eq!(field_of(Submission::from_arguments(&v).unwrap_err()), "score");

        v["score"] = json!("7.5");
        assert_eq!(Submission::from_arguments(&v).unwrap().score, 7.5);
    }

    #[test]
    fn test_non_boolean_check() {
        let mut v = valid();
        v["checks"]["has_verse_refs"] = json!("yes");
        assert_eq!(
            field_of(Submission::from_arguments(&v).unwrap_err()),
            "checks.has_verse_refs"
        );
    }

    #[test]
    fn test_missing_check() {
        let mut v = valid();
        v["checks"].as_object_mut().unwrap().remove("only_generic_motifs");
        let err = Submission::from_arguments(&v).unwrap_err();
        assert!(err.to_string().contains("only_generic_motifs"));
    }

    #[test]
    fn test_bad_flags() {
        let mut v = valid();
        v["flags"] = json!("generic");
        assert_eq!(field_of(Submission::from_arguments(&v).unwrap_err()), "flags");

        v["flags"] = json!([1, 2]);
        assert_eq!(field_of(Submission::from_arguments(&v).unwrap_err()), "flags");
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(field_of(Submission::from_arguments(&json!([1])).unwrap_err()), "arguments");
        assert_eq!(
            field_of(Submission::from_arguments(&Value::String("{oops".into())).unwrap_err()),
            "arguments"
        );
    }

    #[test]
    fn test_tool_parameters_lists_required() {
        let schema = tool_parameters();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 4);
        assert_eq!(
            schema["properties"]["checks"]["required"].as_array().unwrap().len(),
            5
        );
    }

    #[test]
    fn test_new_evaluation_keeps_payload() {
        let s = Submission::from_arguments(&valid()).unwrap();
        let e = NewEvaluation::from_submission(s, "gpt-5", 2, TokenUsage::default());
        assert_eq!(e.evaluator_version, 2);
        assert_eq!(e.evaluation_json["score"], json!(5.5));
    }
}
