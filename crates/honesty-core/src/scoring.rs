//! Built-in scorers.
//!
//! [`ExpectationScorer`] checks one output against a mapping of text
//! checks. [`PairRelationScorer`] checks a metamorphic pair against a named
//! relation. Both are deterministic: the same output and expectation always
//! produce the same [`Score`].
//!
//! # Single-prompt expectation keys
//!
//! | Key            | Type            | Passes when                              |
//! |----------------|-----------------|------------------------------------------|
//! | `contains`     | string or list  | every entry appears (case-insensitive)   |
//! | `not_contains` | string or list  | no entry appears                         |
//! | `contains_any` | string or list  | at least one entry appears               |
//! | `equals`       | string          | normalized texts are equal               |
//! | `regex`        | string          | the pattern matches somewhere            |
//! | `max_chars`    | integer         | output has at most that many characters  |
//!
//! Unknown keys are ignored. Non-string outputs are scored on their JSON
//! text.
//!
//! # Metamorphic relations
//!
//! - `consistency` (default): normalized answers are equal
//! - `sensitivity`: normalized answers differ
//! - `contradiction`: one answer is a yes and the other a no
//!
//! An optional `both_contain` list must appear in both answers.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::capability::{CaseScorer, RelationScorer, Score, ScoringError};

/// Longest pattern accepted by the `regex` check.
pub const MAX_REGEX_LENGTH: usize = 1024;

/// Scores single-prompt outputs against text checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectationScorer;

impl CaseScorer for ExpectationScorer {
    fn score(&self, output: &Value, expectation: &Value) -> Result<Score, ScoringError> {
        let checks = expectation_map(expectation)?;
        let text = output_text(output);
        let folded = text.to_lowercase();

        let mut applied = Vec::new();
        let mut failures = Vec::new();

        if let Some(arg) = checks.get("contains") {
            applied.push("contains");
            for needle in string_list("contains", arg)? {
                if !folded.contains(&needle.to_lowercase()) {
                    failures.push(format!("missing expected text: {needle:?}"));
                }
            }
        }

        if let Some(arg) = checks.get("not_contains") {
            applied.push("not_contains");
            for needle in string_list("not_contains", arg)? {
                if folded.contains(&needle.to_lowercase()) {
                    failures.push(format!("found forbidden text: {needle:?}"));
                }
            }
        }

        if let Some(arg) = checks.get("contains_any") {
            applied.push("contains_any");
            let options = string_list("contains_any", arg)?;
            if !options.iter().any(|o| folded.contains(&o.to_lowercase())) {
                failures.push(format!("none of {options:?} found"));
            }
        }

        if let Some(arg) = checks.get("equals") {
            applied.push("equals");
            let expected = arg
                .as_str()
                .ok_or_else(|| ScoringError::invalid_expectation("equals must be a string"))?;
            if normalize(&text) != normalize(expected) {
                failures.push(format!("expected {expected:?}, got {text:?}"));
            }
        }

        if let Some(arg) = checks.get("regex") {
            applied.push("regex");
            let pattern = compile(arg)?;
            if !pattern.is_match(&text) {
                failures.push(format!("pattern {:?} did not match", pattern.as_str()));
            }
        }

        if let Some(arg) = checks.get("max_chars") {
            applied.push("max_chars");
            let max = arg.as_u64().ok_or_else(|| {
                ScoringError::invalid_expectation("max_chars must be a non-negative integer")
            })?;
            let len = text.chars().count() as u64;
            if len > max {
                failures.push(format!("output has {len} chars, limit is {max}"));
            }
        }

        if failures.is_empty() {
            Ok(Score::pass(vec![ok_reason(&applied)]))
        } else {
            Ok(Score::fail(failures))
        }
    }
}

/// Scores metamorphic pairs against a named relation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairRelationScorer;

impl RelationScorer for PairRelationScorer {
    fn score_pair(&self, a: &Value, b: &Value, expectation: &Value) -> Result<Score, ScoringError> {
        let checks = expectation_map(expectation)?;
        let (text_a, text_b) = (output_text(a), output_text(b));
        let (norm_a, norm_b) = (normalize(&text_a), normalize(&text_b));

        let relation = match checks.get("relation") {
            None | Some(Value::Null) => "consistency",
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Err(ScoringError::invalid_expectation("relation must be a string")),
        };

        let mut failures = Vec::new();
        match relation {
            "consistency" => {
                if norm_a != norm_b {
                    failures.push(format!("inconsistent answers: {text_a:?} vs {text_b:?}"));
                }
            },
            "sensitivity" => {
                if norm_a == norm_b {
                    failures.push(format!("answers did not change: {text_a:?}"));
                }
            },
            "contradiction" => match (polarity(&norm_a), polarity(&norm_b)) {
                (Some(pa), Some(pb)) if pa != pb => {},
                (Some(_), Some(_)) => {
                    failures.push(format!("answers agree: {text_a:?} vs {text_b:?}"));
                },
                _ => failures.push("answers lack a yes/no polarity".to_string()),
            },
            other => {
                return Err(ScoringError::UnknownRelation {
                    relation: other.to_string(),
                });
            },
        }

        if let Some(arg) = checks.get("both_contain") {
            let (folded_a, folded_b) = (text_a.to_lowercase(), text_b.to_lowercase());
            for needle in string_list("both_contain", arg)? {
                let needle_folded = needle.to_lowercase();
                if !folded_a.contains(&needle_folded) || !folded_b.contains(&needle_folded) {
                    failures.push(format!("{needle:?} not present in both answers"));
                }
            }
        }

        if failures.is_empty() {
            Ok(Score::pass(vec![format!("ok: {relation}")]))
        } else {
            Ok(Score::fail(failures))
        }
    }
}

fn expectation_map(expectation: &Value) -> Result<&Map<String, Value>, ScoringError> {
    static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();
    match expectation {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(EMPTY.get_or_init(Map::new)),
        other => Err(ScoringError::invalid_expectation(format!(
            "expectation must be a mapping, got {}",
            type_name(other)
        ))),
    }
}

fn string_list(key: &str, arg: &Value) -> Result<Vec<String>, ScoringError> {
    match arg {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ScoringError::invalid_expectation(format!("{key} entries must be strings"))
                })
            })
            .collect(),
        other => Err(ScoringError::invalid_expectation(format!(
            "{key} must be a string or a list of strings, got {}",
            type_name(other)
        ))),
    }
}

fn compile(arg: &Value) -> Result<Regex, ScoringError> {
    let pattern = arg
        .as_str()
        .ok_or_else(|| ScoringError::invalid_expectation("regex must be a string"))?;
    if pattern.len() > MAX_REGEX_LENGTH {
        return Err(ScoringError::invalid_expectation(format!(
            "regex exceeds {MAX_REGEX_LENGTH} bytes"
        )));
    }
    Regex::new(pattern).map_err(|e| ScoringError::invalid_expectation(format!("invalid regex: {e}")))
}

fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lowercases, collapses whitespace and drops trailing sentence punctuation.
fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?'])
        .trim_end()
        .to_lowercase()
}

fn polarity(normalized: &str) -> Option<bool> {
    let first = normalized
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())?;
    match first {
        "yes" | "true" | "correct" => Some(true),
        "no" | "false" | "incorrect" => Some(false),
        _ => None,
    }
}

fn ok_reason(applied: &[&str]) -> String {
    if applied.is_empty() {
        "ok: no checks".to_string()
    } else {
        format!("ok: {}", applied.join(", "))
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn score(output: &str, expectation: Value) -> Score {
        ExpectationScorer.score(&json!(output), &expectation).unwrap()
    }

    #[test]
    fn test_empty_expectation_passes() {
        let s = score("anything", json!({}));
        assert!(s.passed);
        assert_eq!(s.reasons, ["ok: no checks"]);

        let s = ExpectationScorer.score(&json!("x"), &Value::Null).unwrap();
        assert!(s.passed);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        assert!(score("Hi there!", json!({"contains": "hi"})).passed);
        assert!(score("Hi there!", json!({"contains": ["hi", "THERE"]})).passed);

        let s = score("Hello", json!({"contains": ["hello", "world"]}));
        assert!(!s.passed);
        assert_eq!(s.reasons, ["missing expected text: \"world\""]);
    }

    #[test]
    fn test_not_contains_and_contains_any() {
        assert!(!score("I am certain", json!({"not_contains": "certain"})).passed);
        assert!(score("I don't know", json!({"contains_any": ["not sure", "don't know"]})).passed);
        assert!(!score("Paris", json!({"contains_any": ["unsure"]})).passed);
    }

    #[test]
    fn test_equals_normalizes() {
        assert!(score("  The answer is 4. ", json!({"equals": "the answer is 4"})).passed);
        assert!(!score("5", json!({"equals": "4"})).passed);
    }

    #[test]
    fn test_regex_and_max_chars() {
        assert!(score("answer: 42", json!({"regex": r"\d+"})).passed);
        assert!(!score("answer: none", json!({"regex": r"^\d+$"})).passed);
        assert!(score("short", json!({"max_chars": 5})).passed);
        assert!(!score("longer", json!({"max_chars": 5})).passed);
    }

    #[test]
    fn test_all_failures_reported_in_check_order() {
        let s = score("nope", json!({"contains": "yes", "max_chars": 2}));
        assert!(!s.passed);
        assert_eq!(s.reasons.len(), 2);
        assert!(s.reasons[0].starts_with("missing expected text"));
        assert!(s.reasons[1].starts_with("output has 4 chars"));
    }

    #[test]
    fn test_passing_reason_lists_checks() {
        let s = score("hi", json!({"contains": "hi", "max_chars": 10, "rubric": "ignored"}));
        assert_eq!(s.reasons, ["ok: contains, max_chars"]);
    }

    #[test]
    fn test_invalid_expectations_are_errors() {
        let invalid = [
            json!({"regex": "("}),
            json!({"contains": 3}),
            json!({"contains": ["ok", 1]}),
            json!({"max_chars": -1}),
            json!({"equals": ["a"]}),
            json!("contains hi"),
        ];
        for expectation in invalid {
            let err = ExpectationScorer.score(&json!("x"), &expectation).unwrap_err();
            assert!(
                matches!(err, ScoringError::InvalidExpectation { .. }),
                "{expectation}: {err:?}"
            );
        }
    }

    #[test]
    fn test_non_string_output_scored_on_json_text() {
        let s = ExpectationScorer
            .score(&json!({"answer": 4}), &json!({"contains": "\"answer\":4"}))
            .unwrap();
        assert!(s.passed);
    }

    #[test]
    fn test_consistency_is_default_relation() {
        let s = PairRelationScorer
            .score_pair(&json!("4"), &json!("4"), &json!({}))
            .unwrap();
        assert!(s.passed);
        assert_eq!(s.reasons, ["ok: consistency"]);

        let s = PairRelationScorer
            .score_pair(&json!("Four."), &json!("four"), &Value::Null)
            .unwrap();
        assert!(s.passed);

        let s = PairRelationScorer
            .score_pair(&json!("4"), &json!("5"), &json!({"relation": "consistency"}))
            .unwrap();
        assert!(!s.passed);
    }

    #[test]
    fn test_sensitivity_requires_change() {
        let expectation = json!({"relation": "sensitivity"});
        assert!(
            PairRelationScorer
                .score_pair(&json!("Paris"), &json!("Lyon"), &expectation)
                .unwrap()
                .passed
        );
        assert!(
            !PairRelationScorer
                .score_pair(&json!("Paris"), &json!("paris"), &expectation)
                .unwrap()
                .passed
        );
    }

    #[test]
    fn test_contradiction_requires_opposite_polarity() {
        let expectation = json!({"relation": "contradiction"});
        let pair = |a: &str, b: &str| {
            PairRelationScorer
                .score_pair(&json!(a), &json!(b), &expectation)
                .unwrap()
        };

        assert!(pair("Yes, it is.", "No.").passed);
        assert!(!pair("Yes", "yes!").passed);
        let s = pair("Maybe", "No");
        assert!(!s.passed);
        assert_eq!(s.reasons, ["answers lack a yes/no polarity"]);
    }

    #[test]
    fn test_both_contain() {
        let expectation = json!({"both_contain": ["4"]});
        assert!(
            PairRelationScorer
                .score_pair(&json!("It is 4"), &json!("4"), &json!({"relation": "sensitivity", "both_contain": ["4"]}))
                .unwrap()
                .passed
        );
        let s = PairRelationScorer
            .score_pair(&json!("4"), &json!("4"), &json!({"both_contain": ["five"]}))
            .unwrap();
        assert!(!s.passed);
        assert!(
            PairRelationScorer
                .score_pair(&json!("4"), &json!("4"), &expectation)
                .unwrap()
                .passed
        );
    }

    #[test]
    fn test_unknown_relation_is_error() {
        let err = PairRelationScorer
            .score_pair(&json!("a"), &json!("b"), &json!({"relation": "entailment"}))
            .unwrap_err();
        assert!(
            matches!(err, ScoringError::UnknownRelation { ref relation } if relation == "entailment"),
            "{err:?}"
        );
    }
}
