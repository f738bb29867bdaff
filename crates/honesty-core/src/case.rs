//! Case model and category filtering.
//!
//! A [`Case`] is built once from a suite descriptor and never mutated. The
//! execution mode is fixed at load time: a case with a non-empty
//! `metamorphic` mapping runs in metamorphic mode, everything else runs as a
//! single prompt.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::suite::SuiteError;

/// The prompt pair and relation expectation of a metamorphic case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetamorphicSpec {
    /// First prompt of the pair.
    pub a_prompt: String,
    /// Second prompt of the pair.
    pub b_prompt: String,
    /// Relation expectation handed to the relational scorer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation: Option<Value>,
}

/// Borrowed view of how a case executes.
#[derive(Debug, Clone, Copy)]
pub enum CaseMode<'a> {
    /// One prompt scored against `expected`.
    Single {
        /// Prompt text, empty when the case has none.
        prompt: &'a str,
        /// Expectation, `None` when the case has none.
        expected: Option<&'a Value>,
    },
    /// Two prompts scored as a pair.
    Metamorphic(&'a MetamorphicSpec),
}

/// A validated, immutable test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Case {
    id: String,
    category: String,
    severity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metamorphic: Option<MetamorphicSpec>,
    notes: String,
}

impl Case {
    /// Builds a single-prompt case.
    #[must_use]
    pub fn single(
        id: impl Into<String>,
        category: impl Into<String>,
        severity: i64,
        prompt: impl Into<String>,
        expected: Value,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            severity,
            prompt: Some(prompt.into()),
            expected: Some(expected),
            metamorphic: None,
            notes: String::new(),
        }
    }

    /// Builds a metamorphic case.
    #[must_use]
    pub fn metamorphic(
        id: impl Into<String>,
        category: impl Into<String>,
        severity: i64,
        pair: MetamorphicSpec,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            severity,
            prompt: None,
            expected: None,
            metamorphic: Some(pair),
            notes: String::new(),
        }
    }

    /// Returns the case with `notes` attached.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Materializes a case from one raw suite descriptor.
    ///
    /// `index` is the position in the suite and is only used for error
    /// reporting.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::MalformedCase`] if `id`, `category` or
    /// `severity` is missing, `severity` is not an integer, a prompt is a
    /// mapping or sequence, or a metamorphic mapping lacks its prompts.
    pub fn from_descriptor(index: usize, descriptor: &Value) -> Result<Self, SuiteError> {
        let malformed = |reason: String| SuiteError::MalformedCase { index, reason };

        let Some(fields) = descriptor.as_object() else {
            return Err(malformed("case descriptor must be a mapping".to_string()));
        };

        let id = required_label(fields, "id").map_err(malformed)?;
        let category = required_label(fields, "category").map_err(malformed)?;
        let severity = match fields.get("severity") {
            None | Some(Value::Null) => {
                return Err(malformed(format!("case {id}: missing required field 'severity'")));
            },
            Some(value) => parse_severity(value)
                .ok_or_else(|| malformed(format!("case {id}: severity {value} is not an integer")))?,
        };

        let prompt = match fields.get("prompt") {
            None | Some(Value::Null) => None,
            Some(other) => Some(scalar_text(other).ok_or_else(|| {
                malformed(format!("case {id}: prompt must be a scalar, got {other}"))
            })?),
        };

        let expected = fields.get("expected").filter(|v| !v.is_null()).cloned();

        let metamorphic = match fields.get("metamorphic") {
            Some(value) if is_truthy(value) => {
                Some(parse_metamorphic(value).map_err(|reason| malformed(format!("case {id}: {reason}")))?)
            },
            _ => None,
        };

        let notes = match fields.get("notes") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            id,
            category,
            severity,
            prompt,
            expected,
            metamorphic,
            notes,
        })
    }

    /// Case identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Category used for filtering and grouping.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Operator-assigned severity.
    #[must_use]
    pub const fn severity(&self) -> i64 {
        self.severity
    }

    /// Free-text notes, empty by default.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Single-prompt text, if any.
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Single-prompt expectation, if any.
    #[must_use]
    pub const fn expected(&self) -> Option<&Value> {
        self.expected.as_ref()
    }

    /// Metamorphic descriptor, if the case runs in metamorphic mode.
    #[must_use]
    pub const fn metamorphic_spec(&self) -> Option<&MetamorphicSpec> {
        self.metamorphic.as_ref()
    }

    /// Returns `true` when the case runs in metamorphic mode.
    #[must_use]
    pub const fn is_metamorphic(&self) -> bool {
        self.metamorphic.is_some()
    }

    /// The execution mode for this case.
    #[must_use]
    pub fn mode(&self) -> CaseMode<'_> {
        match &self.metamorphic {
            Some(pair) => CaseMode::Metamorphic(pair),
            None => CaseMode::Single {
                prompt: self.prompt.as_deref().unwrap_or(""),
                expected: self.expected.as_ref(),
            },
        }
    }
}

fn required_label(fields: &Map<String, Value>, key: &str) -> Result<String, String> {
    match fields.get(key) {
        None | Some(Value::Null) => Err(format!("missing required field '{key}'")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("field '{key}' must be a string, got {other}")),
    }
}

/// Integers pass through, integral strings are parsed, floats truncate
/// toward zero.
#[allow(clippy::cast_possible_truncation)]
fn parse_severity(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    }
}

/// Text of a scalar prompt: strings verbatim, numbers and booleans in their
/// literal form. Mappings and sequences have no prompt text.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_metamorphic(value: &Value) -> Result<MetamorphicSpec, String> {
    let Some(fields) = value.as_object() else {
        return Err(format!("metamorphic must be a mapping, got {value}"));
    };

    let prompt = |key: &str| match fields.get(key) {
        None | Some(Value::Null) => Err(format!("metamorphic.{key} is required")),
        Some(other) => scalar_text(other)
            .ok_or_else(|| format!("metamorphic.{key} must be a scalar, got {other}")),
    };

    Ok(MetamorphicSpec {
        a_prompt: prompt("a_prompt")?,
        b_prompt: prompt("b_prompt")?,
        expectation: fields.get("expectation").filter(|v| !v.is_null()).cloned(),
    })
}

/// Parses a comma-separated category list.
///
/// Entries are trimmed and empty entries dropped. Returns `None` (no filter)
/// when nothing remains.
#[must_use]
pub fn parse_categories(raw: &str) -> Option<BTreeSet<String>> {
    let categories: BTreeSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if categories.is_empty() {
        None
    } else {
        Some(categories)
    }
}

/// Keeps the cases whose category is in `categories`, preserving order.
///
/// `None` or an empty set keeps every case.
#[must_use]
pub fn filter_by_categories(cases: Vec<Case>, categories: Option<&BTreeSet<String>>) -> Vec<Case> {
    match categories {
        Some(allowed) if !allowed.is_empty() => cases
            .into_iter()
            .filter(|case| allowed.contains(case.category()))
            .collect(),
        _ => cases,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn case_in(id: &str, category: &str) -> Case {
        Case::single(id, category, 1, "prompt", json!({}))
    }

    #[test]
    fn test_from_descriptor_single_prompt() {
        let descriptor = json!({
            "id": "greet-1",
            "category": "truthfulness",
            "severity": 2,
            "prompt": "Say hi",
            "expected": {"contains": "hi"},
        });

        let case = Case::from_descriptor(0, &descriptor).unwrap();
        assert_eq!(case.id(), "greet-1");
        assert_eq!(case.category(), "truthfulness");
        assert_eq!(case.severity(), 2);
        assert_eq!(case.notes(), "");
        assert!(!case.is_metamorphic());
        match case.mode() {
            CaseMode::Single { prompt, expected } => {
                assert_eq!(prompt, "Say hi");
                assert_eq!(expected, Some(&json!({"contains": "hi"})));
            },
            CaseMode::Metamorphic(_) => panic!("expected single-prompt mode"),
        }
    }

    #[test]
    fn test_from_descriptor_metamorphic() {
        let descriptor = json!({
            "id": "math-1",
            "category": "consistency",
            "severity": 1,
            "metamorphic": {
                "a_prompt": "2+2?",
                "b_prompt": "What is 2+2?",
                "expectation": {"relation": "consistency"},
            },
            "notes": "paraphrase",
        });

        let case = Case::from_descriptor(3, &descriptor).unwrap();
        assert!(case.is_metamorphic());
        assert_eq!(case.notes(), "paraphrase");
        let CaseMode::Metamorphic(pair) = case.mode() else {
            panic!("expected metamorphic mode");
        };
        assert_eq!(pair.a_prompt, "2+2?");
        assert_eq!(pair.b_prompt, "What is 2+2?");
    }

    #[test]
    fn test_empty_metamorphic_mapping_runs_single_prompt() {
        let descriptor = json!({
            "id": "c1",
            "category": "x",
            "severity": 1,
            "metamorphic": {},
        });

        let case = Case::from_descriptor(0, &descriptor).unwrap();
        assert!(!case.is_metamorphic());
        match case.mode() {
            CaseMode::Single { prompt, expected } => {
                assert_eq!(prompt, "");
                assert!(expected.is_none());
            },
            CaseMode::Metamorphic(_) => panic!("empty mapping must not select metamorphic mode"),
        }
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        for (missing, descriptor) in [
            ("id", json!({"category": "x", "severity": 1})),
            ("category", json!({"id": "c1", "severity": 1})),
            ("severity", json!({"id": "c1", "category": "x"})),
        ] {
            let err = Case::from_descriptor(4, &descriptor).unwrap_err();
            match err {
                SuiteError::MalformedCase { index, reason } => {
                    assert_eq!(index, 4);
                    assert!(reason.contains(missing), "reason should name {missing}: {reason}");
                },
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_severity_coercion() {
        let base = |severity: Value| json!({"id": "c", "category": "x", "severity": severity});

        assert_eq!(Case::from_descriptor(0, &base(json!("3"))).unwrap().severity(), 3);
        assert_eq!(Case::from_descriptor(0, &base(json!(2.7))).unwrap().severity(), 2);
        assert_eq!(Case::from_descriptor(0, &base(json!(-1))).unwrap().severity(), -1);
        assert!(Case::from_descriptor(0, &base(json!("high"))).is_err());
        assert!(Case::from_descriptor(0, &base(json!([1]))).is_err());
    }

    #[test]
    fn test_metamorphic_missing_prompt_rejected() {
        let descriptor = json!({
            "id": "m1",
            "category": "x",
            "severity": 1,
            "metamorphic": {"a_prompt": "only a"},
        });

        let err = Case::from_descriptor(0, &descriptor).unwrap_err();
        assert!(err.to_string().contains("b_prompt"), "{err}");
    }

    #[test]
    fn test_scalar_prompts_become_text() {
        let descriptor = json!({"id": "n", "category": "x", "severity": 1, "prompt": 42});
        let case = Case::from_descriptor(0, &descriptor).unwrap();
        let CaseMode::Single { prompt, .. } = case.mode() else {
            panic!("expected single-prompt mode");
        };
        assert_eq!(prompt, "42");

        let descriptor = json!({
            "id": "m",
            "category": "x",
            "severity": 1,
            "metamorphic": {"a_prompt": 2.5, "b_prompt": true},
        });
        let case = Case::from_descriptor(0, &descriptor).unwrap();
        let CaseMode::Metamorphic(pair) = case.mode() else {
            panic!("expected metamorphic mode");
        };
        assert_eq!(pair.a_prompt, "2.5");
        assert_eq!(pair.b_prompt, "true");
    }

    #[test]
    fn test_structured_prompt_rejected() {
        let descriptor = json!({"id": "s", "category": "x", "severity": 1, "prompt": ["a", "b"]});

        let err = Case::from_descriptor(2, &descriptor).unwrap_err();
        assert!(err.to_string().contains("prompt must be a scalar"), "{err}");
    }

    #[test]
    fn test_parse_categories() {
        assert_eq!(parse_categories(""), None);
        assert_eq!(parse_categories(" , ,"), None);

        let parsed = parse_categories("truthfulness, calibration,,truthfulness").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains("truthfulness"));
        assert!(parsed.contains("calibration"));
    }

    #[test]
    fn test_filter_preserves_order() {
        let cases = vec![
            case_in("a", "truthfulness"),
            case_in("b", "calibration"),
            case_in("c", "truthfulness"),
            case_in("d", "refusal"),
        ];
        let allowed: BTreeSet<String> = ["truthfulness".to_string(), "refusal".to_string()].into();

        let kept = filter_by_categories(cases, Some(&allowed));
        let ids: Vec<&str> = kept.iter().map(Case::id).collect();
        assert_eq!(ids, ["a", "c", "d"]);
    }

    #[test]
    fn test_filter_is_case_sensitive() {
        let cases = vec![case_in("a", "Truthfulness")];
        let allowed: BTreeSet<String> = ["truthfulness".to_string()].into();

        assert!(filter_by_categories(cases, Some(&allowed)).is_empty());
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let cases = vec![case_in("a", "x"), case_in("b", "y")];

        assert_eq!(filter_by_categories(cases.clone(), None), cases);
        assert_eq!(filter_by_categories(cases.clone(), Some(&BTreeSet::new())), cases);
    }
}
