//! Result normalisation: provider output → [`AnalysisResult`].
//!
//! Models return the right data in slightly wrong shapes often enough that
//! strict deserialisation would reject good answers. The rules here are
//! cheap and deterministic:
//!
//! 1. Strip outer Markdown fences and invisible Unicode from text payloads
//! 2. If prose surrounds the JSON, keep the outermost `{…}` span
//! 3. Anything that is still not a JSON object is a `Validation` error
//! 4. Missing `summary` → `""`; missing or non-array lists → `[]`
//! 5. List items: strings kept, numbers stringified, objects reduced to their
//!    `name`/`title`/`description`
//! 6. Threat levels are coerced onto the four known values (see
//!    [`coerce_level`]); unknown → MEDIUM
//! 7. `testScenarios`/`test_scenarios` and `expectedResult`/`expected_result`
//!    are both accepted; a single-string `steps` becomes one step

use crate::error::AnalysisError;
use crate::output::{AnalysisResult, TestScenario, Threat, ThreatLevel};
use crate::pipeline::provider::RawPayload;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Normalise whatever a provider handler extracted.
pub fn normalize_payload(payload: RawPayload) -> Result<AnalysisResult, AnalysisError> {
    match payload {
        RawPayload::Text(text) => normalize_text(&text),
        RawPayload::Json(value) => normalize(&value),
    }
}

/// Parse model text into an analysis result.
pub fn normalize_text(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    let cleaned = remove_invisible_chars(&strip_code_fences(raw));
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(validation("provider returned empty content"));
    }

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first) => {
            let span = outermost_object(cleaned)
                .ok_or_else(|| validation(format!("response is not JSON: {first}")))?;
            serde_json::from_str(span)
                .map_err(|e| validation(format!("response is not valid JSON: {e}")))?
        }
    };
    normalize(&value)
}

/// Enforce the [`AnalysisResult`] schema on a raw JSON value.
pub fn normalize(raw: &Value) -> Result<AnalysisResult, AnalysisError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| validation(format!("expected a JSON object, got {}", type_name(raw))))?;

    Ok(AnalysisResult {
        summary: obj.get("summary").map(text_of).unwrap_or_default(),
        assets: string_list(field(obj, &["assets"])),
        threats: items(field(obj, &["threats"]))
            .filter_map(Value::as_object)
            .map(threat)
            .collect(),
        test_scenarios: items(field(obj, &["testScenarios", "test_scenarios"]))
            .filter_map(Value::as_object)
            .map(scenario)
            .collect(),
        recommendations: string_list(field(obj, &["recommendations"])),
    })
}

/// Map a free-form severity onto [`ThreatLevel`].
///
/// Case-insensitive. Numbers are read as CVSS-like scores. Returns `None`
/// for anything unrecognised.
pub fn coerce_level(raw: &Value) -> Option<ThreatLevel> {
    match raw {
        Value::Number(n) => n.as_f64().map(level_from_score),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            if let Ok(score) = s.parse::<f64>() {
                return Some(level_from_score(score));
            }
            match s.as_str() {
                "critical" | "severe" | "very high" | "extreme" => Some(ThreatLevel::Critical),
                "high" | "important" | "major" | "elevated" => Some(ThreatLevel::High),
                "medium" | "moderate" | "med" | "normal" => Some(ThreatLevel::Medium),
                "low" | "minor" | "info" | "informational" | "negligible" | "none" => {
                    Some(ThreatLevel::Low)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn level_from_score(score: f64) -> ThreatLevel {
    if score >= 9.0 {
        ThreatLevel::Critical
    } else if score >= 7.0 {
        ThreatLevel::High
    } else if score >= 4.0 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

fn threat(obj: &Map<String, Value>) -> Threat {
    let level = match obj.get("level").or_else(|| obj.get("severity")) {
        Some(v) => coerce_level(v).unwrap_or_else(|| {
            warn!("Unrecognised threat level {}; using MEDIUM", v);
            ThreatLevel::Medium
        }),
        None => {
            warn!("Threat without a level; using MEDIUM");
            ThreatLevel::Medium
        }
    };
    Threat {
        kind: string_field(obj, &["type", "category", "name"]),
        description: string_field(obj, &["description"]),
        level,
        impact: string_field(obj, &["impact"]),
    }
}

fn scenario(obj: &Map<String, Value>) -> TestScenario {
    let steps = match field(obj, &["steps"]) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        other => string_list(other),
    };
    TestScenario {
        category: string_field(obj, &["category"]),
        description: string_field(obj, &["description"]),
        steps,
        expected_result: string_field(obj, &["expectedResult", "expected_result"]),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> String {
    field(obj, names).map(text_of).unwrap_or_default()
}

fn items(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    items(value)
        .filter_map(|item| match item {
            Value::Object(o) => ["name", "title", "description"]
                .iter()
                .find_map(|k| o.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            other => Some(text_of(other)),
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// String view of a scalar; containers become empty.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn validation(detail: impl Into<String>) -> AnalysisError {
    AnalysisError::Validation {
        detail: detail.into(),
    }
}

// ── Text cleanup ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid fence regex")
});

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

/// The span from the first `{` to its matching `}`, string-aware.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn summary_only_defaults_everything_else() {
        let r = normalize(&json!({"summary": "x"})).unwrap();
        assert_eq!(r.summary, "x");
        assert!(r.assets.is_empty());
        assert!(r.threats.is_empty());
        assert!(r.test_scenarios.is_empty());
        assert!(r.recommendations.is_empty());
    }

    #[test]
    fn missing_summary_is_empty() {
        let r = normalize(&json!({})).unwrap();
        assert_eq!(r, AnalysisResult::default());
    }

    #[test]
    fn non_object_is_validation_error() {
        for raw in [json!([]), json!("text"), json!(null), json!(3)] {
            let err = normalize(&raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(normalize_text("sorry, I can't").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(normalize_text("   ").unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn full_payload() {
        let r = normalize(&json!({
            "summary": "Checkout service",
            "assets": ["card data", 42, {"name": "session store"}, ""],
            "threats": [
                {"type": "Spoofing", "description": "stolen token", "level": "high", "impact": "account takeover"},
                {"type": "DoS", "description": "flood", "level": "Severe"},
                {"type": "Info", "description": "verbose errors", "level": 3.1},
                {"type": "Odd", "description": "?", "level": "purple"},
                "not an object"
            ],
            "test_scenarios": [
                {"category": "Auth", "description": "replay", "steps": "Replay a token", "expected_result": "401"}
            ],
            "recommendations": ["Rotate keys"]
        }))
        .unwrap();

        assert_eq!(r.assets, vec!["card data", "42", "session store"]);
        let levels: Vec<_> = r.threats.iter().map(|t| t.level).collect();
        assert_eq!(
            levels,
            vec![ThreatLevel::High, ThreatLevel::Critical, ThreatLevel::Low, ThreatLevel::Medium]
        );
        assert_eq!(r.threats[1].impact, "");
        assert_eq!(r.test_scenarios[0].steps, vec!["Replay a token"]);
        assert_eq!(r.test_scenarios[0].expected_result, "401");
        assert_eq!(r.recommendations, vec!["Rotate keys"]);
    }

    #[test]
    fn text_cleanup() {
        let fenced = "```json\n{\"summary\":\"a\"}\n```";
        assert_eq!(normalize_text(fenced).unwrap().summary, "a");

        let bom = "\u{FEFF}{\"summary\":\"b\u{200B}\"}";
        assert_eq!(normalize_text(bom).unwrap().summary, "b");

        let prose = "Here is the analysis:\n{\"summary\":\"c {nested}\",\"assets\":[\"x\"]}\nHope this helps!";
        let r = normalize_text(prose).unwrap();
        assert_eq!(r.summary, "c {nested}");
        assert_eq!(r.assets, vec!["x"]);
    }

    #[test]
    fn level_coercion_table() {
        assert_eq!(coerce_level(&json!("CRITICAL")), Some(ThreatLevel::Critical));
        assert_eq!(coerce_level(&json!(" very high ")), Some(ThreatLevel::Critical));
        assert_eq!(coerce_level(&json!("moderate")), Some(ThreatLevel::Medium));
        assert_eq!(coerce_level(&json!("informational")), Some(ThreatLevel::Low));
        assert_eq!(coerce_level(&json!(7)), Some(ThreatLevel::High));
        assert_eq!(coerce_level(&json!("9.8")), Some(ThreatLevel::Critical));
        assert_eq!(coerce_level(&json!("unknown")), None);
        assert_eq!(coerce_level(&json!(true)), None);
    }

    #[test]
    fn outermost_object_respects_strings() {
        assert_eq!(outermost_object(r#"x {"a":"}"} y"#), Some(r#"{"a":"}"}"#));
        assert_eq!(outermost_object("no braces"), None);
        assert_eq!(outermost_object("{ unclosed"), None);
    }
}
