//! Turns raw model output into a validated [`TaskBreakdown`].
//!
//! Only structural defects are errors. Field-level problems are repaired
//! locally: bad steps are dropped, survivors are renumbered densely,
//! dependencies are remapped and pruned, and loose types are coerced.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::complexity::complexity_score;
use super::extract::extract_object;
use super::repair::repair;
pub use super::types::MAX_TITLE_CHARS;
use super::types::{GuideStepDraft, TaskBreakdown, cap_chars};

pub const UNTITLED_TASK: &str = "Untitled Task";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("response contained no valid steps")]
    NoValidSteps,
}

pub fn parse(raw: &str) -> Result<TaskBreakdown, ParseError> {
    parse_with_description(raw, "")
}

/// Like [`parse`], recording `description` on the breakdown and using its
/// first line as the title when the payload has none. A blank `description`
/// falls back to the payload's own top-level `description`, so a serialized
/// breakdown parses back to itself.
pub fn parse_with_description(raw: &str, description: &str) -> Result<TaskBreakdown, ParseError> {
    let root = decode_payload(raw)?;
    let description = if description.trim().is_empty() {
        root.get("description")
            .and_then(Value::as_str)
            .unwrap_or(description)
    } else {
        description
    };
    let source_steps = match root.get("steps") {
        Some(Value::Array(steps)) => steps,
        Some(_) => return Err(ParseError::MalformedPayload("`steps` is not a list".into())),
        None => return Err(ParseError::MalformedPayload("missing `steps`".into())),
    };

    // renumbered[i] is the dense number of the step at source position i + 1
    let mut renumbered: Vec<Option<u32>> = Vec::with_capacity(source_steps.len());
    let mut survivors = Vec::new();
    for (idx, value) in source_steps.iter().enumerate() {
        match validate_step(value) {
            Some(step) => {
                survivors.push(step);
                renumbered.push(Some(survivors.len() as u32));
            }
            None => {
                warn!(position = idx + 1, "dropping step without title or description");
                renumbered.push(None);
            }
        }
    }
    if survivors.is_empty() {
        return Err(ParseError::NoValidSteps);
    }

    let steps: Vec<GuideStepDraft> = survivors
        .into_iter()
        .zip(1u32..)
        .map(|(step, number)| build_step(number, step, &renumbered))
        .collect();

    let title = breakdown_title(root.get("title"), description);
    let estimated_total_time = steps
        .iter()
        .filter_map(|s| s.estimated_time)
        .fold(None, |acc: Option<u32>, t| Some(acc.unwrap_or(0).saturating_add(t)));
    let complexity_score = complexity_score(&title, description, &steps);
    debug!(
        source_steps = source_steps.len(),
        kept_steps = steps.len(),
        complexity_score,
        "parsed breakdown"
    );

    Ok(TaskBreakdown {
        title,
        description: description.to_string(),
        steps,
        complexity_score,
        estimated_total_time,
    })
}

fn decode_payload(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let object = extract_object(raw)
        .ok_or_else(|| ParseError::MalformedPayload("no JSON object found".into()))?;
    let value = match serde_json::from_str::<Value>(object) {
        Ok(value) => value,
        Err(first) => {
            debug!(error = %first, "payload is not valid JSON, attempting repair");
            serde_json::from_str::<Value>(&repair(object))
                .map_err(|e| ParseError::MalformedPayload(e.to_string()))?
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ParseError::MalformedPayload(
            "top level is not an object".into(),
        )),
    }
}

struct ValidStep<'a> {
    fields: &'a Map<String, Value>,
    title: String,
    description: String,
}

fn validate_step(value: &Value) -> Option<ValidStep<'_>> {
    let fields = value.as_object()?;
    Some(ValidStep {
        title: cap_chars(&text_field(fields.get("title"))?, MAX_TITLE_CHARS),
        description: text_field(fields.get("description"))?,
        fields,
    })
}

fn build_step(number: u32, step: ValidStep<'_>, renumbered: &[Option<u32>]) -> GuideStepDraft {
    let fields = step.fields;
    GuideStepDraft {
        step_number: number,
        title: step.title,
        description: step.description,
        detailed_instructions: text_field(fields.get("detailed_instructions")),
        estimated_time: fields.get("estimated_time").and_then(minutes),
        dependencies: dependencies(fields.get("dependencies"), number, renumbered),
        resources: list(fields.get("resources"), resource_entry),
        code_snippets: list(fields.get("code_snippets"), snippet_entry),
        tips: text_field(fields.get("tips")),
        warnings: text_field(fields.get("warnings")),
        verification_steps: text_field(fields.get("verification_steps")),
    }
}

/// Trimmed string content; `None` when missing, not a string or blank.
fn text_field(value: Option<&Value>) -> Option<String> {
    non_blank(value?.as_str()?)
}

fn breakdown_title(value: Option<&Value>, description: &str) -> String {
    let title = text_field(value).or_else(|| {
        description
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    });
    match title {
        Some(t) => cap_chars(&t, MAX_TITLE_CHARS),
        None => UNTITLED_TASK.to_string(),
    }
}

/// Non-negative whole minutes from an integer, integral float or numeric string.
fn minutes(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return u32::try_from(v).ok();
            }
            integral_f64(n.as_f64()?)
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u32>()
                .ok()
                .or_else(|| integral_f64(s.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

fn integral_f64(v: f64) -> Option<u32> {
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
        Some(v as u32)
    } else {
        None
    }
}

/// 1-based source position referenced by a dependency entry.
fn dependency_position(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => dependency_position(items.first()?),
        other => minutes(other).map(|v| v as usize),
    }
}

fn dependencies(value: Option<&Value>, own: u32, renumbered: &[Option<u32>]) -> Vec<u32> {
    let entries: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v) if matches!(v, Value::Number(_) | Value::String(_)) => vec![v],
        _ => return Vec::new(),
    };
    let mut deps: Vec<u32> = entries
        .into_iter()
        .filter_map(dependency_position)
        .filter_map(|pos| pos.checked_sub(1))
        .filter_map(|idx| renumbered.get(idx).copied().flatten())
        .filter(|&dep| dep < own)
        .collect();
    deps.sort_unstable();
    deps.dedup();
    deps
}

fn list(value: Option<&Value>, entry: fn(&Value) -> Option<String>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(entry).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => entry(single).into_iter().collect(),
    }
}

fn resource_entry(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str).and_then(non_blank),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) => None,
    }
}

fn snippet_entry(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => keep_code(s),
        Value::Object(obj) => match ["code", "content"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
        {
            Some(code) => keep_code(code),
            None => serde_json::to_string(obj).ok(),
        },
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) => None,
    }
}

// code keeps its indentation
fn keep_code(s: &str) -> Option<String> {
    (!s.trim().is_empty()).then(|| s.to_string())
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
