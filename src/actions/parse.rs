//! Parsing of model answers into [`Action`]s.
//!
//! The model answers either with a call expression such as
//! `do(action="Tap", element=[500, 300])` / `finish(message="done")`, or with
//! a JSON object carrying the same keys. Batches can only be expressed in the
//! JSON form since they nest other actions.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::action::{
    Action, Point, DEFAULT_BATCH_DELAY_MS, DEFAULT_LONG_PRESS_MS, RELATIVE_COORDINATE_MAX,
};

/// Action parsing errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid coordinate for {0}: {1}")]
    InvalidCoordinate(String, String),
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Parse a raw model answer into an [`Action`].
pub fn parse_action(response: &str) -> Result<Action, ActionError> {
    action_from_value(&parse_action_value(response)?)
}

/// Parse a raw model answer into its key/value form.
pub fn parse_action_value(response: &str) -> Result<Value, ActionError> {
    let response = response.trim();

    if response.starts_with('{') {
        return serde_json::from_str(response)
            .map_err(|e| ActionError::ParseError(format!("Invalid JSON action: {}", e)));
    }

    if response.starts_with("do(") {
        return parse_do_action(response);
    }

    if response.starts_with("finish(") {
        return parse_finish_action(response);
    }

    Err(ActionError::ParseError(format!(
        "Failed to parse action: {}",
        response
    )))
}

/// Parse a `do(...)` call into a JSON object.
fn parse_do_action(response: &str) -> Result<Value, ActionError> {
    let content = response
        .strip_prefix("do(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ActionError::ParseError("Invalid do() format".to_string()))?;

    let mut result = json!({ "_metadata": "do" });

    let mut key = String::new();
    let mut value = String::new();
    let mut in_string = false;
    let mut list_depth = 0usize;
    let mut string_char = '"';
    let mut parsing_key = true;

    for c in content.chars() {
        if in_string {
            if c == string_char {
                in_string = false;
            } else {
                value.push(c);
            }
            continue;
        }

        if list_depth > 0 {
            value.push(c);
            match c {
                '[' => list_depth += 1,
                ']' => list_depth -= 1,
                _ => {}
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = true;
                string_char = c;
            }
            '[' => {
                list_depth = 1;
                value.push(c);
            }
            '=' if parsing_key => parsing_key = false,
            ',' => {
                insert_pair(&mut result, &key, &value);
                key.clear();
                value.clear();
                parsing_key = true;
            }
            _ if c.is_whitespace() => {}
            _ if parsing_key => key.push(c),
            _ => value.push(c),
        }
    }

    insert_pair(&mut result, &key, &value);
    Ok(result)
}

fn insert_pair(target: &mut Value, key: &str, value: &str) {
    let key = key.trim();
    if !key.is_empty() {
        target[key] = parse_value(value);
    }
}

/// Parse a `finish(...)` call into a JSON object.
fn parse_finish_action(response: &str) -> Result<Value, ActionError> {
    let content = response
        .strip_prefix("finish(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ActionError::ParseError("Invalid finish() format".to_string()))?;

    let mut result = json!({ "_metadata": "finish" });

    if let Some(start) = content.find("message=") {
        let remaining = content[start + "message=".len()..].trim_start();

        let message = match remaining.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &remaining[1..];
                // The closing quote is the last one; messages may contain quotes.
                let end = body.rfind(quote).unwrap_or(body.len());
                &body[..end]
            }
            _ => remaining.split(',').next().unwrap_or(remaining).trim(),
        };

        result["message"] = json!(message);
    }

    Ok(result)
}

/// Parse a bare value from a `do(...)` argument list.
fn parse_value(value_str: &str) -> Value {
    let trimmed = value_str.trim();

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let items: Vec<Value> = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(scalar_value)
            .collect();
        return json!(items);
    }

    scalar_value(trimmed)
}

fn scalar_value(s: &str) -> Value {
    if let Ok(n) = s.parse::<i64>() {
        json!(n)
    } else if let Ok(f) = s.parse::<f64>() {
        json!(f)
    } else {
        json!(s.trim_matches(|c| c == '"' || c == '\''))
    }
}

/// Convert the key/value form into a typed [`Action`].
pub fn action_from_value(value: &Value) -> Result<Action, ActionError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ActionError::ParseError("Action must be an object".to_string()))?;

    if obj.get("_metadata").and_then(Value::as_str) == Some("finish") {
        return Ok(Action::Finish {
            message: string_field(obj, "message").unwrap_or_default(),
        });
    }

    let name = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::MissingParameter("action".to_string()))?;

    let action = match normalize_name(name).as_str() {
        "tap" => Action::Tap {
            at: point_field(obj, "element")?,
            confirm: string_field(obj, "message").filter(|m| !m.is_empty()),
        },
        "swipe" => Action::Swipe {
            start: point_field(obj, "start")?,
            end: point_field(obj, "end")?,
            humanized: bool_field(obj, "humanized").unwrap_or(false),
        },
        "long_press" => Action::LongPress {
            at: point_field(obj, "element")?,
            duration_ms: duration_ms_field(obj, "duration").unwrap_or(DEFAULT_LONG_PRESS_MS),
        },
        "double_tap" => Action::DoubleTap {
            at: point_field(obj, "element")?,
        },
        "type" => Action::Type {
            text: required_string(obj, "text")?,
        },
        "type_name" => Action::TypeName {
            text: required_string(obj, "text")?,
        },
        "launch" => Action::Launch {
            app: required_string(obj, "app")?,
        },
        "list_apps" => Action::ListApps,
        "back" => Action::Back,
        "home" => Action::Home,
        "volume_up" => Action::VolumeUp,
        "volume_down" => Action::VolumeDown,
        "power" => Action::Power,
        "wait" => Action::Wait {
            seconds: seconds_field(obj, "duration").unwrap_or(1.0),
        },
        "take_over" | "takeover" => Action::TakeOver {
            message: string_field(obj, "message")
                .unwrap_or_else(|| "User intervention required".to_string()),
        },
        "interact" => Action::Interact {
            options: obj
                .get("options")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(value_to_text).collect())
                .unwrap_or_default(),
        },
        "note" => Action::Note {
            message: string_field(obj, "message").unwrap_or_default(),
        },
        "call_api" => Action::CallApi {
            instruction: string_field(obj, "instruction").unwrap_or_default(),
        },
        "finish" => Action::Finish {
            message: string_field(obj, "message").unwrap_or_default(),
        },
        "batch" => {
            let steps = obj
                .get("steps")
                .and_then(Value::as_array)
                .ok_or_else(|| ActionError::MissingParameter("steps".to_string()))?
                .iter()
                .map(action_from_value)
                .collect::<Result<Vec<_>, _>>()?;
            let delay_ms = duration_ms_field(obj, "delay")
                .or_else(|| duration_ms_field(obj, "interval_ms"))
                .unwrap_or(DEFAULT_BATCH_DELAY_MS);
            Action::batch(steps, delay_ms)?
        }
        _ => return Err(ActionError::UnknownAction(name.to_string())),
    };

    Ok(action)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).map(value_to_text)
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Result<String, ActionError> {
    string_field(obj, key).ok_or_else(|| ActionError::MissingParameter(key.to_string()))
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        Value::Number(n) => Some(n.as_i64() != Some(0)),
        _ => None,
    }
}

/// Read a duration given as `"2 seconds"`, `"2s"` or a bare number of seconds.
fn seconds_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let seconds = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .to_lowercase()
            .replace("seconds", "")
            .replace("second", "")
            .trim()
            .trim_end_matches('s')
            .trim()
            .parse()
            .ok(),
        _ => None,
    };
    seconds.filter(|s| s.is_finite() && *s >= 0.0)
}

/// Read a duration in milliseconds; strings mentioning seconds are converted.
fn duration_ms_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64().map(|ms| ms.max(0.0) as u64),
        Value::String(s) if s.contains("second") || s.trim_end().ends_with('s') => {
            seconds_field(obj, key).map(|secs| (secs * 1000.0) as u64)
        }
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn point_field(obj: &Map<String, Value>, key: &str) -> Result<Point, ActionError> {
    let coords = obj
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ActionError::MissingParameter(key.to_string()))?;

    if coords.len() < 2 {
        return Err(ActionError::InvalidCoordinate(
            key.to_string(),
            "expected [x, y]".to_string(),
        ));
    }

    let (x, y) = match (coords[0].as_f64(), coords[1].as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(ActionError::InvalidCoordinate(
                key.to_string(),
                "coordinates must be numbers".to_string(),
            ))
        }
    };

    // Fractions in [0, 1] are already normalized; everything else is model space.
    let fractional = coords[0].is_f64() || coords[1].is_f64();
    let in_model_space = |v: f64| (0.0..RELATIVE_COORDINATE_MAX).contains(&v);
    let point = if fractional && (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
        Some(Point::new(x, y))
    } else if in_model_space(x) && in_model_space(y) {
        Some(Point::from_model_space(x, y))
    } else {
        None
    };

    let Some(point) = point else {
        return Err(ActionError::InvalidCoordinate(
            key.to_string(),
            format!(
                "[{}, {}] is outside the screen. Use values within [0, 1000).",
                x, y
            ),
        ));
    };

    Ok(point)
}
