//! Normalization of backend event shapes.
//!
//! The wizards' backends do not agree on one event vocabulary: phase results
//! arrive either as `phase_result` events or as `content` events carrying a
//! `phase` + `status` pair, questions arrive as an array or as a JSON string,
//! and keys come in snake_case or camelCase. Everything is mapped here into
//! one canonical [`WireEvent`] so the classifier never sees the variations.

use serde_json::Value;

use crate::clarification::Clarification;

const STATUS_COMPLETED: &str = "completed";

/// Canonical form of a decoded backend event.
#[derive(Clone, Debug, PartialEq)]
pub enum WireEvent {
    Started {
        message: Option<String>,
    },
    Progress {
        message: Option<String>,
        phase: Option<String>,
    },
    /// Free-text delta for the accumulated answer.
    TextDelta(String),
    PhaseStarted {
        phase: String,
        message: Option<String>,
    },
    PhaseCompleted {
        phase: String,
        result: Value,
    },
    ToolCall {
        tool: String,
    },
    ToolResult,
    Clarification(Clarification),
    Completed {
        result: Option<Value>,
    },
    Error {
        message: Option<String>,
    },
}

/// Maps a decoded payload to its canonical event.
///
/// Returns `None` for payloads without a `type`, with an unknown `type`, or
/// missing the fields their type requires.
pub fn normalize(value: &Value) -> Option<WireEvent> {
    let event_type = text(value, &["type", "event"])?;
    match event_type.as_str() {
        "started" | "start" => Some(WireEvent::Started {
            message: text(value, &["message"]),
        }),
        "progress" | "status" => Some(WireEvent::Progress {
            message: text(value, &["message"]),
            phase: text(value, &["phase"]),
        }),
        "content" => normalize_content(value),
        "phase_start" | "phaseStart" => Some(WireEvent::PhaseStarted {
            phase: text(value, &["phase"])?,
            message: text(value, &["message"]),
        }),
        "phase_result" | "phaseResult" => Some(WireEvent::PhaseCompleted {
            phase: text(value, &["phase"])?,
            result: field(value, &["result", "content", "data"])?.clone(),
        }),
        "tool_call" | "toolCall" | "tool_use" => Some(WireEvent::ToolCall {
            tool: text(value, &["tool", "tool_name", "toolName", "name"])
                .unwrap_or_else(|| "tool".to_string()),
        }),
        "tool_result" | "toolResult" => Some(WireEvent::ToolResult),
        "clarification" => Clarification::from_value(value).map(WireEvent::Clarification),
        "completed" | "complete" | "done" => Some(WireEvent::Completed {
            result: field(value, &["result"]).filter(|v| !v.is_null()).cloned(),
        }),
        "error" => Some(WireEvent::Error {
            message: error_message(value),
        }),
        _ => None,
    }
}

fn normalize_content(value: &Value) -> Option<WireEvent> {
    let content = value.get("content");
    let Some(phase) = text(value, &["phase"]) else {
        return match content? {
            Value::String(delta) if !delta.is_empty() => Some(WireEvent::TextDelta(delta.clone())),
            _ => None,
        };
    };
    let status = text(value, &["status"]);
    match (status.as_deref(), content) {
        (Some(STATUS_COMPLETED), Some(result)) if !result.is_null() => {
            Some(WireEvent::PhaseCompleted {
                phase,
                result: result.clone(),
            })
        }
        _ => Some(WireEvent::PhaseStarted {
            phase,
            message: text(value, &["message"]),
        }),
    }
}

fn error_message(value: &Value) -> Option<String> {
    match value.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(obj @ Value::Object(_)) => text(obj, &["message"]),
        _ => text(value, &["message"]),
    }
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| value.get(*key))
}

fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
    })
}
