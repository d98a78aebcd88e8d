//! Turns raw model output into a [`Decision`].
//!
//! Wire shapes accepted:
//!
//! ```text
//! {"action": "<tool name>", "args": {...}}
//! {"action": "final", "answer": "<text>"}
//! [ <either of the above>, ... ]
//! ```
//!
//! Everything else is [`Decision::Malformed`].

use crate::error::ParseError;
use serde_json::{Map, Value};

pub const FINAL_ACTION: &str = "final";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn to_wire(&self) -> String {
        serde_json::json!({ "action": self.name, "args": self.args }).to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    FinalAnswer { answer: String },
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalAnswer { answer: String },
    ToolCall(ToolCall),
    Batch(Vec<BatchItem>),
    Malformed { raw_text: String, reason: ParseError },
}

impl From<BatchItem> for Decision {
    fn from(item: BatchItem) -> Self {
        match item {
            BatchItem::FinalAnswer { answer } => Decision::FinalAnswer { answer },
            BatchItem::ToolCall(call) => Decision::ToolCall(call),
        }
    }
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FinalAnswer { .. } => "final",
            Self::ToolCall(_) => "tool_call",
            Self::Batch(_) => "batch",
            Self::Malformed { .. } => "malformed",
        }
    }
}

pub fn final_answer_wire(answer: &str) -> String {
    serde_json::json!({ "action": FINAL_ACTION, "answer": answer }).to_string()
}

pub fn parse(raw_text: &str) -> Decision {
    match extract_value(raw_text) {
        Ok(value) => classify(value).unwrap_or_else(|reason| Decision::Malformed {
            raw_text: raw_text.to_string(),
            reason,
        }),
        Err(reason) => Decision::Malformed {
            raw_text: raw_text.to_string(),
            reason,
        },
    }
}

/// Drop a fence wrapped around the whole reply. Fences inside the value are
/// answer content and stay.
fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    text.trim_end().strip_suffix("```").unwrap_or(text).trim()
}

fn extract_value(raw_text: &str) -> Result<Value, ParseError> {
    let text = strip_code_fences(raw_text);
    let start = text
        .find(['{', '['])
        .ok_or(ParseError::NoStructuredValue)?;
    let candidate = &text[start..];

    let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    if let Some(Ok(value)) = stream.next() {
        return Ok(value);
    }

    serde_json::from_str::<Value>(candidate.trim())
        .map_err(|e| ParseError::InvalidJson(e.to_string()))
}

fn classify(value: Value) -> Result<Decision, ParseError> {
    match value {
        Value::Object(obj) => classify_object(obj).map(Decision::from),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ParseError::UnrecognizedShape("empty array".into()));
            }
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(obj) => classify_object(obj),
                    other => Err(ParseError::UnrecognizedShape(format!(
                        "batch item is not an object: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Decision::Batch)
        }
        other => Err(ParseError::UnrecognizedShape(format!(
            "expected object or array, got {}",
            json_type(&other)
        ))),
    }
}

fn classify_object(mut obj: Map<String, Value>) -> Result<BatchItem, ParseError> {
    let action = match obj.remove("action") {
        Some(Value::String(action)) => action,
        Some(other) => {
            return Err(ParseError::UnrecognizedShape(format!(
                "'action' must be a string, got {}",
                json_type(&other)
            )));
        }
        None => return Err(ParseError::UnrecognizedShape("missing 'action'".into())),
    };

    if action == FINAL_ACTION {
        let answer = match obj.remove("answer") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        return Ok(BatchItem::FinalAnswer { answer });
    }

    let args = match obj.remove("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args,
        Some(other) => {
            return Err(ParseError::UnrecognizedShape(format!(
                "'args' must be an object, got {}",
                json_type(&other)
            )));
        }
    };

    Ok(BatchItem::ToolCall(ToolCall::new(action, args)))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
