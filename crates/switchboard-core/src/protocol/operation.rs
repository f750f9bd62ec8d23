//! Operation classification and streaming cursor handling.

use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::ProtocolError;

/// `cursor: {initial_value: {<field>: $<variable>}}` inside a `_stream(...)` call.
static CURSOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"cursor:\s*\{\s*initial_value\s*:\s*\{\s*(\w+)\s*:\s*\$(\w+)").unwrap()
});

/// How an operation behaves across an upstream reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// One-shot write. Never replayed.
    Mutation,
    /// Live query or plain subscription. Replayed verbatim.
    Subscription,
    /// Cursor-driven stream. Replayed from the last seen cursor.
    Streaming,
}

/// Which result field drives a streaming cursor and which variable seeds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorDescriptor {
    /// Row field whose last value is the resume point.
    pub field: String,
    /// Query variable holding the initial cursor value.
    pub variable: String,
}

/// Result of [`detect_operation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Cursor, for streams that declare one through a variable.
    pub cursor: Option<CursorDescriptor>,
}

/// Classify a GraphQL document.
pub fn detect_operation(query: &str) -> DetectedOperation {
    if query.trim_start().starts_with("mutation") {
        return DetectedOperation {
            kind: OperationKind::Mutation,
            cursor: None,
        };
    }
    if query.contains("_stream(") {
        let cursor = CURSOR_RE.captures(query).map(|c| CursorDescriptor {
            field: c[1].to_owned(),
            variable: c[2].to_owned(),
        });
        return DetectedOperation {
            kind: OperationKind::Streaming,
            cursor,
        };
    }
    DetectedOperation {
        kind: OperationKind::Subscription,
        cursor: None,
    }
}

/// Pull `field` from the last row of a `next` frame.
///
/// Stream results look like `{"payload": {"data": {"<root>_stream": [rows]}}}`.
/// Returns `None` for anything else, including an empty batch.
pub fn last_cursor_value(next_frame: &[u8], field: &str) -> Option<Value> {
    let frame: Value = serde_json::from_slice(next_frame).ok()?;
    let data = frame.get("payload")?.get("data")?.as_object()?;
    data.values()
        .filter_map(Value::as_array)
        .find_map(|rows| rows.last())
        .and_then(|row| row.get(field))
        .filter(|v| !v.is_null())
        .cloned()
}

/// Return a copy of `start_frame` with `payload.variables[variable] = value`.
pub fn patch_cursor_value(
    start_frame: &[u8],
    variable: &str,
    value: &Value,
) -> Result<Bytes, ProtocolError> {
    let patch_err = |reason| ProtocolError::CursorPatch {
        variable: variable.to_owned(),
        reason,
    };

    let mut frame: Value = serde_json::from_slice(start_frame)?;
    let payload = frame
        .get_mut("payload")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| patch_err("no payload object"))?;

    let variables = payload
        .entry("variables")
        .or_insert_with(|| Value::Object(Map::new()));
    if variables.is_null() {
        *variables = Value::Object(Map::new());
    }
    let variables = variables
        .as_object_mut()
        .ok_or_else(|| patch_err("variables is not an object"))?;
    let _ = variables.insert(variable.to_owned(), value.clone());

    Ok(Bytes::from(frame.to_string()))
}
