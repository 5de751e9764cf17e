use serde_json::{json, Value};

/// One output line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Diagnostic text emitted by user code
    Log(String),
    /// Result of a command
    Result(Value),
    /// Non-fatal failure of a command, or the fatal diagnostic
    Error { id: String, reason: String },
}

impl Frame {
    pub fn log(message: impl Into<String>) -> Self {
        Frame::Log(message.into())
    }

    /// The bare `true` acknowledgement
    pub fn ok() -> Self {
        Frame::Result(Value::Bool(true))
    }

    pub fn result(value: Value) -> Self {
        Frame::Result(value)
    }

    pub fn error(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Frame::Error {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// JSON value written on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            Frame::Log(message) => json!({ "log": message }),
            Frame::Result(value) => value.clone(),
            Frame::Error { id, reason } => json!({ "error": { "id": id, "reason": reason } }),
        }
    }
}
