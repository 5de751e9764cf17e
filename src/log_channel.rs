//! Buffer for messages user functions emit while running.
//!
//! The dispatcher drains it after each command so log frames always precede
//! the command's result frame.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::protocol::{to_spaced_string, Frame};

/// Shared handle to the session's log buffer. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LogChannel {
    buffer: Rc<RefCell<Vec<String>>>,
}

impl LogChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text message.
    pub fn emit(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "solidb_viewserver::user_log", "{}", message);
        self.buffer.borrow_mut().push(message);
    }

    /// Queue a value: strings as-is, anything else in its JSON text form.
    pub fn emit_value(&self, value: &Value) {
        match value {
            Value::String(s) => self.emit(s.as_str()),
            other => match to_spaced_string(other) {
                Ok(text) => self.emit(text),
                Err(_) => self.emit(other.to_string()),
            },
        }
    }

    /// Take every queued message as a log frame, in emission order.
    pub fn drain(&self) -> Vec<Frame> {
        self.buffer.borrow_mut().drain(..).map(Frame::Log).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_and_drain_in_order() {
        let channel = LogChannel::new();
        let handle = channel.clone();

        handle.emit("first");
        channel.emit_value(&json!([1, 2, 3]));
        channel.emit_value(&json!({"a": "b"}));
        channel.emit_value(&json!("plain"));
        assert_eq!(channel.len(), 4);

        assert_eq!(
            channel.drain(),
            vec![
                Frame::log("first"),
                Frame::log("[1, 2, 3]"),
                Frame::log(r#"{"a": "b"}"#),
                Frame::log("plain"),
            ]
        );
        assert!(handle.is_empty());
        assert!(channel.drain().is_empty());
    }
}
