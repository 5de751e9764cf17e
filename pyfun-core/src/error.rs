//! Error types for pyfun-core.
//!
//! Syntax errors are raised while compiling a module; everything else is a
//! runtime exception that user code may catch with `try`/`except`.

use thiserror::Error;

/// pyfun error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PyfunError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: usize },

    #[error("{}", format_exception(kind, message, *line))]
    Exception {
        kind: String,
        message: String,
        line: Option<usize>,
    },

    #[error("string must eval to a function (ex: \"def fun(doc): return 1\")")]
    NotAFunction,
}

/// Result type for pyfun operations
pub type PyfunResult<T> = Result<T, PyfunError>;

fn format_exception(kind: &str, message: &str, line: Option<usize>) -> String {
    let mut text = if message.is_empty() {
        kind.to_string()
    } else {
        format!("{}: {}", kind, message)
    };
    if let Some(line) = line {
        text.push_str(&format!(" (line {})", line));
    }
    text
}

impl PyfunError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        PyfunError::Syntax {
            message: message.into(),
            line,
        }
    }

    /// Build a runtime exception of the given class.
    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PyfunError::Exception {
            kind: kind.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::exception("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::exception("ValueError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::exception("NameError", format!("name '{}' is not defined", name))
    }

    pub fn zero_division() -> Self {
        Self::exception("ZeroDivisionError", "division by zero")
    }

    /// Exception class name, `SyntaxError` for compile failures.
    pub fn kind(&self) -> &str {
        match self {
            PyfunError::Syntax { .. } => "SyntaxError",
            PyfunError::Exception { kind, .. } => kind,
            PyfunError::NotAFunction => "TypeError",
        }
    }

    /// Message without the class name or line suffix.
    pub fn message(&self) -> &str {
        match self {
            PyfunError::Syntax { message, .. } => message,
            PyfunError::Exception { message, .. } => message,
            PyfunError::NotAFunction => "string must eval to a function",
        }
    }

    /// Attach the line of the statement that raised, keeping the innermost one.
    pub(crate) fn at_line(self, at: usize) -> Self {
        match self {
            PyfunError::Exception {
                kind,
                message,
                line: None,
            } => PyfunError::Exception {
                kind,
                message,
                line: Some(at),
            },
            other => other,
        }
    }

    /// Runtime exceptions are catchable by user code; compile failures are not.
    pub fn is_exception(&self) -> bool {
        matches!(self, PyfunError::Exception { .. })
    }

    /// Check whether an `except` clause naming `class` catches this error.
    pub fn matches(&self, class: &str) -> bool {
        match self {
            PyfunError::Exception { kind, .. } => {
                class == "Exception" || class == "BaseException" || class == kind
            }
            _ => false,
        }
    }
}

impl serde::Serialize for PyfunError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PyfunError::syntax("invalid syntax", 3);
        assert_eq!(err.to_string(), "SyntaxError: invalid syntax (line 3)");

        let err = PyfunError::exception("KeyError", "'field'");
        assert_eq!(err.to_string(), "KeyError: 'field'");

        let err = PyfunError::exception("KeyError", "'field'").at_line(4);
        assert_eq!(err.to_string(), "KeyError: 'field' (line 4)");

        let err = PyfunError::exception("StopIteration", "");
        assert_eq!(err.to_string(), "StopIteration");
    }

    #[test]
    fn test_innermost_line_wins() {
        let err = PyfunError::zero_division().at_line(2).at_line(7);
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero (line 2)");
    }

    #[test]
    fn test_matches() {
        let err = PyfunError::exception("Forbidden", "nope");
        assert!(err.matches("Forbidden"));
        assert!(err.matches("Exception"));
        assert!(!err.matches("KeyError"));
        assert!(!PyfunError::syntax("x", 1).matches("Exception"));
    }
}
