use thiserror::Error;

use crate::protocol::Frame;

/// Kind of refusal raised by a validation function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Forbidden,
    Unauthorized,
}

impl Rejection {
    /// Key used in validation results and error frame ids.
    pub fn key(&self) -> &'static str {
        match self {
            Rejection::Forbidden => "forbidden",
            Rejection::Unauthorized => "unauthorized",
        }
    }

    /// Map an exception class name raised by user code.
    pub fn from_class(class: &str) -> Option<Self> {
        match class {
            "Forbidden" => Some(Rejection::Forbidden),
            "Unauthorized" => Some(Rejection::Unauthorized),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{reason}")]
    Compile { source_text: String, reason: String },

    #[error("{0}")]
    Invocation(String),

    #[error("{0}")]
    FatalInvocation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ReduceOverflow(String),

    #[error("{message}")]
    Rejected { kind: Rejection, message: String },

    #[error("Unsupported handler group '{0}'")]
    UnsupportedHandler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn compile(source_text: impl Into<String>, reason: impl Into<String>) -> Self {
        ServerError::Compile {
            source_text: source_text.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ServerError::Protocol(message.into())
    }

    /// Fatal errors end the session after a diagnostic frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::Protocol(_)
                | ServerError::Config(_)
                | ServerError::FatalInvocation(_)
                | ServerError::Io(_)
                | ServerError::Json(_)
                | ServerError::Internal(_)
        )
    }

    /// Error id reported in the frame when no command-specific id applies.
    pub fn frame_id(&self) -> &'static str {
        match self {
            ServerError::Compile { .. } => "compilation_error",
            ServerError::Invocation(_) => "runtime_error",
            ServerError::NotFound(_) => "not_found",
            ServerError::ReduceOverflow(_) => "reduce_overflow_error",
            ServerError::Rejected { kind, .. } => kind.key(),
            ServerError::UnsupportedHandler(_) => "unsupported_handler",
            _ => "query_server_error",
        }
    }

    /// Error frame using the default id.
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.frame_id(), self.to_string())
    }

    /// Error frame, replacing the id of compile errors.
    pub fn to_frame_with_compile_id(&self, compile_id: &str) -> Frame {
        match self {
            ServerError::Compile { .. } => Frame::error(compile_id, self.to_string()),
            _ => self.to_frame(),
        }
    }
}
