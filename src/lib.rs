pub mod config;
pub mod engine;
pub mod error;
pub mod log_channel;
pub mod protocol;
pub mod registry;
pub mod scripting;
pub mod server;

pub use config::{QueryConfig, ServerConfig};
pub use engine::{ExecutionEngine, HandlerGroup};
pub use error::{Rejection, ServerError, ServerResult};
pub use log_channel::LogChannel;
pub use protocol::{Command, Frame};
pub use registry::{DesignDocument, FunctionTree, Registry};
pub use scripting::{Invocable, Runtime, Runtimes};
pub use server::{QueryServer, Session};
