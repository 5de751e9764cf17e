//! Function runtimes
//!
//! A [`Runtime`] compiles source text into an [`Invocable`]; the execution
//! engine only ever talks to that trait, so languages are interchangeable.

pub mod lua;
pub mod python;

use std::rc::Rc;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::log_channel::LogChannel;

pub use lua::LuaRuntime;
pub use python::PythonRuntime;

/// Language tag of the Python-subset runtime
pub const PYTHON: &str = "python";
/// Language tag of the Lua runtime
pub const LUA: &str = "lua";

/// A compiled user function.
pub trait Invocable {
    fn language(&self) -> &'static str;

    /// Call with positional arguments and return the result.
    ///
    /// Several return values come back as an array.
    fn call(&self, args: &[Value]) -> ServerResult<Value>;

    /// Run as a map function over one document, returning the emitted pairs.
    fn map(&self, document: &Value) -> ServerResult<Vec<(Value, Value)>>;

    /// Run as a reduce function. `keys` is `None` when rereducing.
    fn reduce(&self, keys: Option<&[Value]>, values: &[Value], rereduce: bool)
        -> ServerResult<Value>;
}

/// Compiler for one language.
pub trait Runtime {
    fn language(&self) -> &'static str;

    fn compile(&self, source: &str) -> ServerResult<Rc<dyn Invocable>>;
}

/// The runtimes available to a session, plus the default language.
pub struct Runtimes {
    default_language: String,
    runtimes: Vec<Box<dyn Runtime>>,
}

impl Runtimes {
    pub fn new(config: &ServerConfig, log: &LogChannel) -> ServerResult<Self> {
        let runtimes: Vec<Box<dyn Runtime>> = vec![
            Box::new(PythonRuntime::new(log.clone(), config.recursion_limit)),
            Box::new(LuaRuntime::new(log.clone(), config.lua_memory_limit)?),
        ];

        if !runtimes
            .iter()
            .any(|runtime| runtime.language() == config.language)
        {
            return Err(ServerError::Config(format!(
                "unsupported default language '{}'",
                config.language
            )));
        }

        Ok(Self {
            default_language: config.language.clone(),
            runtimes,
        })
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn get(&self, language: &str) -> Option<&dyn Runtime> {
        self.runtimes
            .iter()
            .find(|runtime| runtime.language() == language)
            .map(|runtime| runtime.as_ref())
    }

    pub fn compile(&self, language: &str, source: &str) -> ServerResult<Rc<dyn Invocable>> {
        let runtime = self.get(language).ok_or_else(|| {
            ServerError::compile(source, format!("unsupported language '{}'", language))
        })?;
        let compiled = runtime.compile(source);
        if let Err(err) = &compiled {
            tracing::warn!(language, "Function failed to compile: {}", err);
        }
        compiled
    }

    /// Compile with the server's default language.
    pub fn compile_default(&self, source: &str) -> ServerResult<Rc<dyn Invocable>> {
        self.compile(&self.default_language, source)
    }
}
