//! Lua 5.4 runtime
//!
//! Every function shares one sandboxed Lua state. Map functions report rows
//! through the global `emit(key, value)`; `log`, `forbidden` and
//! `unauthorized` are the only other host entry points.

pub mod conversion;

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{
    Error as LuaError, Function as LuaFunction, Lua, MultiValue, Result as LuaResult,
    Value as LuaValue,
};
use serde_json::Value;

use self::conversion::{json_to_lua, lua_value_to_json};
use super::{Invocable, Runtime, LUA};
use crate::error::{Rejection, ServerError, ServerResult};
use crate::log_channel::LogChannel;

/// Globals removed from the state before any user code runs
const UNSAFE_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "dofile", "load", "loadfile", "require",
];

/// Raised by `forbidden(msg)` and `unauthorized(msg)`
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RejectionError {
    pub kind: Rejection,
    pub message: String,
}

type EmittedRows = Rc<RefCell<Vec<(Value, Value)>>>;

struct LuaState {
    lua: Lua,
    emitted: EmittedRows,
}

/// Compiles Lua sources into functions bound to a shared sandboxed state.
pub struct LuaRuntime {
    state: Rc<LuaState>,
}

impl LuaRuntime {
    pub fn new(log: LogChannel, memory_limit: Option<usize>) -> ServerResult<Self> {
        let lua = Lua::new();
        let emitted: EmittedRows = Rc::new(RefCell::new(Vec::new()));

        secure_globals(&lua)?;
        register_globals(&lua, log, emitted.clone())
            .map_err(|e| ServerError::Internal(format!("Failed to set up Lua globals: {}", e)))?;

        if let Some(limit) = memory_limit {
            lua.set_memory_limit(limit).map_err(|e| {
                ServerError::Internal(format!("Failed to set Lua memory limit: {}", e))
            })?;
        }

        Ok(Self {
            state: Rc::new(LuaState { lua, emitted }),
        })
    }
}

fn secure_globals(lua: &Lua) -> ServerResult<()> {
    let globals = lua.globals();
    for name in UNSAFE_GLOBALS {
        globals
            .set(*name, LuaValue::Nil)
            .map_err(|e| ServerError::Internal(format!("Failed to secure {}: {}", name, e)))?;
    }
    Ok(())
}

fn register_globals(lua: &Lua, log: LogChannel, emitted: EmittedRows) -> LuaResult<()> {
    let globals = lua.globals();

    let emit = lua.create_function(move |_, (key, value): (LuaValue, LuaValue)| {
        let row = (lua_value_to_json(&key)?, lua_value_to_json(&value)?);
        emitted.borrow_mut().push(row);
        Ok(())
    })?;
    globals.set("emit", emit)?;

    let log_sink = log.clone();
    let log_fn = lua.create_function(move |_, value: LuaValue| {
        match &value {
            LuaValue::String(s) => log_sink.emit(s.to_str()?.to_string()),
            other => log_sink.emit_value(&lua_value_to_json(other)?),
        }
        Ok(())
    })?;
    globals.set("log", log_fn)?;

    // stdout carries protocol frames, so print goes to the log channel too
    let print = lua.create_function(move |_, args: MultiValue| {
        let mut parts = Vec::with_capacity(args.len());
        for arg in args.iter() {
            parts.push(match arg {
                LuaValue::String(s) => s.to_str()?.to_string(),
                other => lua_value_to_json(other)
                    .map(|json| json.to_string())
                    .unwrap_or_else(|_| other.type_name().to_string()),
            });
        }
        log.emit(parts.join("\t"));
        Ok(())
    })?;
    globals.set("print", print)?;

    for (name, kind) in [
        ("forbidden", Rejection::Forbidden),
        ("unauthorized", Rejection::Unauthorized),
    ] {
        let reject = lua.create_function(move |_, message: String| -> LuaResult<()> {
            Err(LuaError::external(RejectionError { kind, message }))
        })?;
        globals.set(name, reject)?;
    }

    Ok(())
}

impl Runtime for LuaRuntime {
    fn language(&self) -> &'static str {
        LUA
    }

    fn compile(&self, source: &str) -> ServerResult<Rc<dyn Invocable>> {
        let value = self
            .state
            .lua
            .load(source)
            .eval::<LuaValue>()
            .map_err(|e| ServerError::compile(source, root_cause(&e).to_string()))?;

        match value {
            LuaValue::Function(function) => Ok(Rc::new(LuaHandler {
                state: self.state.clone(),
                function,
            })),
            _ => Err(ServerError::compile(
                source,
                "string must eval to a function (ex: \"function(doc) emit(doc._id, nil) end\")",
            )),
        }
    }
}

/// A compiled Lua function
pub struct LuaHandler {
    state: Rc<LuaState>,
    function: LuaFunction,
}

impl LuaHandler {
    fn to_lua_args(&self, args: &[Value]) -> ServerResult<MultiValue> {
        args.iter()
            .map(|arg| json_to_lua(&self.state.lua, arg))
            .collect::<LuaResult<MultiValue>>()
            .map_err(invocation_error)
    }
}

impl Invocable for LuaHandler {
    fn language(&self) -> &'static str {
        LUA
    }

    fn call(&self, args: &[Value]) -> ServerResult<Value> {
        let args = self.to_lua_args(args)?;
        let results: MultiValue = self.function.call(args).map_err(invocation_error)?;

        let mut values = results
            .iter()
            .map(lua_value_to_json)
            .collect::<LuaResult<Vec<_>>>()
            .map_err(invocation_error)?;
        Ok(match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Array(values),
        })
    }

    fn map(&self, document: &Value) -> ServerResult<Vec<(Value, Value)>> {
        let args = self.to_lua_args(std::slice::from_ref(document))?;

        self.state.emitted.borrow_mut().clear();
        let outcome = self.function.call::<()>(args);
        let rows = std::mem::take(&mut *self.state.emitted.borrow_mut());

        outcome.map_err(invocation_error)?;
        Ok(rows)
    }

    fn reduce(
        &self,
        keys: Option<&[Value]>,
        values: &[Value],
        rereduce: bool,
    ) -> ServerResult<Value> {
        let lua = &self.state.lua;
        let keys = match keys {
            Some(keys) => json_to_lua(lua, &Value::Array(keys.to_vec())),
            None => Ok(LuaValue::Nil),
        }
        .map_err(invocation_error)?;
        let values = json_to_lua(lua, &Value::Array(values.to_vec())).map_err(invocation_error)?;

        let result: LuaValue = self
            .function
            .call((keys, values, rereduce))
            .map_err(invocation_error)?;
        lua_value_to_json(&result).map_err(invocation_error)
    }
}

/// Innermost error, looking through callback and context wrappers.
fn root_cause(err: &LuaError) -> &LuaError {
    match err {
        LuaError::CallbackError { cause, .. } => root_cause(cause),
        LuaError::WithContext { cause, .. } => root_cause(cause),
        other => other,
    }
}

fn invocation_error(err: LuaError) -> ServerError {
    match root_cause(&err) {
        LuaError::ExternalError(inner) => match inner.downcast_ref::<RejectionError>() {
            Some(rejection) => ServerError::Rejected {
                kind: rejection.kind,
                message: rejection.message.clone(),
            },
            None => ServerError::Invocation(inner.to_string()),
        },
        LuaError::MemoryError(message) => {
            ServerError::FatalInvocation(format!("Lua memory limit exceeded: {}", message))
        }
        cause => ServerError::Invocation(cause.to_string()),
    }
}
