//! Runtime for the Python-subset language provided by `pyfun-core`.

use std::rc::Rc;

use pyfun_core::{Interpreter, Program, PyfunError, Value as PyValue};
use serde_json::Value;

use super::{Invocable, Runtime, PYTHON};
use crate::error::{Rejection, ServerError, ServerResult};
use crate::log_channel::LogChannel;

/// Compiles Python-subset sources against one shared interpreter.
pub struct PythonRuntime {
    interpreter: Rc<Interpreter>,
}

impl PythonRuntime {
    pub fn new(log: LogChannel, recursion_limit: usize) -> Self {
        let mut interpreter = Interpreter::new().with_recursion_limit(recursion_limit);

        interpreter.register_native("log", move |args| {
            match args {
                [PyValue::Str(message)] => log.emit(message.to_string()),
                [value] => match value.to_json() {
                    Ok(json) => log.emit_value(&json),
                    Err(_) => log.emit(value.repr()),
                },
                _ => {
                    return Err(PyfunError::type_error(format!(
                        "log() takes exactly one argument ({} given)",
                        args.len()
                    )))
                }
            }
            Ok(PyValue::None)
        });

        Self {
            interpreter: Rc::new(interpreter),
        }
    }
}

impl Runtime for PythonRuntime {
    fn language(&self) -> &'static str {
        PYTHON
    }

    fn compile(&self, source: &str) -> ServerResult<Rc<dyn Invocable>> {
        let program = self
            .interpreter
            .load(source)
            .map_err(|e| ServerError::compile(source, e.to_string()))?;

        Ok(Rc::new(PythonFunction {
            interpreter: self.interpreter.clone(),
            program,
        }))
    }
}

/// A loaded Python-subset function
pub struct PythonFunction {
    interpreter: Rc<Interpreter>,
    program: Program,
}

impl PythonFunction {
    fn invoke(&self, args: Vec<PyValue>) -> ServerResult<PyValue> {
        self.interpreter
            .call(&self.program, args)
            .map_err(invocation_error)
    }
}

impl Invocable for PythonFunction {
    fn language(&self) -> &'static str {
        PYTHON
    }

    // Arguments beyond the declared parameters are dropped, so handlers may
    // ignore trailing ones such as the security object.
    fn call(&self, args: &[Value]) -> ServerResult<Value> {
        let args = args
            .iter()
            .take(self.program.arity())
            .map(PyValue::from_json)
            .collect();
        self.invoke(args)?.to_json().map_err(invocation_error)
    }

    fn map(&self, document: &Value) -> ServerResult<Vec<(Value, Value)>> {
        let result = self.invoke(vec![PyValue::from_json(document)])?;
        if result == PyValue::None {
            return Ok(Vec::new());
        }

        let rows = match result.to_json().map_err(invocation_error)? {
            Value::Array(rows) => rows,
            other => {
                return Err(ServerError::Invocation(format!(
                    "TypeError: map function must produce (key, value) pairs, got {}",
                    other
                )))
            }
        };

        rows.into_iter()
            .map(|row| match row {
                Value::Array(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    Ok((
                        pair.next().unwrap_or(Value::Null),
                        pair.next().unwrap_or(Value::Null),
                    ))
                }
                other => Err(ServerError::Invocation(format!(
                    "ValueError: map rows must be (key, value) pairs, got {}",
                    other
                ))),
            })
            .collect()
    }

    fn reduce(
        &self,
        keys: Option<&[Value]>,
        values: &[Value],
        rereduce: bool,
    ) -> ServerResult<Value> {
        let keys = match keys {
            Some(keys) => PyValue::tuple(keys.iter().map(PyValue::from_json).collect()),
            None => PyValue::None,
        };
        let values: Vec<PyValue> = values.iter().map(PyValue::from_json).collect();
        let values = if rereduce {
            PyValue::list(values)
        } else {
            PyValue::tuple(values)
        };

        let mut args = vec![keys, values];
        if self.program.arity() >= 3 {
            args.push(PyValue::Bool(rereduce));
        }
        self.invoke(args)?.to_json().map_err(invocation_error)
    }
}

fn invocation_error(err: PyfunError) -> ServerError {
    match Rejection::from_class(err.kind()) {
        Some(kind) => ServerError::Rejected {
            kind,
            message: err.message().to_string(),
        },
        None => ServerError::Invocation(err.to_string()),
    }
}
