//! Role-specific invocation of compiled functions.
//!
//! The engine knows the calling convention and result envelope of each role
//! (map, reduce, rereduce and the design-document handler groups). Messages
//! logged by user code go to the shared [`LogChannel`].

use std::rc::Rc;

use serde_json::{json, Map, Value};

use crate::error::{ServerError, ServerResult};
use crate::log_channel::LogChannel;
use crate::scripting::Invocable;

/// Design-document handler groups, named by the first path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerGroup {
    Updates,
    Shows,
    Filters,
    Views,
    ValidateDocUpdate,
}

impl HandlerGroup {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "updates" => Some(HandlerGroup::Updates),
            "shows" => Some(HandlerGroup::Shows),
            "filters" => Some(HandlerGroup::Filters),
            "views" => Some(HandlerGroup::Views),
            "validate_doc_update" => Some(HandlerGroup::ValidateDocUpdate),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandlerGroup::Updates => "updates",
            HandlerGroup::Shows => "shows",
            HandlerGroup::Filters => "filters",
            HandlerGroup::Views => "views",
            HandlerGroup::ValidateDocUpdate => "validate_doc_update",
        }
    }
}

pub struct ExecutionEngine {
    log: LogChannel,
}

impl ExecutionEngine {
    pub fn new(log: LogChannel) -> Self {
        Self { log }
    }

    /// Run every map function over `document`.
    ///
    /// A function that raises contributes no rows; the fault is logged and
    /// the remaining functions still run.
    pub fn map_document(
        &self,
        functions: &[Rc<dyn Invocable>],
        document: &Value,
    ) -> ServerResult<Value> {
        let mut results = Vec::with_capacity(functions.len());
        for function in functions {
            match function.map(document) {
                Ok(rows) => results.push(Value::Array(
                    rows.into_iter()
                        .map(|(key, value)| Value::Array(vec![key, value]))
                        .collect(),
                )),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let doc_id = document.get("_id").cloned().unwrap_or(Value::Null);
                    tracing::warn!(%doc_id, "Map function failed: {}", err);
                    self.log.emit(format!(
                        "function raised exception ({}) with doc._id {}",
                        err, doc_id
                    ));
                    results.push(Value::Array(Vec::new()));
                }
            }
        }
        Ok(Value::Array(results))
    }

    /// Reduce `(key, value)` rows with each function: `[true, [result, ...]]`.
    pub fn reduce(
        &self,
        functions: &[Rc<dyn Invocable>],
        rows: &[(Value, Value)],
    ) -> ServerResult<Value> {
        let (keys, values): (Vec<Value>, Vec<Value>) = rows.iter().cloned().unzip();
        let results = functions
            .iter()
            .map(|function| function.reduce(Some(keys.as_slice()), &values, false))
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(json!([true, results]))
    }

    /// Combine previously reduced values: `[true, [result, ...]]`.
    pub fn rereduce(
        &self,
        functions: &[Rc<dyn Invocable>],
        values: &[Value],
    ) -> ServerResult<Value> {
        let results = functions
            .iter()
            .map(|function| function.reduce(None, values, true))
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(json!([true, results]))
    }

    /// Invoke a design-document function with the convention of its group.
    pub fn invoke_handler(
        &self,
        group: HandlerGroup,
        function: &dyn Invocable,
        args: Vec<Value>,
    ) -> ServerResult<Value> {
        tracing::debug!(group = group.name(), language = function.language(), "Invoking handler");
        match group {
            HandlerGroup::Updates => {
                let [doc, req] = positional::<2>(args);
                match function.call(&[doc, req])? {
                    Value::Array(result) if result.len() == 2 => {
                        let mut result = result.into_iter();
                        let doc = result.next().unwrap_or(Value::Null);
                        let response = result.next().unwrap_or(Value::Null);
                        Ok(json!(["up", doc, into_response(response)]))
                    }
                    other => Err(ServerError::Invocation(format!(
                        "update function must return [doc, response], got {}",
                        other
                    ))),
                }
            }
            HandlerGroup::Shows => {
                let [doc, req] = positional::<2>(args);
                let response = function.call(&[doc, req])?;
                Ok(json!(["resp", into_response(response)]))
            }
            HandlerGroup::Filters => {
                let [docs, req] = positional::<2>(args);
                let results = documents(docs, group)?
                    .into_iter()
                    .map(|doc| Ok(Value::Bool(truthy(&function.call(&[doc, req.clone()])?))))
                    .collect::<ServerResult<Vec<_>>>()?;
                Ok(json!([true, results]))
            }
            HandlerGroup::Views => {
                let [docs] = positional::<1>(args);
                let results = documents(docs, group)?
                    .iter()
                    .map(|doc| Ok(Value::Bool(!function.map(doc)?.is_empty())))
                    .collect::<ServerResult<Vec<_>>>()?;
                Ok(json!([true, results]))
            }
            HandlerGroup::ValidateDocUpdate => match function.call(&args) {
                Ok(_) => Ok(json!(1)),
                Err(ServerError::Rejected { kind, message }) => {
                    let mut rejection = Map::new();
                    rejection.insert(kind.key().to_string(), Value::String(message));
                    Ok(Value::Object(rejection))
                }
                Err(err) => Err(err),
            },
        }
    }
}

/// Take the first `N` arguments, padding with `null`.
fn positional<const N: usize>(args: Vec<Value>) -> [Value; N] {
    let mut args = args.into_iter();
    std::array::from_fn(|_| args.next().unwrap_or(Value::Null))
}

fn documents(docs: Value, group: HandlerGroup) -> ServerResult<Vec<Value>> {
    match docs {
        Value::Array(docs) => Ok(docs),
        other => Err(ServerError::Invocation(format!(
            "{} expect a list of documents, got {}",
            group.name(),
            other
        ))),
    }
}

/// Responses given as a bare string are the body.
fn into_response(response: Value) -> Value {
    match response {
        Value::String(body) => json!({ "body": body }),
        other => other,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
