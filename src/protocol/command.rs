use serde_json::{Map, Value};

use crate::error::{ServerError, ServerResult};

/// A parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `["reset"]` or `["reset", config]`
    Reset { config: Option<Map<String, Value>> },
    /// `["add_fun", source]`
    AddFun { source: String },
    /// `["map_doc", document]`
    MapDoc { document: Value },
    /// `["reduce", [source, ...], [[key, value], ...]]`
    Reduce {
        sources: Vec<String>,
        rows: Vec<(Value, Value)>,
    },
    /// `["rereduce", [source, ...], [value, ...]]`
    Rereduce {
        sources: Vec<String>,
        values: Vec<Value>,
    },
    /// `["ddoc", "new", id, ddoc]`
    DdocNew {
        id: String,
        document: Map<String, Value>,
    },
    /// `["ddoc", id, [path, ...], [arg, ...]]`
    DdocInvoke {
        id: String,
        path: Vec<String>,
        args: Vec<Value>,
    },
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> ServerResult<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ServerError::protocol(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> ServerResult<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ServerError::protocol(format!(
                    "expected a command array, got {}",
                    type_name(&other)
                )))
            }
        };

        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(ServerError::protocol(format!(
                    "command name must be a string, got {}",
                    type_name(&other)
                )))
            }
            None => return Err(ServerError::protocol("empty command")),
        };
        let args: Vec<Value> = items.collect();

        match name.as_str() {
            "reset" => match args.len() {
                0 => Ok(Command::Reset { config: None }),
                1 => match args.into_iter().next() {
                    Some(Value::Object(config)) => Ok(Command::Reset {
                        config: Some(config),
                    }),
                    Some(Value::Null) => Ok(Command::Reset { config: None }),
                    _ => Err(ServerError::protocol("reset config must be an object")),
                },
                n => Err(arity_error("reset", "at most 1", n)),
            },
            "add_fun" => {
                let [source] = take::<1>("add_fun", args)?;
                Ok(Command::AddFun {
                    source: expect_string("add_fun", source)?,
                })
            }
            "map_doc" => {
                let [document] = take::<1>("map_doc", args)?;
                Ok(Command::MapDoc { document })
            }
            "reduce" => {
                let [sources, rows] = take::<2>("reduce", args)?;
                let rows = expect_array("reduce", rows)?
                    .into_iter()
                    .map(|row| match row {
                        Value::Array(pair) if pair.len() == 2 => {
                            let mut pair = pair.into_iter();
                            let key = pair.next().unwrap_or(Value::Null);
                            let value = pair.next().unwrap_or(Value::Null);
                            Ok((key, value))
                        }
                        _ => Err(ServerError::protocol(
                            "reduce rows must be [key, value] pairs",
                        )),
                    })
                    .collect::<ServerResult<Vec<_>>>()?;
                Ok(Command::Reduce {
                    sources: expect_sources("reduce", sources)?,
                    rows,
                })
            }
            "rereduce" => {
                let [sources, values] = take::<2>("rereduce", args)?;
                Ok(Command::Rereduce {
                    sources: expect_sources("rereduce", sources)?,
                    values: expect_array("rereduce", values)?,
                })
            }
            "ddoc" => Self::parse_ddoc(args),
            other => Err(ServerError::protocol(format!("unknown command '{}'", other))),
        }
    }

    fn parse_ddoc(args: Vec<Value>) -> ServerResult<Self> {
        if args.first() == Some(&Value::String("new".to_string())) {
            let [_, id, document] = take::<3>("ddoc new", args)?;
            let document = match document {
                Value::Object(map) => map,
                other => {
                    return Err(ServerError::protocol(format!(
                        "design document must be an object, got {}",
                        type_name(&other)
                    )))
                }
            };
            return Ok(Command::DdocNew {
                id: expect_string("ddoc new", id)?,
                document,
            });
        }

        let [id, path, call_args] = take::<3>("ddoc", args)?;
        let path = expect_array("ddoc", path)?
            .into_iter()
            .map(|segment| expect_string("ddoc", segment))
            .collect::<ServerResult<Vec<_>>>()?;
        if path.is_empty() {
            return Err(ServerError::protocol("ddoc path must not be empty"));
        }
        Ok(Command::DdocInvoke {
            id: expect_string("ddoc", id)?,
            path,
            args: expect_array("ddoc", call_args)?,
        })
    }

    /// Command name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset { .. } => "reset",
            Command::AddFun { .. } => "add_fun",
            Command::MapDoc { .. } => "map_doc",
            Command::Reduce { .. } => "reduce",
            Command::Rereduce { .. } => "rereduce",
            Command::DdocNew { .. } => "ddoc new",
            Command::DdocInvoke { .. } => "ddoc",
        }
    }
}

fn take<const N: usize>(command: &str, args: Vec<Value>) -> ServerResult<[Value; N]> {
    let count = args.len();
    args.try_into()
        .map_err(|_| arity_error(command, &N.to_string(), count))
}

fn arity_error(command: &str, expected: &str, got: usize) -> ServerError {
    ServerError::protocol(format!(
        "'{}' expects {} argument(s), got {}",
        command, expected, got
    ))
}

fn expect_string(command: &str, value: Value) -> ServerResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ServerError::protocol(format!(
            "'{}' expects a string, got {}",
            command,
            type_name(&other)
        ))),
    }
}

fn expect_array(command: &str, value: Value) -> ServerResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ServerError::protocol(format!(
            "'{}' expects an array, got {}",
            command,
            type_name(&other)
        ))),
    }
}

fn expect_sources(command: &str, value: Value) -> ServerResult<Vec<String>> {
    expect_array(command, value)?
        .into_iter()
        .map(|source| expect_string(command, source))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
