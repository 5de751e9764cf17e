//! Builtin functions and exception classes.

use std::rc::Rc;

use crate::error::{PyfunError, PyfunResult};
use crate::value::{Number, Value};

use super::methods::{dict_entries, dict_from_entries};
use super::operators::{binary, iterate};
use super::Interpreter;
use crate::ast::BinaryOperator;

const FUNCTIONS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "dict",
    "enumerate",
    "float",
    "int",
    "isinstance",
    "len",
    "list",
    "max",
    "min",
    "range",
    "repr",
    "reversed",
    "round",
    "sorted",
    "str",
    "sum",
    "tuple",
    "zip",
];

/// Exception classes user code may raise or catch by name.
pub(crate) const EXCEPTION_CLASSES: &[&str] = &[
    "Exception",
    "BaseException",
    "AttributeError",
    "IndexError",
    "KeyError",
    "MemoryError",
    "NameError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
    "Forbidden",
    "Unauthorized",
];

/// Largest sequence `range()` or repetition will materialize.
pub(crate) const MAX_SEQUENCE_LEN: usize = 10_000_000;

pub(crate) fn lookup(name: &str) -> Option<Value> {
    if let Some(&builtin) = FUNCTIONS.iter().find(|&&f| f == name) {
        return Some(Value::Builtin(builtin));
    }
    EXCEPTION_CLASSES
        .contains(&name)
        .then(|| Value::ExceptionClass(Rc::from(name)))
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> PyfunResult<()> {
    if args.len() < min {
        return Err(PyfunError::type_error(format!(
            "{}() expected at least {} argument{}, got {}",
            name,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        )));
    }
    if args.len() > max {
        return Err(PyfunError::type_error(format!(
            "{}() expected at most {} argument{}, got {}",
            name,
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

/// Split keyword arguments into the accepted names, rejecting the rest.
fn keywords(
    name: &str,
    kwargs: Vec<(String, Value)>,
    accepted: &[&str],
) -> PyfunResult<Vec<Option<Value>>> {
    let mut found = vec![None; accepted.len()];
    for (key, value) in kwargs {
        match accepted.iter().position(|&a| a == key) {
            Some(i) => found[i] = Some(value),
            None => {
                return Err(PyfunError::type_error(format!(
                    "'{}' is an invalid keyword argument for {}()",
                    key, name
                )))
            }
        }
    }
    Ok(found)
}

fn int_arg(name: &str, value: &Value) -> PyfunResult<i64> {
    value.as_int().ok_or_else(|| {
        PyfunError::type_error(format!(
            "{}() argument must be an integer, not '{}'",
            name,
            value.type_name()
        ))
    })
}

pub(crate) fn call(
    interp: &Interpreter,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> PyfunResult<Value> {
    match name {
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let [key, reverse] = <[Option<Value>; 2]>::try_from(keywords(
                name,
                kwargs,
                &["key", "reverse"],
            )?)
            .unwrap_or_default();
            let mut items = iterate(&args[0])?;
            interp.sort_values(
                &mut items,
                key.as_ref(),
                reverse.map(|r| r.truthy()).unwrap_or(false),
            )?;
            Ok(Value::list(items))
        }
        "max" | "min" => extremum(interp, name, args, kwargs),
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut entries = match args.first() {
                Some(source) => dict_entries(source)?,
                None => Vec::new(),
            };
            entries.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
            dict_from_entries(entries)
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let [start] = <[Option<Value>; 1]>::try_from(keywords(name, kwargs, &["start"])?)
                .unwrap_or_default();
            let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(PyfunError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in iterate(&args[0])? {
                total = binary(BinaryOperator::Add, &total, &item)?;
            }
            Ok(total)
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let [start] = <[Option<Value>; 1]>::try_from(keywords(name, kwargs, &["start"])?)
                .unwrap_or_default();
            let start = match args.get(1).or(start.as_ref()) {
                Some(value) => int_arg(name, value)?,
                None => 0,
            };
            let items = iterate(&args[0])?
                .into_iter()
                .enumerate()
                .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
                .collect();
            Ok(Value::list(items))
        }
        _ => {
            if !kwargs.is_empty() {
                return Err(PyfunError::type_error(format!(
                    "{}() takes no keyword arguments",
                    name
                )));
            }
            call_positional(name, args)
        }
    }
}

fn call_positional(name: &str, args: Vec<Value>) -> PyfunResult<Value> {
    match name {
        "abs" => {
            arity(name, &args, 1, 1)?;
            match args[0].as_number() {
                Some(Number::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| PyfunError::exception("OverflowError", "integer overflow")),
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(PyfunError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        "all" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().all(Value::truthy)))
        }
        "any" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().any(Value::truthy)))
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(value) => value
                    .as_number()
                    .map(|n| Value::Float(n.as_f64()))
                    .ok_or_else(|| {
                        PyfunError::type_error(format!(
                            "float() argument must be a string or a number, not '{}'",
                            value.type_name()
                        ))
                    }),
            }
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .replace('_', "")
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| {
                        PyfunError::value_error(format!(
                            "invalid literal for int() with base 10: {}",
                            Value::str(&**s).repr()
                        ))
                    }),
                Some(Value::Float(f)) => {
                    if !f.is_finite() {
                        return Err(PyfunError::value_error(format!(
                            "cannot convert float {} to integer",
                            Value::Float(*f).repr()
                        )));
                    }
                    Ok(Value::Int(f.trunc() as i64))
                }
                Some(value) => value.as_int().map(Value::Int).ok_or_else(|| {
                    PyfunError::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        value.type_name()
                    ))
                }),
            }
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            let classes = match &args[1] {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            let mut result = false;
            for class in &classes {
                result |= match class {
                    Value::Builtin(type_name) => is_instance_of(&args[0], type_name),
                    Value::ExceptionClass(kind) => match &args[0] {
                        Value::Exception(e) => &**kind == "Exception" || e.kind == &**kind,
                        _ => false,
                    },
                    _ => {
                        return Err(PyfunError::type_error(
                            "isinstance() arg 2 must be a type or tuple of types",
                        ))
                    }
                };
            }
            Ok(Value::Bool(result))
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.borrow().len(),
                other => {
                    return Err(PyfunError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(len as i64))
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(value) => Ok(Value::list(iterate(value)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(value) => Ok(Value::tuple(iterate(value)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let bounds = args
                .iter()
                .map(|value| int_arg(name, value))
                .collect::<PyfunResult<Vec<_>>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(PyfunError::type_error("range expected 1 to 3 arguments")),
            };
            if step == 0 {
                return Err(PyfunError::value_error("range() arg 3 must not be zero"));
            }
            let (start, stop, step) = (start as i128, stop as i128, step as i128);
            let len = if step > 0 {
                (stop - start + step - 1).max(0) / step
            } else {
                (start - stop - step - 1).max(0) / -step
            };
            if len > MAX_SEQUENCE_LEN as i128 {
                return Err(PyfunError::exception("MemoryError", "range too large"));
            }
            // Every element lies between start and stop, so it fits in i64
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::Int((start + i * step) as i64))
                    .collect(),
            ))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let digits = match args.get(1) {
                None | Some(Value::None) => None,
                Some(value) => Some(int_arg(name, value)?),
            };
            match (args[0].as_number(), digits) {
                (Some(Number::Int(i)), _) => Ok(Value::Int(i)),
                (Some(Number::Float(f)), None) => {
                    if !f.is_finite() {
                        return Err(PyfunError::value_error(
                            "cannot convert float to integer",
                        ));
                    }
                    Ok(Value::Int(f.round_ties_even() as i64))
                }
                (Some(Number::Float(f)), Some(digits)) => {
                    let scale = 10f64.powi(digits as i32);
                    Ok(Value::Float((f * scale).round_ties_even() / scale))
                }
                (None, _) => Err(PyfunError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    args[0].type_name()
                ))),
            }
        }
        "zip" => {
            let columns = args
                .iter()
                .map(iterate)
                .collect::<PyfunResult<Vec<_>>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..len)
                .map(|i| Value::tuple(columns.iter().map(|column| column[i].clone()).collect()))
                .collect();
            Ok(Value::list(rows))
        }
        other => Err(PyfunError::name_error(other)),
    }
}

fn parse_float(text: &str) -> PyfunResult<f64> {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let unsigned = lowered.trim_start_matches(['+', '-']);
    if matches!(unsigned, "inf" | "infinity" | "nan") {
        let value = if unsigned == "nan" { f64::NAN } else { f64::INFINITY };
        return Ok(if lowered.starts_with('-') { -value } else { value });
    }
    trimmed
        .replace('_', "")
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| {
            PyfunError::value_error(format!(
                "could not convert string to float: {}",
                Value::str(text).repr()
            ))
        })
}

fn is_instance_of(value: &Value, type_name: &str) -> bool {
    match type_name {
        "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
        "bool" => matches!(value, Value::Bool(_)),
        "float" => matches!(value, Value::Float(_)),
        "str" => matches!(value, Value::Str(_)),
        "list" => matches!(value, Value::List(_)),
        "tuple" => matches!(value, Value::Tuple(_)),
        "dict" => matches!(value, Value::Dict(_)),
        _ => false,
    }
}

fn extremum(
    interp: &Interpreter,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> PyfunResult<Value> {
    let [key, default] =
        <[Option<Value>; 2]>::try_from(keywords(name, kwargs, &["key", "default"])?)
            .unwrap_or_default();
    let candidates = match args.len() {
        0 => {
            return Err(PyfunError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => iterate(&args[0])?,
        _ => args,
    };
    if candidates.is_empty() {
        return default.ok_or_else(|| {
            PyfunError::value_error(format!("{}() arg is an empty sequence", name))
        });
    }

    let want = if name == "max" {
        std::cmp::Ordering::Greater
    } else {
        std::cmp::Ordering::Less
    };
    let key_of = |value: &Value| match &key {
        Some(key) if !matches!(key, Value::None) => {
            interp.call_value(key, vec![value.clone()], Vec::new())
        }
        _ => Ok(value.clone()),
    };

    let mut best = candidates[0].clone();
    let mut best_key = key_of(&best)?;
    for candidate in candidates.into_iter().skip(1) {
        let candidate_key = key_of(&candidate)?;
        if candidate_key.compare(&best_key, if name == "max" { ">" } else { "<" })? == want {
            best = candidate;
            best_key = candidate_key;
        }
    }
    Ok(best)
}
