//! Methods on `str`, `list` and `dict` values.

use std::rc::Rc;

use crate::error::{PyfunError, PyfunResult};
use crate::value::{BoundMethod, Dict, Value};

use super::format::str_format;
use super::operators::iterate;
use super::Interpreter;

const STR_METHODS: &[&str] = &[
    "count",
    "endswith",
    "find",
    "format",
    "isdigit",
    "join",
    "lower",
    "lstrip",
    "replace",
    "rstrip",
    "split",
    "startswith",
    "strip",
    "upper",
];

const LIST_METHODS: &[&str] = &[
    "append", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear",
    "copy",
    "get",
    "items",
    "keys",
    "pop",
    "setdefault",
    "update",
    "values",
];

fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

/// Resolve `receiver.name` to a bound method value.
pub(crate) fn bind(receiver: Value, name: &str) -> PyfunResult<Value> {
    if !has_method(&receiver, name) {
        return Err(PyfunError::exception(
            "AttributeError",
            format!(
                "'{}' object has no attribute '{}'",
                receiver.type_name(),
                name
            ),
        ));
    }
    Ok(Value::Method(Rc::new(BoundMethod {
        receiver,
        name: name.to_string(),
    })))
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> PyfunResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {}", min)
        } else if args.len() < min {
            format!("at least {}", min)
        } else {
            format!("at most {}", max)
        };
        return Err(PyfunError::type_error(format!(
            "{}() takes {} argument{} ({} given)",
            name,
            expected,
            if min == max && min == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> PyfunResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(PyfunError::type_error(format!(
            "{}() takes no keyword arguments",
            name
        )))
    }
}

fn expect_str<'a>(method: &str, value: &'a Value) -> PyfunResult<&'a str> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(PyfunError::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn optional_chars<'a>(method: &str, args: &'a [Value]) -> PyfunResult<Option<&'a str>> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(value) => expect_str(method, value).map(Some),
    }
}

/// Check `s.startswith(prefix)` style arguments that accept a str or a tuple of str.
fn affix_matches(
    method: &str,
    arg: &Value,
    test: impl Fn(&str) -> bool,
) -> PyfunResult<bool> {
    match arg {
        Value::Tuple(options) => {
            for option in options.iter() {
                if test(expect_str(method, option)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Ok(test(expect_str(method, other)?)),
    }
}

fn normalize_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    index.clamp(0, len) as usize
}

impl Interpreter {
    pub(crate) fn call_method(
        &self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        match receiver {
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::List(_) => self.list_method(receiver, name, args, kwargs),
            Value::Dict(_) => self.dict_method(receiver, name, args, kwargs),
            other => Err(PyfunError::exception(
                "AttributeError",
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            )),
        }
    }

    fn str_method(
        &self,
        s: &str,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        if name == "format" {
            return Ok(Value::str(str_format(s, &args, &kwargs)?));
        }
        no_kwargs(name, &kwargs)?;

        match name {
            "lower" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::str(s.to_lowercase()))
            }
            "upper" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::str(s.to_uppercase()))
            }
            "isdigit" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::Bool(
                    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
                ))
            }
            "strip" | "lstrip" | "rstrip" => {
                arity(name, &args, 0, 1)?;
                let chars = optional_chars(name, &args)?;
                let is_stripped = |c: char| match chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                let result = match name {
                    "strip" => s.trim_matches(is_stripped),
                    "lstrip" => s.trim_start_matches(is_stripped),
                    _ => s.trim_end_matches(is_stripped),
                };
                Ok(Value::str(result))
            }
            "split" => {
                arity(name, &args, 0, 2)?;
                let separator = optional_chars(name, &args)?;
                let max_split = match args.get(1) {
                    Some(value) => value
                        .as_int()
                        .ok_or_else(|| PyfunError::type_error("maxsplit must be an integer"))?,
                    None => -1,
                };
                let limit = if max_split < 0 {
                    usize::MAX
                } else {
                    max_split as usize + 1
                };
                let parts: Vec<Value> = match separator {
                    Some("") => return Err(PyfunError::value_error("empty separator")),
                    Some(sep) => s.splitn(limit, sep).map(Value::str).collect(),
                    None => split_whitespace(s, limit).into_iter().map(Value::str).collect(),
                };
                Ok(Value::list(parts))
            }
            "join" => {
                arity(name, &args, 1, 1)?;
                let mut parts = Vec::new();
                for (i, item) in iterate(&args[0])?.iter().enumerate() {
                    match item {
                        Value::Str(part) => parts.push(part.to_string()),
                        other => {
                            return Err(PyfunError::type_error(format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                other.type_name()
                            )))
                        }
                    }
                }
                Ok(Value::str(parts.join(s)))
            }
            "startswith" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Bool(affix_matches(name, &args[0], |p| {
                    s.starts_with(p)
                })?))
            }
            "endswith" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Bool(affix_matches(name, &args[0], |p| s.ends_with(p))?))
            }
            "replace" => {
                arity(name, &args, 2, 3)?;
                let old = expect_str(name, &args[0])?;
                let new = expect_str(name, &args[1])?;
                let result = match args.get(2).and_then(Value::as_int) {
                    Some(count) if count >= 0 => s.replacen(old, new, count as usize),
                    _ => s.replace(old, new),
                };
                Ok(Value::str(result))
            }
            "find" => {
                arity(name, &args, 1, 1)?;
                let needle = expect_str(name, &args[0])?;
                let position = s
                    .find(needle)
                    .map(|byte| s[..byte].chars().count() as i64)
                    .unwrap_or(-1);
                Ok(Value::Int(position))
            }
            "count" => {
                arity(name, &args, 1, 1)?;
                let needle = expect_str(name, &args[0])?;
                let count = if needle.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(needle).count()
                };
                Ok(Value::Int(count as i64))
            }
            _ => Err(PyfunError::exception(
                "AttributeError",
                format!("'str' object has no attribute '{}'", name),
            )),
        }
    }

    fn list_method(
        &self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        let Value::List(list) = receiver else {
            return Err(PyfunError::type_error("list method on a non-list"));
        };

        if name == "sort" {
            arity(name, &args, 0, 0)?;
            let mut key = None;
            let mut reverse = false;
            for (kw, value) in &kwargs {
                match kw.as_str() {
                    "key" => key = Some(value.clone()),
                    "reverse" => reverse = value.truthy(),
                    other => {
                        return Err(PyfunError::type_error(format!(
                            "'{}' is an invalid keyword argument for sort()",
                            other
                        )))
                    }
                }
            }
            // The key function may run user code, so sort a copy.
            let mut items = list.borrow().clone();
            self.sort_values(&mut items, key.as_ref(), reverse)?;
            *list.borrow_mut() = items;
            return Ok(Value::None);
        }
        no_kwargs(name, &kwargs)?;

        match name {
            "append" => {
                arity(name, &args, 1, 1)?;
                list.borrow_mut().extend(args);
                Ok(Value::None)
            }
            "extend" => {
                arity(name, &args, 1, 1)?;
                let items = iterate(&args[0])?;
                list.borrow_mut().extend(items);
                Ok(Value::None)
            }
            "insert" => {
                arity(name, &args, 2, 2)?;
                let index = args[0]
                    .as_int()
                    .ok_or_else(|| PyfunError::type_error("list indices must be integers"))?;
                let mut items = list.borrow_mut();
                let position = normalize_index(index, items.len());
                items.insert(position, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(name, &args, 0, 1)?;
                let mut items = list.borrow_mut();
                if items.is_empty() {
                    return Err(PyfunError::exception("IndexError", "pop from empty list"));
                }
                let len = items.len() as i64;
                let index = match args.first() {
                    Some(value) => value
                        .as_int()
                        .ok_or_else(|| PyfunError::type_error("list indices must be integers"))?,
                    None => -1,
                };
                let resolved = if index < 0 { index + len } else { index };
                if resolved < 0 || resolved >= len {
                    return Err(PyfunError::exception("IndexError", "pop index out of range"));
                }
                Ok(items.remove(resolved as usize))
            }
            "remove" => {
                arity(name, &args, 1, 1)?;
                let mut items = list.borrow_mut();
                match items.iter().position(|item| item.py_eq(&args[0])) {
                    Some(position) => {
                        items.remove(position);
                        Ok(Value::None)
                    }
                    None => Err(PyfunError::value_error("list.remove(x): x not in list")),
                }
            }
            "index" => {
                arity(name, &args, 1, 1)?;
                list.borrow()
                    .iter()
                    .position(|item| item.py_eq(&args[0]))
                    .map(|position| Value::Int(position as i64))
                    .ok_or_else(|| {
                        PyfunError::value_error(format!("{} is not in list", args[0].repr()))
                    })
            }
            "count" => {
                arity(name, &args, 1, 1)?;
                let count = list.borrow().iter().filter(|item| item.py_eq(&args[0])).count();
                Ok(Value::Int(count as i64))
            }
            "reverse" => {
                arity(name, &args, 0, 0)?;
                list.borrow_mut().reverse();
                Ok(Value::None)
            }
            "copy" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::list(list.borrow().clone()))
            }
            _ => Err(PyfunError::exception(
                "AttributeError",
                format!("'list' object has no attribute '{}'", name),
            )),
        }
    }

    fn dict_method(
        &self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        let Value::Dict(dict) = receiver else {
            return Err(PyfunError::type_error("dict method on a non-dict"));
        };

        if name == "update" {
            arity(name, &args, 0, 1)?;
            let mut entries = match args.first() {
                Some(other) => dict_entries(other)?,
                None => Vec::new(),
            };
            entries.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
            let mut target = dict.borrow_mut();
            for (key, value) in entries {
                target.insert(key, value)?;
            }
            return Ok(Value::None);
        }
        no_kwargs(name, &kwargs)?;

        match name {
            "get" => {
                arity(name, &args, 1, 2)?;
                let found = dict.borrow().get(&args[0])?;
                Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
            }
            "keys" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::list(dict.borrow().keys()))
            }
            "values" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::list(dict.borrow().values()))
            }
            "items" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::list(dict.borrow().items()))
            }
            "pop" => {
                arity(name, &args, 1, 2)?;
                let removed = dict.borrow_mut().remove(&args[0])?;
                match (removed, args.get(1)) {
                    (Some(value), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(PyfunError::exception("KeyError", args[0].repr())),
                }
            }
            "setdefault" => {
                arity(name, &args, 1, 2)?;
                let existing = dict.borrow().get(&args[0])?;
                match existing {
                    Some(value) => Ok(value),
                    None => {
                        let default = args.get(1).cloned().unwrap_or(Value::None);
                        dict.borrow_mut().insert(args[0].clone(), default.clone())?;
                        Ok(default)
                    }
                }
            }
            "copy" => {
                arity(name, &args, 0, 0)?;
                Ok(Value::dict(dict.borrow().clone()))
            }
            "clear" => {
                arity(name, &args, 0, 0)?;
                dict.borrow_mut().clear();
                Ok(Value::None)
            }
            _ => Err(PyfunError::exception(
                "AttributeError",
                format!("'dict' object has no attribute '{}'", name),
            )),
        }
    }
}

/// Key/value pairs from a dict or an iterable of pairs.
pub(crate) fn dict_entries(source: &Value) -> PyfunResult<Vec<(Value, Value)>> {
    if let Value::Dict(dict) = source {
        return Ok(dict.borrow().iter().cloned().collect());
    }
    iterate(source)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let pair = iterate(&item)?;
            match <[Value; 2]>::try_from(pair) {
                Ok([key, value]) => Ok((key, value)),
                Err(pair) => Err(PyfunError::value_error(format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    i,
                    pair.len()
                ))),
            }
        })
        .collect()
}

pub(crate) fn dict_from_entries(entries: Vec<(Value, Value)>) -> PyfunResult<Value> {
    let mut dict = Dict::new();
    for (key, value) in entries {
        dict.insert(key, value)?;
    }
    Ok(Value::dict(dict))
}

fn split_whitespace(s: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() + 1 == limit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}
