//! Runtime values for the pyfun interpreter.
//!
//! Containers are reference counted so that aliasing behaves the way view
//! function authors expect: mutating a document passed into a function is
//! visible through every name bound to it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value as Json;

use crate::ast::FunctionDef;
use crate::error::{PyfunError, PyfunResult};

/// Module-level name table shared by every function defined in it.
pub type Globals = Rc<RefCell<HashMap<String, Value>>>;

/// Local variables of one function call, shared with closures defined in it
pub type Scope = Rc<RefCell<HashMap<String, Value>>>;

/// Deepest container nesting that `repr`, `to_json` and comparisons walk.
const MAX_NESTING: usize = 128;

/// Host callback exposed to user code as a global name.
pub type NativeFn = dyn Fn(&[Value]) -> PyfunResult<Value>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Function(Rc<Function>),
    /// Interpreter builtin, looked up by name
    Builtin(&'static str),
    Native(Rc<NativeFunction>),
    Method(Rc<BoundMethod>),
    ExceptionClass(Rc<str>),
    Exception(Rc<ExceptionValue>),
}

/// A user-defined function or lambda.
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Default values evaluated at definition time, parallel to `def.params`
    pub defaults: Vec<Option<Value>>,
    /// Enclosing function scopes, innermost first; empty for module-level functions
    pub closure: Vec<Scope>,
    pub(crate) globals: Weak<RefCell<HashMap<String, Value>>>,
}

pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Native(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::ExceptionClass(_) => "type",
            Value::Exception(_) => "exception",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            _ => true,
        }
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`; a container nested in itself prints as `[...]`.
    pub fn repr(&self) -> String {
        self.repr_in(&mut Vec::new())
    }

    fn repr_in(&self, enclosing: &mut Vec<*const ()>) -> String {
        let Some(id) = self.container_id() else {
            return self.scalar_repr();
        };
        if enclosing.contains(&id) || enclosing.len() >= MAX_NESTING {
            return match self {
                Value::List(_) => "[...]",
                Value::Tuple(_) => "(...)",
                _ => "{...}",
            }
            .to_string();
        }

        enclosing.push(id);
        let text = match self {
            Value::List(items) => {
                let items = items.borrow().clone();
                format!("[{}]", join_repr(&items, enclosing))
            }
            Value::Tuple(items) if items.len() == 1 => {
                format!("({},)", items[0].repr_in(enclosing))
            }
            Value::Tuple(items) => format!("({})", join_repr(items, enclosing)),
            Value::Dict(dict) => {
                let entries: Vec<(Value, Value)> = dict.borrow().iter().cloned().collect();
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_in(enclosing), v.repr_in(enclosing)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            other => other.scalar_repr(),
        };
        enclosing.pop();
        text
    }

    /// Identity of a list, tuple or dict, used to detect self-containment.
    fn container_id(&self) -> Option<*const ()> {
        match self {
            Value::List(items) => Some(Rc::as_ptr(items) as *const ()),
            Value::Tuple(items) => Some(Rc::as_ptr(items) as *const ()),
            Value::Dict(dict) => Some(Rc::as_ptr(dict) as *const ()),
            _ => None,
        }
    }

    fn scalar_repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => string_repr(s),
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => self.repr(),
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Native(n) => format!("<built-in function {}>", n.name),
            Value::Method(m) => {
                format!("<bound method {}.{}>", m.receiver.type_name(), m.name)
            }
            Value::ExceptionClass(name) => format!("<class '{}'>", name),
            Value::Exception(e) => format!("{}({})", e.kind, string_repr(&e.message)),
        }
    }

    /// Python `==`: numbers compare across int, float and bool.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_NESTING {
            return false;
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth + 1)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b, depth + 1),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        matches!(b.get(k), Ok(Some(other)) if v.eq_at(&other, depth + 1))
                    })
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.eq(&y),
                _ => false,
            },
        }
    }

    /// Python ordering for `<`, `>`, `sorted()`, `min()` and `max()`.
    pub fn compare(&self, other: &Value, op: &str) -> PyfunResult<Ordering> {
        self.compare_at(other, op, 0)
    }

    fn compare_at(&self, other: &Value, op: &str, depth: usize) -> PyfunResult<Ordering> {
        if depth > MAX_NESTING {
            return Err(PyfunError::exception(
                "RecursionError",
                "maximum recursion depth exceeded in comparison",
            ));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                seq_compare(&a, &b, op, depth + 1)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_compare(a, b, op, depth + 1),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.compare(&y).ok_or_else(|| unorderable(a, b, op)),
                _ => Err(unorderable(a, b, op)),
            },
        }
    }

    pub(crate) fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Integer view used for indices and counts; bools count as ints.
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::str(s),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (key, value) in map {
                    dict.insert_str(key, Value::from_json(value));
                }
                Value::dict(dict)
            }
        }
    }

    /// Serialize the way Python's `json` module would, rejecting values it
    /// cannot represent.
    pub fn to_json(&self) -> PyfunResult<Json> {
        self.to_json_in(&mut Vec::new())
    }

    fn to_json_in(&self, enclosing: &mut Vec<*const ()>) -> PyfunResult<Json> {
        if let Some(id) = self.container_id() {
            if enclosing.contains(&id) {
                return Err(PyfunError::value_error("Circular reference detected"));
            }
            if enclosing.len() >= MAX_NESTING {
                return Err(PyfunError::exception(
                    "RecursionError",
                    "maximum recursion depth exceeded while encoding a JSON object",
                ));
            }
            enclosing.push(id);
            let json = self.container_to_json(enclosing);
            enclosing.pop();
            return json;
        }

        match self {
            Value::None => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Int(i) => Ok(Json::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| {
                    PyfunError::value_error("Out of range float values are not JSON compliant")
                }),
            Value::Str(s) => Ok(Json::String(s.to_string())),
            other => Err(PyfunError::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            ))),
        }
    }

    fn container_to_json(&self, enclosing: &mut Vec<*const ()>) -> PyfunResult<Json> {
        let items = match self {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Dict(dict) => {
                let entries: Vec<(Value, Value)> = dict.borrow().iter().cloned().collect();
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(json_key(&key)?, value.to_json_in(enclosing)?);
                }
                return Ok(Json::Object(map));
            }
            other => return other.to_json_in(enclosing),
        };
        items
            .iter()
            .map(|item| item.to_json_in(enclosing))
            .collect::<PyfunResult<Vec<_>>>()
            .map(Json::Array)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn eq(&self, other: &Number) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }

    fn compare(&self, other: &Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

fn unorderable(a: &Value, b: &Value, op: &str) -> PyfunError {
    PyfunError::type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_at(y, depth))
}

fn seq_compare(a: &[Value], b: &[Value], op: &str, depth: usize) -> PyfunResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.eq_at(y, depth) {
            return x.compare_at(y, op, depth);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn join_repr(items: &[Value], enclosing: &mut Vec<*const ()>) -> String {
    items
        .iter()
        .map(|item| item.repr_in(enclosing))
        .collect::<Vec<_>>()
        .join(", ")
}

fn json_key(key: &Value) -> PyfunResult<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(float_repr(*f)),
        Value::Bool(true) => Ok("true".to_string()),
        Value::Bool(false) => Ok("false".to_string()),
        Value::None => Ok("null".to_string()),
        other => Err(PyfunError::type_error(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

/// Python `repr()` of a float: shortest round-trip digits, always showing
/// a fractional part or an exponent.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Python `repr()` of a string, picking the quote character the same way.
pub fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Hashable projection of a value; equal numbers hash alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Builtin(&'static str),
    Class(Rc<str>),
}

fn hash_key(value: &Value) -> PyfunResult<HashKey> {
    match value {
        Value::None => Ok(HashKey::None),
        Value::Bool(b) => Ok(HashKey::Int(*b as i64)),
        Value::Int(i) => Ok(HashKey::Int(*i)),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                Ok(HashKey::Int(*f as i64))
            } else {
                Ok(HashKey::Float(f.to_bits()))
            }
        }
        Value::Str(s) => Ok(HashKey::Str(s.clone())),
        Value::Tuple(items) => Ok(HashKey::Tuple(
            items.iter().map(hash_key).collect::<PyfunResult<_>>()?,
        )),
        Value::Builtin(name) => Ok(HashKey::Builtin(name)),
        Value::ExceptionClass(name) => Ok(HashKey::Class(name.clone())),
        other => Err(PyfunError::type_error(format!(
            "unhashable type: '{}'",
            other.type_name()
        ))),
    }
}

/// Insertion-ordered dictionary.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> PyfunResult<Option<Value>> {
        let key = hash_key(key)?;
        Ok(self.index.get(&key).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains_key(&self, key: &Value) -> PyfunResult<bool> {
        Ok(self.index.contains_key(&hash_key(key)?))
    }

    /// Insert or replace; an existing key keeps its position.
    pub fn insert(&mut self, key: Value, value: Value) -> PyfunResult<()> {
        let hashed = hash_key(&key)?;
        match self.index.get(&hashed) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn insert_str(&mut self, key: &str, value: Value) {
        let key: Rc<str> = Rc::from(key);
        match self.index.get(&HashKey::Str(key.clone())) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(HashKey::Str(key.clone()), self.entries.len());
                self.entries.push((Value::Str(key), value));
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> PyfunResult<Option<Value>> {
        let hashed = hash_key(key)?;
        let Some(position) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}
