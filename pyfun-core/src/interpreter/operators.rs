//! Operator semantics: arithmetic, comparison, membership and subscripts.

use std::rc::Rc;

use crate::ast::{BinaryOperator, CompareOperator, UnaryOperator};
use crate::error::{PyfunError, PyfunResult};
use crate::value::{Number, Value};

use super::builtins::MAX_SEQUENCE_LEN;
use super::format::percent_format;

pub(crate) fn unary(op: UnaryOperator, operand: &Value) -> PyfunResult<Value> {
    match (op, operand.as_number()) {
        (UnaryOperator::Not, _) => Ok(Value::Bool(!operand.truthy())),
        (UnaryOperator::Negate, Some(Number::Int(i))) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOperator::Negate, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOperator::Plus, Some(Number::Int(i))) => Ok(Value::Int(i)),
        (UnaryOperator::Plus, Some(Number::Float(f))) => Ok(Value::Float(f)),
        (op, None) => Err(PyfunError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOperator::Negate { "-" } else { "+" },
            operand.type_name()
        ))),
    }
}

pub(crate) fn binary(op: BinaryOperator, left: &Value, right: &Value) -> PyfunResult<Value> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return arithmetic(op, a, b);
    }

    match (op, left, right) {
        (BinaryOperator::Add, Value::Str(a), Value::Str(b)) => {
            Ok(Value::str(format!("{}{}", a, b)))
        }
        (BinaryOperator::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOperator::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinaryOperator::Multiply, sequence, count) | (BinaryOperator::Multiply, count, sequence)
            if count.as_int().is_some() && is_sequence(sequence) =>
        {
            repeat(sequence, count.as_int().unwrap_or(0))
        }
        (BinaryOperator::Modulo, Value::Str(template), args) => {
            Ok(Value::str(percent_format(template, args)?))
        }
        _ => Err(PyfunError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn is_sequence(value: &Value) -> bool {
    matches!(value, Value::Str(_) | Value::List(_) | Value::Tuple(_))
}

fn repeat(sequence: &Value, count: i64) -> PyfunResult<Value> {
    let count = usize::try_from(count.max(0)).map_err(|_| repeat_overflow())?;
    match sequence {
        Value::Str(s) => {
            repeated_len(s.len(), count)?;
            Ok(Value::str(s.repeat(count)))
        }
        Value::List(items) => {
            let items = items.borrow();
            repeated_len(items.len(), count)?;
            Ok(Value::list(repeat_items(&items, count)))
        }
        Value::Tuple(items) => {
            repeated_len(items.len(), count)?;
            Ok(Value::tuple(repeat_items(items, count)))
        }
        other => Err(PyfunError::type_error(format!(
            "can't multiply sequence of type '{}'",
            other.type_name()
        ))),
    }
}

fn repeated_len(len: usize, count: usize) -> PyfunResult<usize> {
    match len.checked_mul(count) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(total),
        _ => Err(repeat_overflow()),
    }
}

fn repeat_overflow() -> PyfunError {
    PyfunError::exception("MemoryError", "repeated sequence too large")
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn overflow() -> PyfunError {
    PyfunError::exception("OverflowError", "integer overflow")
}

fn arithmetic(op: BinaryOperator, a: Number, b: Number) -> PyfunResult<Value> {
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        return integer_arithmetic(op, x, y);
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOperator::Add => x + y,
        BinaryOperator::Subtract => x - y,
        BinaryOperator::Multiply => x * y,
        BinaryOperator::Divide => {
            if y == 0.0 {
                return Err(PyfunError::exception("ZeroDivisionError", "float division by zero"));
            }
            x / y
        }
        BinaryOperator::FloorDivide => {
            if y == 0.0 {
                return Err(PyfunError::exception(
                    "ZeroDivisionError",
                    "float floor division by zero",
                ));
            }
            (x / y).floor()
        }
        BinaryOperator::Modulo => {
            if y == 0.0 {
                return Err(PyfunError::exception("ZeroDivisionError", "float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        BinaryOperator::Power => {
            if x == 0.0 && y < 0.0 {
                return Err(PyfunError::exception(
                    "ZeroDivisionError",
                    "0.0 cannot be raised to a negative power",
                ));
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(result))
}

fn integer_arithmetic(op: BinaryOperator, x: i64, y: i64) -> PyfunResult<Value> {
    let zero_division =
        || PyfunError::exception("ZeroDivisionError", "integer division or modulo by zero");

    let result = match op {
        BinaryOperator::Add => x.checked_add(y),
        BinaryOperator::Subtract => x.checked_sub(y),
        BinaryOperator::Multiply => x.checked_mul(y),
        BinaryOperator::Divide => {
            if y == 0 {
                return Err(PyfunError::zero_division());
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinaryOperator::FloorDivide => {
            if y == 0 {
                return Err(zero_division());
            }
            x.checked_div(y).map(|q| {
                if x % y != 0 && (x < 0) != (y < 0) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinaryOperator::Modulo => {
            if y == 0 {
                return Err(zero_division());
            }
            x.checked_rem(y).map(|r| {
                if r != 0 && (r < 0) != (y < 0) {
                    r + y
                } else {
                    r
                }
            })
        }
        BinaryOperator::Power => {
            if y < 0 {
                if x == 0 {
                    return Err(PyfunError::exception(
                        "ZeroDivisionError",
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp))
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

pub(crate) fn compare(op: CompareOperator, left: &Value, right: &Value) -> PyfunResult<bool> {
    use std::cmp::Ordering::*;

    let symbol = op.symbol();
    Ok(match op {
        CompareOperator::Equal => left.py_eq(right),
        CompareOperator::NotEqual => !left.py_eq(right),
        CompareOperator::LessThan => left.compare(right, symbol)? == Less,
        CompareOperator::LessThanOrEqual => left.compare(right, symbol)? != Greater,
        CompareOperator::GreaterThan => left.compare(right, symbol)? == Greater,
        CompareOperator::GreaterThanOrEqual => left.compare(right, symbol)? != Less,
        CompareOperator::In => contains(right, left)?,
        CompareOperator::NotIn => !contains(right, left)?,
        CompareOperator::Is => is_same(left, right),
        CompareOperator::IsNot => !is_same(left, right),
    })
}

pub(crate) fn contains(container: &Value, item: &Value) -> PyfunResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(PyfunError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(dict) => dict.borrow().contains_key(item),
        other => Err(PyfunError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
        (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

/// Materialize an iterable into its items.
pub(crate) fn iterate(value: &Value) -> PyfunResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(dict) => Ok(dict.borrow().keys()),
        other => Err(PyfunError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn sequence_index(value: &Value, index: &Value, len: usize) -> PyfunResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(PyfunError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            value.type_name(),
            index.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(PyfunError::exception(
            "IndexError",
            format!("{} index out of range", value.type_name()),
        ));
    }
    Ok(resolved as usize)
}

pub(crate) fn get_item(container: &Value, key: &Value) -> PyfunResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = sequence_index(container, key, items.len())?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = sequence_index(container, key, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = sequence_index(container, key, chars.len())?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(key)?
            .ok_or_else(|| PyfunError::exception("KeyError", key.repr())),
        other => Err(PyfunError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(container: &Value, key: Value, value: Value) -> PyfunResult<()> {
    match container {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = sequence_index(container, &key, len)?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(key, value),
        other => Err(PyfunError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_item(container: &Value, key: &Value) -> PyfunResult<()> {
    match container {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = sequence_index(container, key, len)?;
            items.borrow_mut().remove(i);
            Ok(())
        }
        Value::Dict(dict) => dict
            .borrow_mut()
            .remove(key)?
            .map(|_| ())
            .ok_or_else(|| PyfunError::exception("KeyError", key.repr())),
        other => Err(PyfunError::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

/// Positions selected by `[lower:upper:step]` on a sequence of `len` items.
fn slice_positions(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: i64,
) -> Vec<usize> {
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };

    let mut positions = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    positions
}

pub(crate) fn slice(
    container: &Value,
    lower: Option<Value>,
    upper: Option<Value>,
    step: Option<Value>,
) -> PyfunResult<Value> {
    let bound = |value: Option<Value>| -> PyfunResult<Option<i64>> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                PyfunError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    };
    let (lower, upper) = (bound(lower)?, bound(upper)?);
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(PyfunError::value_error("slice step cannot be zero"));
    }

    match container {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::list(picked))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_positions(chars.len(), lower, upper, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::str(picked))
        }
        other => Err(PyfunError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn test_floored_division_and_modulo() {
        let floor = |a, b| binary(BinaryOperator::FloorDivide, &Value::Int(a), &Value::Int(b));
        let modulo = |a, b| binary(BinaryOperator::Modulo, &Value::Int(a), &Value::Int(b));
        assert_eq!(floor(7, 2).unwrap(), Value::Int(3));
        assert_eq!(floor(-7, 2).unwrap(), Value::Int(-4));
        assert_eq!(modulo(-7, 3).unwrap(), Value::Int(2));
        assert_eq!(modulo(7, -3).unwrap(), Value::Int(-2));
        assert_eq!(floor(1, 0).unwrap_err().kind(), "ZeroDivisionError");
    }

    #[test]
    fn test_true_division_returns_float() {
        let result = binary(BinaryOperator::Divide, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(result, Value::Float(f) if f == 3.5));
    }

    #[test]
    fn test_power() {
        let pow = |a, b| binary(BinaryOperator::Power, &Value::Int(a), &Value::Int(b)).unwrap();
        assert_eq!(pow(2, 10), Value::Int(1024));
        assert!(matches!(pow(2, -1), Value::Float(f) if f == 0.5));
    }

    #[test]
    fn test_overflow_is_an_exception() {
        let err = binary(BinaryOperator::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), "OverflowError");
    }

    #[test]
    fn test_oversized_repetition_is_an_exception() {
        let repeat = |sequence: &Value, count: i64| {
            binary(BinaryOperator::Multiply, sequence, &Value::Int(count))
        };
        assert_eq!(repeat(&ints(&[0]), 1 << 62).unwrap_err().kind(), "MemoryError");
        assert_eq!(repeat(&ints(&[1, 2]), i64::MAX).unwrap_err().kind(), "MemoryError");
        assert_eq!(repeat(&Value::str("ab"), 1 << 40).unwrap_err().kind(), "MemoryError");
        assert_eq!(repeat(&ints(&[1]), -5).unwrap(), ints(&[]));
        assert_eq!(repeat(&ints(&[7]), 3).unwrap(), ints(&[7, 7, 7]));
    }

    #[test]
    fn test_sequence_operators() {
        let joined = binary(BinaryOperator::Add, &ints(&[1]), &ints(&[2, 3])).unwrap();
        assert_eq!(joined, ints(&[1, 2, 3]));

        let repeated = binary(BinaryOperator::Multiply, &Value::Int(2), &Value::str("ab")).unwrap();
        assert_eq!(repeated, Value::str("abab"));

        let err = binary(BinaryOperator::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'str' and 'int'"
        );
    }

    #[test]
    fn test_membership_and_identity() {
        assert!(compare(CompareOperator::In, &Value::Int(2), &ints(&[1, 2])).unwrap());
        assert!(compare(CompareOperator::NotIn, &Value::str("z"), &Value::str("abc")).unwrap());
        assert!(compare(CompareOperator::Is, &Value::None, &Value::None).unwrap());

        let list = ints(&[1]);
        assert!(compare(CompareOperator::Is, &list, &list.clone()).unwrap());
        assert!(!compare(CompareOperator::Is, &list, &ints(&[1])).unwrap());
    }

    #[test]
    fn test_indexing() {
        let list = ints(&[10, 20, 30]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap(), Value::Int(30));
        assert_eq!(
            get_item(&list, &Value::Int(3)).unwrap_err().kind(),
            "IndexError"
        );
        assert_eq!(
            get_item(&list, &Value::str("a")).unwrap_err().kind(),
            "TypeError"
        );
    }

    #[test]
    fn test_slices() {
        let list = ints(&[0, 1, 2, 3, 4]);
        let s = |lower: Option<i64>, upper: Option<i64>, step: Option<i64>| {
            slice(
                &list,
                lower.map(Value::Int),
                upper.map(Value::Int),
                step.map(Value::Int),
            )
            .unwrap()
        };
        assert_eq!(s(Some(1), None, None), ints(&[1, 2, 3, 4]));
        assert_eq!(s(None, Some(-2), None), ints(&[0, 1, 2]));
        assert_eq!(s(None, None, Some(-1)), ints(&[4, 3, 2, 1, 0]));
        assert_eq!(s(None, None, Some(2)), ints(&[0, 2, 4]));
        assert_eq!(s(Some(10), None, None), ints(&[]));

        let text = slice(&Value::str("hello"), None, None, Some(Value::Int(-1))).unwrap();
        assert_eq!(text, Value::str("olleh"));
    }
}
