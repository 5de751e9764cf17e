//! String formatting: `template % args` and `str.format()`.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{PyfunError, PyfunResult};
use crate::value::{float_repr, Number, Value};

use super::builtins::MAX_SEQUENCE_LEN;

#[derive(Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> PyfunResult<Option<usize>> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    if digits.is_empty() {
        return Ok(None);
    }
    match digits.parse::<usize>() {
        Ok(n) if n <= MAX_SEQUENCE_LEN => Ok(Some(n)),
        _ => Err(PyfunError::value_error("width or precision too big")),
    }
}

/// printf-style formatting used by the `%` operator on strings.
pub(crate) fn percent_format(template: &str, args: &Value) -> PyfunResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(dict) => Some(dict.clone()),
        _ => None,
    };

    let mut out = String::with_capacity(template.len());
    let mut next = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some(ch) => name.push(ch),
                    None => return Err(PyfunError::value_error("incomplete format key")),
                }
            }
            key = Some(name);
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = Some('+'),
                ' ' => {
                    spec.sign.get_or_insert(' ');
                }
                '0' => spec.zero = true,
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars)?.unwrap_or(0);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(read_number(&mut chars)?.unwrap_or(0));
        }

        let conversion = chars
            .next()
            .ok_or_else(|| PyfunError::value_error("incomplete format"))?;
        if conversion == '%' {
            out.push('%');
            continue;
        }

        let value = match key {
            Some(name) => {
                let dict = mapping
                    .as_ref()
                    .ok_or_else(|| PyfunError::type_error("format requires a mapping"))?;
                let key = Value::str(&name);
                let found = dict.borrow().get(&key)?;
                found.ok_or_else(|| PyfunError::exception("KeyError", key.repr()))?
            }
            None => {
                let value = positional.get(next).cloned().ok_or_else(|| {
                    PyfunError::type_error("not enough arguments for format string")
                })?;
                next += 1;
                value
            }
        };

        let (text, numeric) = convert(conversion, &value, &spec)?;
        out.push_str(&pad(text, &spec, numeric, '>'));
    }

    if mapping.is_none() && next < positional.len() {
        return Err(PyfunError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn number_for(conversion: char, value: &Value) -> PyfunResult<Number> {
    value.as_number().ok_or_else(|| {
        PyfunError::type_error(format!(
            "%{} format: a real number is required, not {}",
            conversion,
            value.type_name()
        ))
    })
}

fn truncate(text: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => text.chars().take(p).collect(),
        None => text,
    }
}

fn with_sign(text: String, negative: bool, sign: Option<char>) -> String {
    match (negative, sign) {
        (false, Some(sign)) => format!("{}{}", sign, text),
        _ => text,
    }
}

fn convert(conversion: char, value: &Value, spec: &Spec) -> PyfunResult<(String, bool)> {
    let text = match conversion {
        's' => return Ok((truncate(value.to_str(), spec.precision), false)),
        'r' => return Ok((truncate(value.repr(), spec.precision), false)),
        'c' => {
            let text = match value {
                Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                other => other
                    .as_int()
                    .and_then(|i| u32::try_from(i).ok())
                    .and_then(char::from_u32)
                    .map(String::from)
                    .ok_or_else(|| PyfunError::type_error("%c requires int or char"))?,
            };
            return Ok((text, false));
        }
        'd' | 'i' | 'u' => {
            let i = match number_for(conversion, value)? {
                Number::Int(i) => i,
                Number::Float(f) => f.trunc() as i64,
            };
            with_sign(i.to_string(), i < 0, spec.sign)
        }
        'x' | 'X' | 'o' => {
            let i = value.as_int().ok_or_else(|| {
                PyfunError::type_error(format!(
                    "%{} format: an integer is required, not {}",
                    conversion,
                    value.type_name()
                ))
            })?;
            let magnitude = i.unsigned_abs();
            let digits = match conversion {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                _ => format!("{:o}", magnitude),
            };
            if i < 0 {
                format!("-{}", digits)
            } else {
                with_sign(digits, false, spec.sign)
            }
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let f = number_for(conversion, value)?.as_f64();
            with_sign(float_format(f, conversion, spec.precision), f < 0.0, spec.sign)
        }
        other => {
            return Err(PyfunError::value_error(format!(
                "unsupported format character '{}' (0x{:x})",
                other, other as u32
            )))
        }
    };
    Ok((text, true))
}

fn float_format(f: f64, kind: char, precision: Option<usize>) -> String {
    if !f.is_finite() {
        let text = float_repr(f);
        return if kind.is_ascii_uppercase() {
            text.to_uppercase()
        } else {
            text
        };
    }
    let precision = precision.unwrap_or(6);
    let text = match kind {
        'f' | 'F' => format!("{:.*}", precision, f),
        'e' | 'E' => exponent_format(f, precision),
        _ => general_format(f, precision),
    };
    if kind.is_ascii_uppercase() {
        text.to_uppercase()
    } else {
        text
    }
}

fn exponent_format(f: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, f);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exponent.abs())
}

fn strip_fraction_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn general_format(f: f64, precision: usize) -> String {
    let precision = precision.max(1);
    let rounded = format!("{:.*e}", precision - 1, f);
    let exponent: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        strip_fraction_zeros(&format!("{:.*}", decimals, f))
    } else {
        let text = exponent_format(f, precision - 1);
        match text.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", strip_fraction_zeros(mantissa), exp),
            None => text,
        }
    }
}

fn pad(text: String, spec: &Spec, numeric: bool, default_align: char) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text;
    }
    let missing = spec.width - len;

    if spec.zero && numeric && spec.align.is_none() {
        let (sign, digits) = match text.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), text[1..].to_string()),
            _ => (String::new(), text),
        };
        return format!("{}{}{}", sign, "0".repeat(missing), digits);
    }

    let fill = spec.fill.unwrap_or(' ').to_string();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}", text, fill.repeat(missing)),
        '^' => {
            let left = missing / 2;
            format!("{}{}{}", fill.repeat(left), text, fill.repeat(missing - left))
        }
        _ => format!("{}{}", fill.repeat(missing), text),
    }
}

/// `str.format()` with positional, numbered and keyword fields.
pub(crate) fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> PyfunResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(PyfunError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(PyfunError::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }

                let (name, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match name.split_once('!') {
                    Some((name, conversion)) => (name, Some(conversion)),
                    None => (name, None),
                };

                let value = if name.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        PyfunError::exception("IndexError", "Replacement index out of range")
                    })?
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index).cloned().ok_or_else(|| {
                        PyfunError::exception("IndexError", "Replacement index out of range")
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| {
                            PyfunError::exception("KeyError", Value::str(name).repr())
                        })?
                };

                let value = match conversion {
                    Some("r") => Value::str(value.repr()),
                    Some("s") => Value::str(value.to_str()),
                    Some(other) => {
                        return Err(PyfunError::value_error(format!(
                            "Unknown conversion specifier {}",
                            other
                        )))
                    }
                    None => value,
                };
                out.push_str(&format_value(&value, spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Apply a format-spec mini-language string to one value.
fn format_value(value: &Value, spec_text: &str) -> PyfunResult<String> {
    let mut spec = Spec::default();
    let mut chars = spec_text.chars().peekable();

    let head: Vec<char> = spec_text.chars().take(2).collect();
    if head.len() == 2 && matches!(head[1], '<' | '>' | '^' | '=') {
        spec.fill = Some(head[0]);
        spec.align = Some(head[1]);
        chars.next();
        chars.next();
    } else if matches!(head.first(), Some('<' | '>' | '^' | '=')) {
        spec.align = head.first().copied();
        chars.next();
    }
    if let Some(&sign @ ('+' | '-' | ' ')) = chars.peek() {
        if sign != '-' {
            spec.sign = Some(sign);
        }
        chars.next();
    }
    if chars.peek() == Some(&'0') {
        spec.zero = true;
        chars.next();
    }
    spec.width = read_number(&mut chars)?.unwrap_or(0);
    if chars.peek() == Some(&',') {
        chars.next();
    }
    if chars.peek() == Some(&'.') {
        chars.next();
        spec.precision = Some(read_number(&mut chars)?.unwrap_or(0));
    }
    let kind = chars.next();
    if chars.next().is_some() {
        return Err(PyfunError::value_error("Invalid format specifier"));
    }
    if spec.align == Some('=') {
        spec.align = None;
        spec.zero = true;
    }

    let (text, numeric) = match (kind, value.as_number()) {
        (None | Some('s'), None) => (truncate(value.to_str(), spec.precision), false),
        (None, Some(Number::Float(f))) if spec.precision.is_some() => (
            with_sign(float_format(f, 'g', spec.precision), f < 0.0, spec.sign),
            true,
        ),
        (None, Some(_)) if !matches!(value, Value::Bool(_)) => {
            let text = value.to_str();
            let negative = text.starts_with('-');
            (with_sign(text, negative, spec.sign), true)
        }
        (None, Some(_)) => (value.to_str(), false),
        (Some('%'), Some(number)) => {
            let f = number.as_f64() * 100.0;
            let text = format!("{}%", float_format(f, 'f', spec.precision));
            (with_sign(text, f < 0.0, spec.sign), true)
        }
        (Some(kind), _) => convert(kind, value, &spec)?,
    };
    Ok(pad(text, &spec, numeric, if numeric { '>' } else { '<' }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::tuple(values.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn test_percent_repr_of_tuple() {
        let values = Value::tuple(vec![ints(&[1, 2, 3])]);
        assert_eq!(
            percent_format("Summing %r", &values).unwrap(),
            "Summing (1, 2, 3)"
        );
    }

    #[test]
    fn test_percent_conversions() {
        let args = Value::tuple(vec![
            Value::str("x"),
            Value::Int(42),
            Value::Float(3.14159),
        ]);
        assert_eq!(
            percent_format("%s=%05d (%.2f) 100%%", &args).unwrap(),
            "x=00042 (3.14) 100%"
        );
        assert_eq!(percent_format("%-4s|", &Value::str("ab")).unwrap(), "ab  |");
        assert_eq!(percent_format("%+d", &Value::Int(5)).unwrap(), "+5");
        assert_eq!(percent_format("%x", &Value::Int(255)).unwrap(), "ff");
        assert_eq!(percent_format("%e", &Value::Float(1500.0)).unwrap(), "1.500000e+03");
        assert_eq!(percent_format("%g", &Value::Float(0.5)).unwrap(), "0.5");
    }

    #[test]
    fn test_percent_mapping() {
        let value = Value::from_json(&serde_json::json!({"name": "bob", "n": 2}));
        assert_eq!(
            percent_format("%(name)s has %(n)d", &value).unwrap(),
            "bob has 2"
        );
    }

    #[test]
    fn test_percent_argument_count_errors() {
        let err = percent_format("%s %s", &Value::str("a")).unwrap_err();
        assert_eq!(err.message(), "not enough arguments for format string");

        let err = percent_format("%s", &ints(&[1, 2])).unwrap_err();
        assert_eq!(
            err.message(),
            "not all arguments converted during string formatting"
        );

        let err = percent_format("%d", &Value::str("a")).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }

    #[test]
    fn test_str_format_fields() {
        let args = vec![Value::str("a"), Value::Int(7)];
        let kwargs = vec![("who".to_string(), Value::str("me"))];
        assert_eq!(
            str_format("{} {} {who} {0!r} {{}}", &args, &kwargs).unwrap(),
            "a 7 me 'a' {}"
        );
    }

    #[test]
    fn test_oversized_width_is_rejected() {
        let err = percent_format("%99999999999d", &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), "ValueError");
        let err = percent_format("%.99999999999999999999999f", &Value::Float(1.0)).unwrap_err();
        assert_eq!(err.kind(), "ValueError");
        assert_eq!(percent_format("%5d", &Value::Int(42)).unwrap(), "   42");
    }

    #[test]
    fn test_str_format_specs() {
        let pi = vec![Value::Float(3.14159)];
        assert_eq!(str_format("{:.2f}", &pi, &[]).unwrap(), "3.14");
        assert_eq!(str_format("{:>6.1f}", &pi, &[]).unwrap(), "   3.1");
        assert_eq!(str_format("{:<4}|", &[Value::str("x")], &[]).unwrap(), "x   |");
        assert_eq!(str_format("{:03d}", &[Value::Int(7)], &[]).unwrap(), "007");
        assert_eq!(str_format("{:^5}", &[Value::str("a")], &[]).unwrap(), "  a  ");
        assert_eq!(str_format("{:.0%}", &[Value::Float(0.25)], &[]).unwrap(), "25%");
    }
}
