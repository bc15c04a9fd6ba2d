//! Conversion of raw submitted values to their declared types.

use serde_json::{Number, Value};

use crate::error::{CoercionError, ParseError};

use super::types::{FieldRule, Record};
use super::validators::{EMAIL_TYPE, truthy, value_text};

/// Coerce every typed field of `record` according to `rules`.
///
/// A field is converted when its rule declares a `type` and the value is
/// truthy or the field is `required`. Any failure aborts the whole parse.
pub fn coerce_record(record: &Record, rules: &[FieldRule]) -> Result<Record, ParseError> {
    let mut parsed = record.clone();

    for rule in rules {
        let Some(type_name) = rule.declared_type() else {
            continue;
        };

        let current = parsed.get(&rule.field);
        let present = current.is_some_and(truthy);
        if !present && !rule.is_required() {
            continue;
        }

        let raw = current.cloned().unwrap_or_else(|| Value::String(String::new()));
        let value = coerce_value(raw, type_name).map_err(|source| ParseError::Field {
            field: rule.field.clone(),
            source,
        })?;
        parsed.insert(rule.field.clone(), value);
    }

    Ok(parsed)
}

/// Convert one value to the named type.
pub fn coerce_value(raw: Value, type_name: &str) -> Result<Value, CoercionError> {
    match type_name {
        "dict" => to_dict(raw),
        "list" => to_list(raw),
        "bool" => to_bool(raw),
        "str" | EMAIL_TYPE => Ok(Value::String(value_text(&raw).into_owned())),
        "int" => to_int(raw),
        "float" => to_float(raw),
        other => Err(CoercionError::UnknownType(other.to_string())),
    }
}

fn unsupported(type_name: &str, raw: &Value) -> CoercionError {
    CoercionError::Unsupported {
        type_name: type_name.to_string(),
        value: raw.to_string(),
    }
}

fn to_dict(raw: Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Object(_) => Ok(raw),
        Value::String(s) => match serde_json::from_str::<Value>(&s)? {
            parsed @ Value::Object(_) => Ok(parsed),
            _ => Err(unsupported("dict", &Value::String(s))),
        },
        other => Err(unsupported("dict", &other)),
    }
}

fn to_list(raw: Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Array(_) => Ok(raw),
        Value::String(s) => Ok(Value::Array(
            s.split(',').map(|item| Value::String(item.to_string())).collect(),
        )),
        other => Err(unsupported("list", &other)),
    }
}

fn to_bool(raw: Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Bool(_) => Ok(raw),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        Value::String(s) => Err(CoercionError::Bool(s)),
        other => Err(CoercionError::Bool(other.to_string())),
    }
}

fn to_int(raw: Value) -> Result<Value, CoercionError> {
    match &raw {
        Value::String(s) => Ok(Value::from(s.trim().parse::<i64>()?)),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n.clone())),
        Value::Number(n) => match n.as_f64() {
            // Truncation toward zero, matching integer conversion of floats.
            Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => {
                Ok(Value::from(f.trunc() as i64))
            }
            _ => Err(unsupported("int", &raw)),
        },
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        _ => Err(unsupported("int", &raw)),
    }
}

fn to_float(raw: Value) -> Result<Value, CoercionError> {
    let f = match &raw {
        Value::String(s) => s.trim().parse::<f64>()?,
        Value::Number(n) => n.as_f64().ok_or_else(|| unsupported("float", &raw))?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return Err(unsupported("float", &raw)),
    };
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| unsupported("float", &raw))
}
