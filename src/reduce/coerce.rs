//! Cell value coercion.
//!
//! Raw driver cells arrive as JSON values; the mappers bring them to the
//! shape the field's column type promises. Coercions are deliberately
//! narrow: a value that does not fit is a mapping error naming the column,
//! never a silent null.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};

use crate::model::ColumnType;
use crate::reduce::errors::MappingError;

/// Coerce `value` to `target`. `column` is only used for error reporting.
pub fn coerce(value: &Value, target: &ColumnType, column: &str) -> Result<Value, MappingError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let fail = || MappingError::Coercion {
        column: column.to_string(),
        expected: format!("{:?}", target),
        value: value.to_string(),
    };
    match target {
        ColumnType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(json!(false)),
                Some(1) => Ok(json!(true)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        },
        ColumnType::SmallInt | ColumnType::Int | ColumnType::Long => match value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Ok(value.clone())
                } else {
                    // decimal-typed drivers hand back floats; integral
                    // targets accept them only when nothing is lost
                    let f = n.as_f64().ok_or_else(fail)?;
                    if f.fract() == 0.0 && f.abs() < 9.0e18 {
                        Ok(json!(f as i64))
                    } else {
                        Err(fail())
                    }
                }
            }
            _ => Err(fail()),
        },
        ColumnType::Float | ColumnType::Double => match value {
            Value::Number(n) => Ok(json!(n.as_f64().ok_or_else(fail)?)),
            _ => Err(fail()),
        },
        ColumnType::Decimal { .. } => match value {
            // decimals travel as numbers or exact strings, both kept as-is
            Value::Number(_) | Value::String(_) => Ok(value.clone()),
            _ => Err(fail()),
        },
        ColumnType::VarChar(_) | ColumnType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(json!(n.to_string())),
            _ => Err(fail()),
        },
        ColumnType::Bytes => match value {
            // base64 text or a byte array, passed through untouched
            Value::String(_) | Value::Array(_) => Ok(value.clone()),
            _ => Err(fail()),
        },
        ColumnType::Date => match value {
            Value::String(s) => {
                let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| fail())?;
                Ok(json!(d.format("%Y-%m-%d").to_string()))
            }
            _ => Err(fail()),
        },
        ColumnType::Time => match value {
            Value::String(s) => {
                let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                    .map_err(|_| fail())?;
                Ok(json!(t.format("%H:%M:%S").to_string()))
            }
            _ => Err(fail()),
        },
        ColumnType::Timestamp => match value {
            Value::String(s) => {
                let parsed = parse_timestamp(s).ok_or_else(fail)?;
                Ok(json!(parsed.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            }
            // epoch milliseconds pass through for drivers that use them
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            _ => Err(fail()),
        },
        ColumnType::Enum { variants, .. } => match value {
            Value::String(s) => {
                if variants.iter().any(|v| v == s) {
                    Ok(value.clone())
                } else if let Some(v) = variants.iter().find(|v| v.eq_ignore_ascii_case(s)) {
                    Ok(json!(v))
                } else {
                    Err(fail())
                }
            }
            _ => Err(fail()),
        },
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(s).map(|dt| dt.naive_utc())
        })
        .ok()
}
