//! Parameter marker scanning.
//!
//! Walks statement text recognising `?` and `:name` markers outside
//! single-quoted string literals and comments. Inside a literal the markers
//! are inert; an unterminated literal is a fatal parse error, since silently
//! mis-scanning would corrupt parameter alignment.

use serde_json::Value;
use std::collections::HashMap;

use crate::sql::errors::SqlError;
use crate::sql::expression::SqlExpression;

/// One recognised parameter marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    Positional,
    Named(String),
}

/// Scan `sql` for parameter markers, honouring string literals, `--` line
/// comments and `/* */` block comments. A doubled quote inside a literal
/// escapes the quote.
pub fn scan_markers(sql: &str) -> Result<Vec<Marker>, SqlError> {
    let mut markers = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' => {
                // consume the literal
                i += 1;
                loop {
                    if i >= chars.len() {
                        return Err(SqlError::UnterminatedLiteral {
                            fragment: sql.to_string(),
                        });
                    }
                    if chars[i] == '\'' {
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            i += 2; // escaped quote
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            '-' if i + 1 < chars.len() && chars[i + 1] == '-' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 1; // lands on '/', advanced past below
            }
            '?' => markers.push(Marker::Positional),
            ':' => {
                let mut name = String::new();
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    name.push(chars[j]);
                    j += 1;
                }
                if !name.is_empty() {
                    markers.push(Marker::Named(name));
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(markers)
}

/// Count positional markers only.
pub fn count_positional(sql: &str) -> Result<usize, SqlError> {
    Ok(scan_markers(sql)?
        .iter()
        .filter(|m| matches!(m, Marker::Positional))
        .count())
}

/// Expand `:name` markers into positional `?` markers, merging the named
/// values into the expression's parameter list at the right places. The
/// wire format is positional-only.
pub fn expand_named(
    expression: &SqlExpression,
    named: &HashMap<String, Value>,
) -> Result<SqlExpression, SqlError> {
    let markers = scan_markers(&expression.sql)?;
    if markers.iter().all(|m| matches!(m, Marker::Positional)) {
        let expected = markers.len();
        if expected != expression.params.len() {
            return Err(SqlError::ParameterCount {
                expected,
                supplied: expression.params.len(),
            });
        }
        return Ok(expression.clone());
    }

    let expected_positional = markers
        .iter()
        .filter(|m| matches!(m, Marker::Positional))
        .count();
    let mut out_sql = String::with_capacity(expression.sql.len());
    let mut out_params = Vec::new();
    let mut positional = expression.params.iter();
    let chars: Vec<char> = expression.sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' => {
                // literals were validated by scan_markers; copy verbatim
                out_sql.push('\'');
                i += 1;
                while i < chars.len() {
                    out_sql.push(chars[i]);
                    if chars[i] == '\'' {
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            out_sql.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            '-' if i + 1 < chars.len() && chars[i + 1] == '-' => {
                while i < chars.len() && chars[i] != '\n' {
                    out_sql.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                out_sql.push(chars[i]);
                out_sql.push(chars[i + 1]);
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    out_sql.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() {
                    out_sql.push(chars[i]);
                }
            }
            '?' => {
                out_sql.push('?');
                let value = positional.next().ok_or(SqlError::ParameterCount {
                    expected: expected_positional,
                    supplied: expression.params.len(),
                })?;
                out_params.push(value.clone());
            }
            ':' => {
                let mut name = String::new();
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    name.push(chars[j]);
                    j += 1;
                }
                if name.is_empty() {
                    out_sql.push(':');
                } else {
                    let value = named.get(&name).ok_or_else(|| SqlError::UnboundParameter {
                        name: name.clone(),
                    })?;
                    out_sql.push('?');
                    out_params.push(value.clone());
                    i = j;
                    continue;
                }
            }
            c => out_sql.push(c),
        }
        i += 1;
    }

    if positional.next().is_some() {
        return Err(SqlError::ParameterCount {
            expected: expected_positional,
            supplied: expression.params.len(),
        });
    }
    Ok(SqlExpression::with_params(out_sql, out_params))
}
