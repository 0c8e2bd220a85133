//! The parameter-carrying SQL fragment.
//!
//! A fragment is always a pair of SQL text and the parameter values bound to
//! its `?` markers, accumulated side by side so that concatenation can never
//! reorder text against values. User values are never interpolated into the
//! text.

use serde_json::Value;
use std::fmt;

/// SQL text plus positional parameters, in marker order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlExpression {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlExpression {
    pub fn new(sql: impl Into<String>) -> Self {
        SqlExpression {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        SqlExpression {
            sql: sql.into(),
            params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Append another fragment, gluing with `separator`, keeping parameter
    /// order aligned with the concatenated text.
    pub fn append(&mut self, separator: &str, other: &SqlExpression) {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql.push_str(separator);
        }
        self.sql.push_str(&other.sql);
        self.params.extend(other.params.iter().cloned());
    }

    /// Join fragments with `separator`; an empty list yields an empty
    /// expression.
    pub fn join(fragments: &[SqlExpression], separator: &str) -> SqlExpression {
        let mut out = SqlExpression::default();
        for fragment in fragments {
            out.append(separator, fragment);
        }
        out
    }
}

impl From<&str> for SqlExpression {
    fn from(sql: &str) -> Self {
        SqlExpression::new(sql)
    }
}

/// An executable statement: final SQL text and positional parameters. Only
/// `?` markers remain at this point; named parameters have been expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Statement {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.sql, self.params)
    }
}
