//! Execution boundary.
//!
//! The core never talks to a database directly: it hands [`Statement`]s to a
//! caller-supplied [`RowSource`] and gets rows or affected-row counts back.
//! Connections stay opaque. Transport failures surface verbatim as
//! [`TransportError`] and are never rewrapped by the core.

use serde_json::Value;
use thiserror::Error;

pub mod mutator;
pub mod query;

pub use mutator::{Mutator, StaleRecordError};
pub use query::Query;

use crate::error::Error;
use crate::reduce::Row;
use crate::sql::Statement;

/// An error surfaced from the row source, passed through untouched.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct TransportError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError(message.into().into())
    }
}

/// Result of a write statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub affected_rows: u64,
    /// Database-generated ids, in insertion order.
    pub generated_ids: Vec<Value>,
}

/// The row-source capability the core requires: execute parameterised
/// statements, return rows shaped `"alias.field" -> cell`, and scope
/// transactions. Cancellation and timeouts belong to the implementation.
pub trait RowSource {
    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransportError>;
    fn execute(&mut self, statement: &Statement) -> Result<ExecResult, TransportError>;
    fn begin(&mut self) -> Result<(), TransportError>;
    fn commit(&mut self) -> Result<(), TransportError>;
    fn rollback(&mut self) -> Result<(), TransportError>;

    /// Row-at-a-time variant for streaming reductions. The default fetches
    /// eagerly; sources that can cursor should override it.
    fn query_iter<'s>(
        &'s mut self,
        statement: &Statement,
    ) -> Result<Box<dyn Iterator<Item = Result<Row, TransportError>> + 's>, TransportError> {
        let rows = self.query(statement)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

/// Scoped transaction: begin, run `body`, commit on success. Any error rolls
/// back first and then propagates unchanged; a rollback failure is logged
/// and swallowed so the original error wins.
pub fn run_in_transaction<S, T, F>(source: &mut S, body: F) -> Result<T, Error>
where
    S: RowSource + ?Sized,
    F: FnOnce(&mut S) -> Result<T, Error>,
{
    source.begin().map_err(Error::from)?;
    match body(source) {
        Ok(value) => {
            source.commit().map_err(Error::from)?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = source.rollback() {
                log::warn!("rollback failed after error: {}", rollback_error);
            }
            Err(error)
        }
    }
}
