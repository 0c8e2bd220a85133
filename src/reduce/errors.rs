//! Reduction error types.
//!
//! All of these abort the affected reduction; the row source is still
//! released by the caller's scope.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("row is missing expected column `{column}` for alias `{alias}`")]
    MissingColumn { column: String, alias: String },
    #[error("row carries a child for alias `{alias}` but its parent alias is absent")]
    MissingParent { alias: String },
    #[error("cannot coerce value `{value}` in column `{column}` to {expected}")]
    Coercion {
        column: String,
        expected: String,
        value: String,
    },
    #[error("rows are not grouped by root identity (root {root_id} reappeared after its group closed); order by a root column")]
    UngroupedRows { root_id: String },
    #[error("failed to deserialise entity: {message}")]
    Deserialize { message: String },
    #[error("insert into `{table}` produced no generated id")]
    NoGeneratedId { table: String },
    #[error("record has no value for `{field}`, required to {operation} `{type_name}`")]
    MissingFieldValue {
        type_name: String,
        field: String,
        operation: &'static str,
    },
}
