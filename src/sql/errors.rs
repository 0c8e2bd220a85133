//! Statement-build error types.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SqlError {
    #[error("unterminated string literal in SQL fragment: `{fragment}`")]
    UnterminatedLiteral { fragment: String },
    #[error("unterminated alias reference in SQL fragment: `{fragment}`")]
    UnterminatedAliasReference { fragment: String },
    #[error("unknown alias `{alias}` referenced from `{fragment}`")]
    UnknownAlias { alias: String, fragment: String },
    #[error("no value bound for named parameter `:{name}`")]
    UnboundParameter { name: String },
    #[error("fragment has {expected} parameter markers but {supplied} values were supplied")]
    ParameterCount { expected: usize, supplied: usize },
    #[error("`{{linktable}}` used outside a link-table scope in `{fragment}`")]
    NoLinkTableScope { fragment: String },
    #[error("ordering by a joined alias breaks root-grouping; order by a root column (offending fragment: `{fragment}`)")]
    OrderByJoinedAlias { fragment: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DialectError {
    #[error("dialect {dialect} cannot express column type {column_type}")]
    UnsupportedType {
        dialect: &'static str,
        column_type: String,
    },
}
