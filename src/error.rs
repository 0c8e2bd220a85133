//! Crate-level error funnel.

use thiserror::Error;

use crate::exec::mutator::StaleRecordError;
use crate::exec::TransportError;
use crate::model::ModelError;
use crate::reduce::MappingError;
use crate::sql::{DialectError, SqlError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error(transparent)]
    Stale(#[from] StaleRecordError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
