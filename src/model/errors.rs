//! Model error types
//!
//! Structural problems with user-declared record types. All of these are
//! fatal at registration or plan time; no SQL is ever built from a broken
//! model.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("no record type registered under `{type_name}`")]
    UnknownType { type_name: String },
    #[error("record type `{type_name}` is already registered")]
    DuplicateType { type_name: String },
    #[error("record type `{type_name}` declares field `{field}` more than once")]
    DuplicateField { type_name: String, field: String },
    #[error("record type `{type_name}` has no table; neither it nor any superclass declares one")]
    MissingTable { type_name: String },
    #[error("entity type `{type_name}` declares {count} id fields; exactly one is required")]
    IdCount { type_name: String, count: usize },
    #[error("cycle in the type graph: {path}")]
    Cycle { path: String },
    #[error("field `{type_name}.{field}` references unknown type `{target}`")]
    UnknownTarget {
        type_name: String,
        field: String,
        target: String,
    },
    #[error("embedded type `{target}` of `{type_name}.{field}` must not map to a table")]
    EmbeddedEntity {
        type_name: String,
        field: String,
        target: String,
    },
    #[error("embedded type `{target}` may only contain scalar and embedded fields (offending field: `{field}`)")]
    EmbeddedRelation { target: String, field: String },
    #[error("link field `{type_name}.{field}` must either reference a record type or carry a fetch column with a value type")]
    LinkShape { type_name: String, field: String },
    #[error("subclass branch `{branch}` of `{type_name}` has no table and `{type_name}` declares no discriminator column")]
    BranchWithoutTable { type_name: String, branch: String },
    #[error("subclass branch `{branch}` of `{type_name}` shares the parent table but declares no discriminator value")]
    BranchWithoutDiscriminator { type_name: String, branch: String },
    #[error("alias `{alias}` is allocated twice; rename the field or table that collides")]
    AliasCollision { alias: String },
    #[error("record type `{type_name}` declares more than one other-bag field")]
    MultipleOtherBags { type_name: String },
    #[error("upsert requires a single-table type; `{type_name}` spans {count} tables")]
    UpsertChain { type_name: String, count: usize },
    #[error("version field `{field}` of `{type_name}` is not a declared scalar field")]
    VersionField { type_name: String, field: String },
    #[error("foreign key dependency cycle between tables: {path}")]
    FkCycle { path: String },
    #[error("invalid model configuration: {message}")]
    InvalidConfig { message: String },
}
