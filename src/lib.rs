//! rowgraph - a model-driven query compiler and result-set reducer
//!
//! This crate turns a declarative model of record types into:
//! - a single SQL `SELECT` whose projection, joins and aliases are fully
//!   determined by the model,
//! - a deterministic reducer that folds the query's flat rows back into an
//!   object graph shaped like the model,
//! - `CREATE TABLE` / `ALTER TABLE` DDL derived from the same model.
//!
//! ```no_run
//! use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
//! use rowgraph::exec::Query;
//!
//! # fn main() -> Result<(), rowgraph::Error> {
//! let mut registry = ModelRegistry::new();
//! registry.register(
//!     RecordType::build("User")
//!         .table("user")
//!         .id("id", ColumnType::Long)
//!         .scalar("name", ColumnType::VarChar(100))
//!         .finish(),
//! )?;
//!
//! let mut query = Query::build(&registry, "User")?;
//! query.add_where("{user}.name LIKE ?", vec![serde_json::json!("a%")]);
//! let statement = query.to_statement()?;
//! # let _ = statement;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod exec;
pub mod model;
pub mod plan;
pub mod reduce;
pub mod schema;
pub mod sql;

pub use error::Error;
pub use exec::{run_in_transaction, ExecResult, Mutator, Query, RowSource, TransportError};
pub use model::{ColumnType, ModelRegistry, RecordType};
pub use plan::{build_query_plan, QueryPlan};
pub use reduce::{reduce_rows, Row};
pub use sql::{default_dialect, set_default_dialect, Dialect, SqlExpression, Statement};
