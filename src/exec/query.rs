//! The query facade.
//!
//! A [`Query`] wraps an immutable [`QueryPlan`] with the mutable parts of a
//! query: where/order/group fragments, limits, named bindings, extra
//! projections. It stays mutable until a statement is built or executed.
//! One builder per thread; the underlying plan is shared and thread-safe.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::exec::RowSource;
use crate::model::ModelRegistry;
use crate::plan::{build_query_plan, QueryPlan};
use crate::reduce::{self, reduce_rows, streaming, MappingError};
use crate::sql::emitter::{self, QueryClauses};
use crate::sql::errors::SqlError;
use crate::sql::params;
use crate::sql::substitution::{referenced_aliases, AliasScope};
use crate::sql::{default_dialect, Dialect, SqlExpression, Statement};

#[derive(Debug, Clone)]
pub struct Query {
    plan: Arc<QueryPlan>,
    clauses: QueryClauses,
    named: HashMap<String, Value>,
    dialect: Option<Dialect>,
}

impl Query {
    /// Plan `root_type` and wrap the plan in a fresh query.
    pub fn build(registry: &ModelRegistry, root_type: &str) -> Result<Query, Error> {
        let plan = build_query_plan(registry, root_type)?;
        Ok(Query::from_plan(Arc::new(plan)))
    }

    /// Reuse a cached plan.
    pub fn from_plan(plan: Arc<QueryPlan>) -> Query {
        Query {
            plan,
            clauses: QueryClauses::default(),
            named: HashMap::new(),
            dialect: None,
        }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Override the dialect for this query; the process default applies
    /// otherwise.
    pub fn set_dialect(&mut self, dialect: Dialect) -> &mut Self {
        self.dialect = Some(dialect);
        self
    }

    fn effective_dialect(&self) -> Dialect {
        self.dialect.unwrap_or_else(default_dialect)
    }

    /// Add a where fragment; fragments are AND-joined. `{alias}` tokens
    /// resolve in the root scope, `?` markers bind `params` positionally and
    /// `:name` markers bind through [`Query::bind`].
    pub fn add_where(&mut self, fragment: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.clauses
            .wheres
            .push(SqlExpression::with_params(fragment.into(), params));
        self
    }

    pub fn add_order_by(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.clauses.order_by.push(SqlExpression::new(fragment.into()));
        self
    }

    pub fn add_order_by_desc(&mut self, fragment: impl Into<String>) -> &mut Self {
        let mut text = fragment.into();
        text.push_str(" DESC");
        self.clauses.order_by.push(SqlExpression::new(text));
        self
    }

    pub fn add_group_by(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.clauses.group_by.push(SqlExpression::new(fragment.into()));
        self
    }

    /// Project an extra fragment under `result_key`. Unmapped keys land in
    /// the owning alias's other-bag field, when the type declares one.
    pub fn add_field(&mut self, fragment: impl Into<String>, result_key: impl Into<String>) -> &mut Self {
        self.clauses
            .extra_fields
            .push((fragment.into(), result_key.into()));
        self
    }

    pub fn set_limit(&mut self, count: i64) -> &mut Self {
        self.clauses.limit = Some((0, count));
        self
    }

    pub fn set_limit_offset(&mut self, offset: i64, count: i64) -> &mut Self {
        self.clauses.limit = Some((offset, count));
        self
    }

    /// Bind a value for a `:name` marker.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.named.insert(name.into(), value);
        self
    }

    pub fn to_statement(&self) -> Result<Statement, Error> {
        let expression =
            emitter::select_expression(&self.plan, &self.clauses, self.effective_dialect())?;
        self.finish_statement(expression)
    }

    pub fn to_count_statement(&self) -> Result<Statement, Error> {
        let expression =
            emitter::count_expression(&self.plan, &self.clauses, self.effective_dialect())?;
        self.finish_statement(expression)
    }

    pub fn to_ids_statement(&self) -> Result<Statement, Error> {
        let expression =
            emitter::ids_expression(&self.plan, &self.clauses, self.effective_dialect())?;
        self.finish_statement(expression)
    }

    fn finish_statement(&self, expression: SqlExpression) -> Result<Statement, Error> {
        let expanded = params::expand_named(&expression, &self.named)?;
        Ok(Statement::new(expanded.sql, expanded.params))
    }

    /// Execute and reduce into root entities.
    pub fn execute<S: RowSource + ?Sized>(&self, source: &mut S) -> Result<Vec<Value>, Error> {
        let statement = self.to_statement()?;
        log::debug!("executing: {}", statement.sql.replace('\n', " "));
        let rows = source.query(&statement)?;
        Ok(reduce_rows(&self.plan, rows)?)
    }

    /// Execute and deserialise each root into `T`.
    pub fn fetch_as<T, S>(&self, source: &mut S) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
        S: RowSource + ?Sized,
    {
        self.execute(source)?
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    Error::from(MappingError::Deserialize {
                        message: e.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Count distinct roots under the current filters. Row multiplication
    /// through joins never inflates this.
    pub fn count<S: RowSource + ?Sized>(&self, source: &mut S) -> Result<u64, Error> {
        let statement = self.to_count_statement()?;
        let rows = source.query(&statement)?;
        let count = rows
            .first()
            .and_then(|row| reduce::lookup(row, "count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(count)
    }

    /// The distinct root ids matching the current filters, order and limit.
    pub fn list_ids<S: RowSource + ?Sized>(&self, source: &mut S) -> Result<Vec<Value>, Error> {
        let statement = self.to_ids_statement()?;
        let rows = source.query(&statement)?;
        let key = self
            .plan
            .root_id_keys()
            .first()
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| reduce::lookup(row, &key))
            .cloned()
            .collect())
    }

    /// Two-phase pagination: resolve the limited distinct id page first,
    /// then fetch the full graph for exactly those roots. Keeps to-many row
    /// multiplication from eating into the limit.
    pub fn execute_paged<S: RowSource + ?Sized>(&self, source: &mut S) -> Result<Vec<Value>, Error> {
        let ids = self.list_ids(source)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (_, id_column) = &self.plan.root_id_column;
        let markers = vec!["?"; ids.len()].join(", ");
        let mut page = self.clone();
        page.clauses.limit = None;
        page.clauses.wheres.push(SqlExpression::with_params(
            format!("{{{}}}.{} IN ({})", self.plan.root_alias, id_column, markers),
            ids.clone(),
        ));
        let mut entities = page.execute(source)?;

        // the page query has no limit and may return roots in join order;
        // put them back into id-page order
        let id_field = self
            .plan
            .root_id_keys()
            .first()
            .and_then(|k| k.rsplit('.').next().map(|s| s.to_string()))
            .unwrap_or_else(|| id_column.clone());
        let position: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();
        entities.sort_by_key(|e| {
            e.get(id_field.as_str())
                .and_then(|id| position.get(&id.to_string()))
                .copied()
                .unwrap_or(usize::MAX)
        });
        Ok(entities)
    }

    /// Stream roots to `consumer` as their row groups close. Requires the
    /// result to be ordered by root columns; ordering by a joined alias is
    /// rejected here, before anything executes. Without a caller order the
    /// query is implicitly ordered by the root id.
    pub fn stream<S, F>(&self, source: &mut S, consumer: F) -> Result<u64, Error>
    where
        S: RowSource + ?Sized,
        F: FnMut(Value) -> Result<(), Error>,
    {
        self.check_stream_order()?;
        let mut grouped = self.clone();
        if grouped.clauses.order_by.is_empty() {
            let (alias, column) = &self.plan.root_id_column;
            grouped
                .clauses
                .order_by
                .push(SqlExpression::new(format!("{{{}}}.{}", alias, column)));
        }
        let statement = grouped.to_statement()?;
        let rows = source.query_iter(&statement)?;
        streaming::stream_rows(&grouped.plan, rows.map(|r| r.map_err(Error::from)), consumer)
    }

    fn check_stream_order(&self) -> Result<(), Error> {
        let scope = AliasScope::root_scope(&self.plan.root_alias);
        for fragment in &self.clauses.order_by {
            for alias in referenced_aliases(&fragment.sql, &scope)? {
                if alias != self.plan.root_alias {
                    return Err(SqlError::OrderByJoinedAlias {
                        fragment: fragment.sql.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Fetch one entity by root id.
pub fn find_by_id<S: RowSource + ?Sized>(
    registry: &ModelRegistry,
    type_name: &str,
    id: Value,
    source: &mut S,
) -> Result<Option<Value>, Error> {
    let mut query = Query::build(registry, type_name)?;
    let (alias, column) = query.plan.root_id_column.clone();
    query.add_where(format!("{{{}}}.{} = ?", alias, column), vec![id]);
    let mut entities = query.execute(source)?;
    Ok(if entities.is_empty() {
        None
    } else {
        Some(entities.remove(0))
    })
}
