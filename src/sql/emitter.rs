//! Statement assembly.
//!
//! Renders a [`QueryPlan`] plus user clauses into a parameterised SELECT.
//! Three projections share the same FROM/JOIN/WHERE skeleton: the full
//! entity select, the `COUNT(DISTINCT root id)` select, and the distinct
//! id-list select used for two-phase pagination.

use std::collections::HashSet;

use crate::plan::{JoinCondition, JoinKind, ProjectionSource, QueryPlan};
use crate::sql::dialect::Dialect;
use crate::sql::errors::SqlError;
use crate::sql::expression::SqlExpression;
use crate::sql::substitution::{substitute_aliases, AliasScope};

/// User-supplied query clauses, all in the `{alias}` token language.
#[derive(Debug, Clone, Default)]
pub struct QueryClauses {
    pub wheres: Vec<SqlExpression>,
    pub group_by: Vec<SqlExpression>,
    pub order_by: Vec<SqlExpression>,
    /// `(offset, count)`
    pub limit: Option<(i64, i64)>,
    /// Extra projections: `(fragment, result key)`, root-scoped.
    pub extra_fields: Vec<(String, String)>,
}

/// The full entity select.
pub fn select_expression(
    plan: &QueryPlan,
    clauses: &QueryClauses,
    dialect: Dialect,
) -> Result<SqlExpression, SqlError> {
    let known = plan.alias_set();
    let mut projections = Vec::with_capacity(plan.projections.len() + clauses.extra_fields.len());
    for entry in &plan.projections {
        let rendered = match &entry.source {
            ProjectionSource::Column { alias, column } => format!(
                "{}.{}",
                dialect.quote_one(alias),
                dialect.quote_one(column)
            ),
            ProjectionSource::Expression { text, scope_alias } => {
                let scope = AliasScope {
                    owner: scope_alias,
                    root: &plan.root_alias,
                    link_table: None,
                };
                substitute_aliases(text, &scope, &known, dialect)?
            }
        };
        projections.push(format!(
            "{} AS {}",
            rendered,
            dialect.quote_one(&entry.result_key)
        ));
    }
    for (fragment, key) in &clauses.extra_fields {
        let scope = AliasScope::root_scope(&plan.root_alias);
        let rendered = substitute_aliases(fragment, &scope, &known, dialect)?;
        projections.push(format!("{} AS {}", rendered, dialect.quote_one(key)));
    }

    let mut out = SqlExpression::new(format!("SELECT {}", projections.join(", ")));
    append_from_and_joins(&mut out, plan, &known, dialect)?;
    append_where(&mut out, plan, clauses, &known, dialect)?;
    append_group_by(&mut out, plan, clauses, &known, dialect)?;
    append_order_by(&mut out, plan, clauses, &known, dialect)?;
    if let Some((offset, count)) = clauses.limit {
        out.sql.push('\n');
        out.sql.push_str(&dialect.limit_clause(offset, count));
    }
    Ok(out)
}

/// `SELECT COUNT(DISTINCT <root id>)` over the same joins and filters.
/// Row multiplication through to-many joins must never inflate the count.
pub fn count_expression(
    plan: &QueryPlan,
    clauses: &QueryClauses,
    dialect: Dialect,
) -> Result<SqlExpression, SqlError> {
    let known = plan.alias_set();
    let (alias, column) = &plan.root_id_column;
    let mut out = SqlExpression::new(format!(
        "SELECT COUNT(DISTINCT {}.{}) AS {}",
        dialect.quote_one(alias),
        dialect.quote_one(column),
        dialect.quote_one("count")
    ));
    append_from_and_joins(&mut out, plan, &known, dialect)?;
    append_where(&mut out, plan, clauses, &known, dialect)?;
    Ok(out)
}

/// `SELECT DISTINCT <root id>` with ordering and limit, for two-phase
/// pagination where the limit must count roots, not joined rows.
pub fn ids_expression(
    plan: &QueryPlan,
    clauses: &QueryClauses,
    dialect: Dialect,
) -> Result<SqlExpression, SqlError> {
    let known = plan.alias_set();
    let (alias, column) = &plan.root_id_column;
    let key = plan
        .root_id_keys()
        .first()
        .cloned()
        .unwrap_or_else(|| format!("{}.{}", alias, column));
    let mut out = SqlExpression::new(format!(
        "SELECT DISTINCT {}.{} AS {}",
        dialect.quote_one(alias),
        dialect.quote_one(column),
        dialect.quote_one(&key)
    ));
    append_from_and_joins(&mut out, plan, &known, dialect)?;
    append_where(&mut out, plan, clauses, &known, dialect)?;
    append_order_by(&mut out, plan, clauses, &known, dialect)?;
    if let Some((offset, count)) = clauses.limit {
        out.sql.push('\n');
        out.sql.push_str(&dialect.limit_clause(offset, count));
    }
    Ok(out)
}

fn append_from_and_joins(
    out: &mut SqlExpression,
    plan: &QueryPlan,
    known: &HashSet<String>,
    dialect: Dialect,
) -> Result<(), SqlError> {
    let table_parts = plan.root_table.parts();
    let quoted_table = dialect.quote_identifier(&table_parts);
    out.sql.push_str("\nFROM ");
    out.sql.push_str(&quoted_table);
    // the root alias equals the bare table name; an AS is only needed when
    // the table reference is schema-qualified
    if plan.root_table.schema.is_some() {
        out.sql.push_str(" AS ");
        out.sql.push_str(&dialect.quote_one(&plan.root_alias));
    }

    for join in &plan.joins {
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        let condition = match &join.condition {
            JoinCondition::Equi {
                left_alias,
                left_column,
                right_alias,
                right_column,
            } => format!(
                "{}.{} = {}.{}",
                dialect.quote_one(left_alias),
                dialect.quote_one(left_column),
                dialect.quote_one(right_alias),
                dialect.quote_one(right_column)
            ),
            JoinCondition::Fragment {
                text,
                scope_alias,
                link_table,
            } => {
                let scope = AliasScope {
                    owner: scope_alias,
                    root: &plan.root_alias,
                    link_table: link_table.as_deref(),
                };
                substitute_aliases(text, &scope, known, dialect)?
            }
        };
        out.sql.push_str(&format!(
            "\n{} {} AS {} ON {}",
            keyword,
            dialect.quote_identifier(&join.table.parts()),
            dialect.quote_one(&join.alias),
            condition
        ));
    }
    Ok(())
}

fn append_where(
    out: &mut SqlExpression,
    plan: &QueryPlan,
    clauses: &QueryClauses,
    known: &HashSet<String>,
    dialect: Dialect,
) -> Result<(), SqlError> {
    if clauses.wheres.is_empty() {
        return Ok(());
    }
    let scope = AliasScope::root_scope(&plan.root_alias);
    let mut rendered = Vec::with_capacity(clauses.wheres.len());
    for fragment in &clauses.wheres {
        let text = substitute_aliases(&fragment.sql, &scope, known, dialect)?;
        rendered.push(SqlExpression::with_params(text, fragment.params.clone()));
    }
    out.sql.push_str("\nWHERE ");
    let combined = if rendered.len() == 1 {
        rendered.into_iter().next().expect("non-empty")
    } else {
        let wrapped: Vec<SqlExpression> = rendered
            .into_iter()
            .map(|f| SqlExpression::with_params(format!("({})", f.sql), f.params))
            .collect();
        SqlExpression::join(&wrapped, " AND ")
    };
    out.append("", &combined);
    Ok(())
}

fn append_group_by(
    out: &mut SqlExpression,
    plan: &QueryPlan,
    clauses: &QueryClauses,
    known: &HashSet<String>,
    dialect: Dialect,
) -> Result<(), SqlError> {
    let mut terms: Vec<String> = plan
        .group_by
        .iter()
        .map(|(alias, column)| {
            format!("{}.{}", dialect.quote_one(alias), dialect.quote_one(column))
        })
        .collect();
    let scope = AliasScope::root_scope(&plan.root_alias);
    for fragment in &clauses.group_by {
        terms.push(substitute_aliases(&fragment.sql, &scope, known, dialect)?);
    }
    if terms.is_empty() {
        return Ok(());
    }
    out.sql.push_str("\nGROUP BY ");
    out.sql.push_str(&terms.join(", "));
    Ok(())
}

fn append_order_by(
    out: &mut SqlExpression,
    plan: &QueryPlan,
    clauses: &QueryClauses,
    known: &HashSet<String>,
    dialect: Dialect,
) -> Result<(), SqlError> {
    if clauses.order_by.is_empty() {
        return Ok(());
    }
    let scope = AliasScope::root_scope(&plan.root_alias);
    let mut terms = Vec::with_capacity(clauses.order_by.len());
    for fragment in &clauses.order_by {
        let text = substitute_aliases(&fragment.sql, &scope, known, dialect)?;
        terms.push(SqlExpression::with_params(text, fragment.params.clone()));
    }
    out.sql.push_str("\nORDER BY ");
    let combined = SqlExpression::join(&terms, ", ");
    out.append("", &combined);
    Ok(())
}
