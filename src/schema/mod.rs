//! Schema emission.
//!
//! Derives `CREATE TABLE` DDL from the model, in foreign-key dependency
//! order, and diffs the model against an introspected schema shape to emit
//! additive `ALTER TABLE` migrations. Destructive changes are never
//! produced.

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::model::analyzer;
use crate::model::{ColumnType, FieldDef, FieldKind, ModelError, ModelRegistry};
use crate::sql::Dialect;

#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    unique: bool,
    auto_id: bool,
    primary_key: bool,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    column: String,
    references_table: String,
    references_column: String,
}

#[derive(Debug, Clone)]
struct TableDef {
    name: String,
    qualified: Vec<String>,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    fn add_column(&mut self, column: ColumnDef) {
        if self.columns.iter().all(|c| c.name != column.name) {
            self.columns.push(column);
        }
    }
}

/// One introspected column, as the caller read it from the database's
/// metadata. Only name and type participate in the diff.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectedColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Emit `CREATE TABLE` statements for every table reachable from `roots`,
/// in topological order of foreign-key dependencies.
pub fn create_statements(
    registry: &ModelRegistry,
    roots: &[&str],
    dialect: Dialect,
) -> Result<Vec<String>, Error> {
    let tables = collect_tables(registry, roots)?;
    let ordered = topological_order(&tables)?;
    let mut out = Vec::with_capacity(ordered.len());
    for index in ordered {
        out.push(render_create(&tables[index], dialect)?);
    }
    Ok(out)
}

/// Diff the model against an introspected `{table -> columns}` shape and
/// emit `CREATE TABLE` for missing tables, `ADD COLUMN` for missing columns
/// and a type-widening `MODIFY` where the model's type strictly widens the
/// database's. Narrowings and drops are excluded by design.
pub fn migration_statements(
    registry: &ModelRegistry,
    roots: &[&str],
    current: &HashMap<String, Vec<IntrospectedColumn>>,
    dialect: Dialect,
) -> Result<Vec<String>, Error> {
    let tables = collect_tables(registry, roots)?;
    let ordered = topological_order(&tables)?;
    let mut out = Vec::new();
    for index in ordered {
        let table = &tables[index];
        let existing = current
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&table.name))
            .map(|(_, columns)| columns);
        match existing {
            None => out.push(render_create(table, dialect)?),
            Some(columns) => {
                for desired in &table.columns {
                    let found = columns
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(&desired.name));
                    match found {
                        None => out.push(format!(
                            "ALTER TABLE {} ADD COLUMN {}",
                            dialect.quote_identifier(&to_parts(&table.qualified)),
                            render_column(desired, dialect)?
                        )),
                        Some(introspected)
                            if desired.column_type.widens(&introspected.column_type) =>
                        {
                            out.push(render_modify(table, desired, dialect)?)
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

fn to_parts(qualified: &[String]) -> Vec<&str> {
    qualified.iter().map(|s| s.as_str()).collect()
}

/// Walk every entity reachable from `roots` (relations, link tables,
/// subclass branches, inherited tables) and build the table definitions.
fn collect_tables(
    registry: &ModelRegistry,
    roots: &[&str],
) -> Result<Vec<TableDef>, Error> {
    let mut collector = Collector {
        registry,
        tables: Vec::new(),
        index: HashMap::new(),
        visited: HashSet::new(),
    };
    for root in roots {
        collector.collect_entity(root)?;
    }
    Ok(collector.tables)
}

struct Collector<'r> {
    registry: &'r ModelRegistry,
    tables: Vec<TableDef>,
    index: HashMap<String, usize>,
    visited: HashSet<String>,
}

impl<'r> Collector<'r> {
    fn table_mut(&mut self, qualified: Vec<String>) -> &mut TableDef {
        let name = qualified.last().expect("qualified name non-empty").clone();
        let key = qualified.join(".");
        if let Some(&i) = self.index.get(&key) {
            return &mut self.tables[i];
        }
        self.index.insert(key, self.tables.len());
        self.tables.push(TableDef {
            name,
            qualified,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        });
        self.tables.last_mut().expect("just pushed")
    }

    fn collect_entity(&mut self, type_name: &str) -> Result<(), Error> {
        if !self.visited.insert(type_name.to_string()) {
            return Ok(());
        }
        let chain = analyzer::table_chain(self.registry, type_name)?;
        let id = analyzer::id_field(self.registry, type_name)?;
        let id_column = id.column_name().unwrap_or_else(|| id.name.clone());
        let id_type = scalar_type(&id).unwrap_or(ColumnType::Long);

        let mut previous_table: Option<Vec<String>> = None;
        for (chain_index, mapping) in chain.iter().enumerate() {
            let qualified: Vec<String> = mapping
                .table
                .parts()
                .iter()
                .map(|s| s.to_string())
                .collect();
            {
                let table = self.table_mut(qualified.clone());
                table.add_column(ColumnDef {
                    name: id_column.clone(),
                    column_type: id_type.clone(),
                    nullable: false,
                    unique: false,
                    // only the topmost table generates; chained tables echo
                    auto_id: chain_index == 0 && id_type.is_integral(),
                    primary_key: true,
                });
                if table.primary_key.is_empty() {
                    table.primary_key.push(id_column.clone());
                }
                if let Some(parent) = previous_table {
                    table.foreign_keys.push(ForeignKey {
                        column: id_column.clone(),
                        references_table: parent.join("."),
                        references_column: id_column.clone(),
                    });
                }
            }
            self.collect_fields(&mapping.own_fields, &qualified, type_name)?;
            previous_table = Some(qualified);
        }

        // subclass branch tables hang off the concrete table
        let record = self.registry.get(type_name)?.clone();
        for branch in analyzer::branches(self.registry, &record)? {
            if branch.table.is_some() {
                self.collect_entity(&branch.type_name)?;
            } else {
                // single-table branches add their columns to the parent's
                // concrete table
                let concrete: Vec<String> = chain
                    .last()
                    .expect("chain non-empty")
                    .table
                    .parts()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                self.collect_fields(&branch.own_fields, &concrete, &branch.type_name)?;
            }
        }
        Ok(())
    }

    fn collect_fields(
        &mut self,
        fields: &[FieldDef],
        qualified: &[String],
        owner_type: &str,
    ) -> Result<(), Error> {
        for field in fields {
            match &field.kind {
                FieldKind::Scalar(column_type) => {
                    if field.is_id {
                        continue; // already handled with the chain
                    }
                    // a lob marker promotes bounded text to the dialect's
                    // large-object type
                    let column_type = if field.lob {
                        match column_type {
                            ColumnType::VarChar(_) | ColumnType::Text => ColumnType::Text,
                            other => other.clone(),
                        }
                    } else {
                        column_type.clone()
                    };
                    let table = self.table_mut(qualified.to_vec());
                    table.add_column(ColumnDef {
                        name: field.column_name().expect("scalar fields map a column"),
                        column_type,
                        nullable: field.nullable,
                        unique: field.unique,
                        auto_id: false,
                        primary_key: false,
                    });
                }
                FieldKind::Embedded { target, prefix } => {
                    self.collect_embedded(target, prefix, qualified)?;
                }
                FieldKind::ToOne { target, .. } => {
                    let target_id = analyzer::id_field(self.registry, target)?;
                    let target_type = scalar_type(&target_id).unwrap_or(ColumnType::Long);
                    let target_chain = analyzer::table_chain(self.registry, target)?;
                    let target_table = target_chain.last().expect("chain non-empty");
                    let column = field.column_name().expect("to-one fields map a column");
                    {
                        let table = self.table_mut(qualified.to_vec());
                        table.add_column(ColumnDef {
                            name: column.clone(),
                            column_type: target_type,
                            nullable: field.nullable,
                            unique: field.unique,
                            auto_id: false,
                            primary_key: false,
                        });
                        table.foreign_keys.push(ForeignKey {
                            column,
                            references_table: target_table.table.parts().join("."),
                            references_column: target_id
                                .column_name()
                                .unwrap_or_else(|| target_id.name.clone()),
                        });
                    }
                    self.collect_entity(target)?;
                }
                FieldKind::ToMany {
                    target,
                    inverse_key,
                    ..
                } => {
                    self.collect_entity(target)?;
                    // the inverse key lives on the child's concrete table;
                    // ensure it exists and references back
                    let owner_chain = analyzer::table_chain(self.registry, owner_type)?;
                    let owner_table = owner_chain.last().expect("chain non-empty");
                    let owner_id = analyzer::id_field(self.registry, owner_type)?;
                    let owner_id_type = scalar_type(&owner_id).unwrap_or(ColumnType::Long);
                    let child_chain = analyzer::table_chain(self.registry, target)?;
                    let child_table: Vec<String> = child_chain
                        .last()
                        .expect("chain non-empty")
                        .table
                        .parts()
                        .iter()
                        .map(|s| s.to_string())
                        .collect();
                    let column = inverse_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", owner_table.table.name));
                    let table = self.table_mut(child_table);
                    table.add_column(ColumnDef {
                        name: column.clone(),
                        column_type: owner_id_type,
                        nullable: true,
                        unique: false,
                        auto_id: false,
                        primary_key: false,
                    });
                    if table.foreign_keys.iter().all(|fk| fk.column != column) {
                        table.foreign_keys.push(ForeignKey {
                            column,
                            references_table: owner_table.table.parts().join("."),
                            references_column: owner_id
                                .column_name()
                                .unwrap_or_else(|| owner_id.name.clone()),
                        });
                    }
                }
                FieldKind::LinkMany {
                    target,
                    link_table,
                    left_column,
                    right_column,
                    fetch_column,
                    value_type,
                    ..
                } => {
                    let owner_chain = analyzer::table_chain(self.registry, owner_type)?;
                    let owner_table = owner_chain.last().expect("chain non-empty");
                    let owner_id = analyzer::id_field(self.registry, owner_type)?;
                    let owner_id_type = scalar_type(&owner_id).unwrap_or(ColumnType::Long);
                    let left = left_column
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", owner_table.table.name));

                    let mut primary_key = vec![left.clone()];
                    let mut columns = vec![ColumnDef {
                        name: left.clone(),
                        column_type: owner_id_type,
                        nullable: false,
                        unique: false,
                        auto_id: false,
                        primary_key: false,
                    }];
                    let mut foreign_keys = vec![ForeignKey {
                        column: left,
                        references_table: owner_table.table.parts().join("."),
                        references_column: owner_id
                            .column_name()
                            .unwrap_or_else(|| owner_id.name.clone()),
                    }];

                    if let (Some(fetch), Some(value_type)) = (fetch_column, value_type) {
                        columns.push(ColumnDef {
                            name: fetch.clone(),
                            column_type: value_type.clone(),
                            nullable: false,
                            unique: false,
                            auto_id: false,
                            primary_key: false,
                        });
                        primary_key.push(fetch.clone());
                    } else if let Some(target) = target {
                        let target_chain = analyzer::table_chain(self.registry, target)?;
                        let target_table = target_chain.last().expect("chain non-empty");
                        let target_id = analyzer::id_field(self.registry, target)?;
                        let right = right_column
                            .clone()
                            .unwrap_or_else(|| format!("{}_id", target_table.table.name));
                        columns.push(ColumnDef {
                            name: right.clone(),
                            column_type: scalar_type(&target_id).unwrap_or(ColumnType::Long),
                            nullable: false,
                            unique: false,
                            auto_id: false,
                            primary_key: false,
                        });
                        primary_key.push(right.clone());
                        foreign_keys.push(ForeignKey {
                            column: right,
                            references_table: target_table.table.parts().join("."),
                            references_column: target_id
                                .column_name()
                                .unwrap_or_else(|| target_id.name.clone()),
                        });
                        self.collect_entity(target)?;
                    }

                    let table = self.table_mut(vec![link_table.clone()]);
                    for column in columns {
                        table.add_column(column);
                    }
                    if table.primary_key.is_empty() {
                        table.primary_key = primary_key;
                    }
                    for fk in foreign_keys {
                        if table.foreign_keys.iter().all(|f| f.column != fk.column) {
                            table.foreign_keys.push(fk);
                        }
                    }
                }
                FieldKind::Computed(_) | FieldKind::OtherBag => {}
            }
        }
        Ok(())
    }

    fn collect_embedded(
        &mut self,
        target: &str,
        prefix: &str,
        qualified: &[String],
    ) -> Result<(), Error> {
        let record = self.registry.get(target)?.clone();
        for field in &record.fields {
            match &field.kind {
                FieldKind::Scalar(column_type) => {
                    let column = field.column_name().expect("scalar fields map a column");
                    let table = self.table_mut(qualified.to_vec());
                    table.add_column(ColumnDef {
                        name: format!("{}{}", prefix, column),
                        column_type: column_type.clone(),
                        nullable: field.nullable,
                        unique: false,
                        auto_id: false,
                        primary_key: false,
                    });
                }
                FieldKind::Embedded {
                    target: inner,
                    prefix: inner_prefix,
                } => {
                    let composed = format!("{}{}", prefix, inner_prefix);
                    self.collect_embedded(inner, &composed, qualified)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn scalar_type(field: &FieldDef) -> Option<ColumnType> {
    match &field.kind {
        FieldKind::Scalar(t) => Some(t.clone()),
        _ => None,
    }
}

/// Kahn's algorithm over foreign-key edges; ties resolve in collection
/// order so the output is deterministic.
fn topological_order(tables: &[TableDef]) -> Result<Vec<usize>, ModelError> {
    let name_to_index: HashMap<String, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.qualified.join("."), i))
        .collect();
    let mut remaining: Vec<usize> = (0..tables.len()).collect();
    let mut emitted: HashSet<usize> = HashSet::new();
    let mut out = Vec::with_capacity(tables.len());
    while !remaining.is_empty() {
        let before = out.len();
        remaining.retain(|&i| {
            let ready = tables[i].foreign_keys.iter().all(|fk| {
                match name_to_index.get(&fk.references_table) {
                    // self-references and tables outside the set don't gate
                    Some(&r) => r == i || emitted.contains(&r),
                    None => true,
                }
            });
            if ready {
                emitted.insert(i);
                out.push(i);
                false
            } else {
                true
            }
        });
        if out.len() == before {
            let cycle: Vec<&str> = remaining.iter().map(|&i| tables[i].name.as_str()).collect();
            return Err(ModelError::FkCycle {
                path: cycle.join(" -> "),
            });
        }
    }
    Ok(out)
}

fn render_column(column: &ColumnDef, dialect: Dialect) -> Result<String, Error> {
    let type_sql = if column.auto_id {
        dialect.auto_id_type(&column.column_type)?
    } else {
        dialect.sql_type(&column.column_type)?
    };
    let mut out = format!("{} {}", dialect.quote_one(&column.name), type_sql);
    if !column.nullable || column.primary_key {
        out.push_str(" NOT NULL");
    }
    if column.unique {
        out.push_str(" UNIQUE");
    }
    if column.auto_id {
        let clause = dialect.auto_increment_clause();
        if !clause.is_empty() {
            out.push(' ');
            out.push_str(clause);
        }
    }
    Ok(out)
}

fn render_create(table: &TableDef, dialect: Dialect) -> Result<String, Error> {
    let mut lines = Vec::with_capacity(table.columns.len() + 1 + table.foreign_keys.len());
    for column in &table.columns {
        lines.push(format!("  {}", render_column(column, dialect)?));
    }
    if !table.primary_key.is_empty() {
        let keys: Vec<String> = table
            .primary_key
            .iter()
            .map(|k| dialect.quote_one(k))
            .collect();
        lines.push(format!("  PRIMARY KEY ({})", keys.join(", ")));
    }
    for fk in &table.foreign_keys {
        let parts: Vec<&str> = fk.references_table.split('.').collect();
        lines.push(format!(
            "  FOREIGN KEY ({}) REFERENCES {} ({})",
            dialect.quote_one(&fk.column),
            dialect.quote_identifier(&parts),
            dialect.quote_one(&fk.references_column)
        ));
    }
    Ok(format!(
        "CREATE TABLE {} (\n{}\n){}",
        dialect.quote_identifier(&to_parts(&table.qualified)),
        lines.join(",\n"),
        dialect.table_suffix()
    ))
}

fn render_modify(table: &TableDef, column: &ColumnDef, dialect: Dialect) -> Result<String, Error> {
    let table_sql = dialect.quote_identifier(&to_parts(&table.qualified));
    let type_sql = dialect.sql_type(&column.column_type)?;
    Ok(match dialect {
        Dialect::MySql => format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}",
            table_sql,
            dialect.quote_one(&column.name),
            type_sql
        ),
        Dialect::Postgres => format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            table_sql,
            dialect.quote_one(&column.name),
            type_sql
        ),
        Dialect::Hsqldb => format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
            table_sql,
            dialect.quote_one(&column.name),
            type_sql
        ),
    })
}
