//! Single-record mutation.
//!
//! Insert, update, delete and upsert of one record, spreading multi-table
//! inheritance across its table chain. Records travel as JSON objects shaped
//! like the reducer's output; relation fields may hold either the referenced
//! entity object or its bare id.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::Error;
use crate::exec::{ExecResult, RowSource};
use crate::model::analyzer::{self, TableMapping};
use crate::model::{FieldDef, FieldKind, ModelError, ModelRegistry};
use crate::reduce::MappingError;
use crate::sql::{default_dialect, Dialect, Statement, UpsertStrategy};

/// Optimistic version check failed: the row changed (or vanished) under us.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("stale record: `{type_name}` id {id} was modified concurrently (expected version {expected_version})")]
pub struct StaleRecordError {
    pub type_name: String,
    pub id: Value,
    pub expected_version: Value,
}

pub struct Mutator<'r> {
    registry: &'r ModelRegistry,
    dialect: Dialect,
}

impl<'r> Mutator<'r> {
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Mutator {
            registry,
            dialect: default_dialect(),
        }
    }

    pub fn with_dialect(registry: &'r ModelRegistry, dialect: Dialect) -> Self {
        Mutator { registry, dialect }
    }

    /// Insert `record`, one INSERT per chain table, top-down. When the id is
    /// absent the topmost insert generates it and the remaining inserts (and
    /// the returned value) carry it.
    pub fn insert<S: RowSource + ?Sized>(
        &self,
        source: &mut S,
        type_name: &str,
        record: &Map<String, Value>,
    ) -> Result<Value, Error> {
        let chain = analyzer::table_chain(self.registry, type_name)?;
        let id = analyzer::id_field(self.registry, type_name)?;
        let id_column = id.column_name().unwrap_or_else(|| id.name.clone());
        let version_field = self.version_field(type_name)?;

        let mut id_value = record.get(&id.name).cloned().unwrap_or(Value::Null);
        for (index, mapping) in chain.iter().enumerate() {
            let mut columns = self.persistable_columns(&mapping.own_fields, record)?;
            if let Some(ref version) = version_field {
                if let Some(version_def) = mapping.own_fields.iter().find(|f| f.name == *version) {
                    let column = version_def
                        .column_name()
                        .unwrap_or_else(|| version.clone());
                    let supplied = record.get(version).filter(|v| !v.is_null());
                    if supplied.is_none() {
                        // fresh records start at version 1
                        if let Some(p) = columns.iter().position(|(c, _)| *c == column) {
                            columns[p].1 = Value::Number(1.into());
                        } else {
                            columns.push((column, Value::Number(1.into())));
                        }
                    }
                }
            }
            // the id column: generated by the top table when absent, echoed
            // into every chained table otherwise
            columns.retain(|(c, _)| *c != id_column);
            if index == 0 && id_value.is_null() {
                // omitted: the dialect generates it
            } else {
                columns.insert(0, (id_column.clone(), id_value.clone()));
            }

            let names: Vec<String> = columns
                .iter()
                .map(|(c, _)| self.dialect.quote_one(c))
                .collect();
            let markers = vec!["?"; columns.len()].join(", ");
            let params: Vec<Value> = columns.into_iter().map(|(_, v)| v).collect();
            let statement = Statement::new(
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.dialect.quote_identifier(&mapping.table.parts()),
                    names.join(", "),
                    markers
                ),
                params,
            );
            let result: ExecResult = source.execute(&statement)?;
            if index == 0 && id_value.is_null() {
                id_value = result
                    .generated_ids
                    .first()
                    .cloned()
                    .ok_or_else(|| MappingError::NoGeneratedId {
                        table: mapping.table.name.clone(),
                    })?;
            }
        }
        Ok(id_value)
    }

    /// Update `record` by id, one UPDATE per chain table. Fields marked
    /// no-update are skipped. With a version field the update is guarded by
    /// `WHERE version = ?`, bumps the version, and zero affected rows raise
    /// [`StaleRecordError`].
    pub fn update<S: RowSource + ?Sized>(
        &self,
        source: &mut S,
        type_name: &str,
        record: &Map<String, Value>,
    ) -> Result<u64, Error> {
        let chain = analyzer::table_chain(self.registry, type_name)?;
        let id = analyzer::id_field(self.registry, type_name)?;
        let id_column = id.column_name().unwrap_or_else(|| id.name.clone());
        let id_value = self.require_field(record, type_name, &id.name, "update")?;
        let version_field = self.version_field(type_name)?;

        let mut affected_max = 0u64;
        for mapping in &chain {
            let mut columns = self.persistable_columns(&mapping.own_fields, record)?;
            columns.retain(|(c, _)| *c != id_column);
            columns.retain(|(c, _)| {
                !mapping
                    .own_fields
                    .iter()
                    .any(|f| f.no_update && f.column_name().as_deref() == Some(c.as_str()))
            });

            let version_def = mapping
                .own_fields
                .iter()
                .find(|f| Some(&f.name) == version_field.as_ref());
            let versioned_here = version_def.is_some();
            let version_name = version_field.clone().unwrap_or_default();
            let version_column = version_def
                .and_then(|f| f.column_name())
                .unwrap_or_else(|| version_name.clone());
            if versioned_here {
                columns.retain(|(c, _)| *c != version_column);
            }
            if columns.is_empty() && !versioned_here {
                continue;
            }

            let mut sets: Vec<String> = columns
                .iter()
                .map(|(c, _)| format!("{} = ?", self.dialect.quote_one(c)))
                .collect();
            let mut params: Vec<Value> = columns.into_iter().map(|(_, v)| v).collect();
            if versioned_here {
                let quoted = self.dialect.quote_one(&version_column);
                sets.push(format!("{} = {} + 1", quoted, quoted));
            }
            let mut sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                self.dialect.quote_identifier(&mapping.table.parts()),
                sets.join(", "),
                self.dialect.quote_one(&id_column)
            );
            params.push(id_value.clone());

            let expected_version = if versioned_here {
                let value =
                    self.require_field(record, type_name, &version_name, "update with version check")?;
                sql.push_str(&format!(
                    " AND {} = ?",
                    self.dialect.quote_one(&version_column)
                ));
                params.push(value.clone());
                Some(value)
            } else {
                None
            };

            let result = source.execute(&Statement::new(sql, params))?;
            if let Some(expected) = expected_version {
                if result.affected_rows == 0 {
                    return Err(StaleRecordError {
                        type_name: type_name.to_string(),
                        id: id_value,
                        expected_version: expected,
                    }
                    .into());
                }
            }
            affected_max = affected_max.max(result.affected_rows);
        }
        Ok(affected_max)
    }

    /// Delete by id, bottom-up through the chain so child tables never
    /// orphan their parent row mid-way.
    pub fn delete<S: RowSource + ?Sized>(
        &self,
        source: &mut S,
        type_name: &str,
        id: &Value,
    ) -> Result<u64, Error> {
        let chain = analyzer::table_chain(self.registry, type_name)?;
        let id_field = analyzer::id_field(self.registry, type_name)?;
        let id_column = id_field
            .column_name()
            .unwrap_or_else(|| id_field.name.clone());
        let mut affected_max = 0u64;
        for mapping in chain.iter().rev() {
            let statement = Statement::new(
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    self.dialect.quote_identifier(&mapping.table.parts()),
                    self.dialect.quote_one(&id_column)
                ),
                vec![id.clone()],
            );
            let result = source.execute(&statement)?;
            affected_max = affected_max.max(result.affected_rows);
        }
        Ok(affected_max)
    }

    /// Insert-or-update through the dialect's primitive, or through an
    /// update-then-insert fallback inside one transaction. Restricted to
    /// single-table types; the record must carry its id.
    pub fn upsert<S: RowSource + ?Sized>(
        &self,
        source: &mut S,
        type_name: &str,
        record: &Map<String, Value>,
    ) -> Result<(), Error> {
        let chain = analyzer::table_chain(self.registry, type_name)?;
        if chain.len() > 1 {
            return Err(ModelError::UpsertChain {
                type_name: type_name.to_string(),
                count: chain.len(),
            }
            .into());
        }
        let mapping = &chain[0];
        let id = analyzer::id_field(self.registry, type_name)?;
        let id_column = id.column_name().unwrap_or_else(|| id.name.clone());
        let id_value = self.require_field(record, type_name, &id.name, "upsert")?;

        let mut columns = self.persistable_columns(&mapping.own_fields, record)?;
        columns.retain(|(c, _)| *c != id_column);
        columns.insert(0, (id_column.clone(), id_value.clone()));

        match self.dialect.upsert_strategy() {
            UpsertStrategy::OnDuplicateKey => {
                let statement = self.native_upsert(mapping, &columns, &id_column, |column| {
                    format!("{0} = VALUES({0})", column)
                });
                source.execute(&statement)?;
            }
            UpsertStrategy::OnConflict => {
                let statement = self.native_upsert(mapping, &columns, &id_column, |column| {
                    format!("{0} = EXCLUDED.{0}", column)
                });
                source.execute(&statement)?;
            }
            UpsertStrategy::UpdateThenInsert => {
                crate::exec::run_in_transaction(source, |tx| {
                    let sets: Vec<String> = columns
                        .iter()
                        .filter(|(c, _)| *c != id_column)
                        .map(|(c, _)| format!("{} = ?", self.dialect.quote_one(c)))
                        .collect();
                    if !sets.is_empty() {
                        let mut params: Vec<Value> = columns
                            .iter()
                            .filter(|(c, _)| *c != id_column)
                            .map(|(_, v)| v.clone())
                            .collect();
                        params.push(id_value.clone());
                        let update = Statement::new(
                            format!(
                                "UPDATE {} SET {} WHERE {} = ?",
                                self.dialect.quote_identifier(&mapping.table.parts()),
                                sets.join(", "),
                                self.dialect.quote_one(&id_column)
                            ),
                            params,
                        );
                        if tx.execute(&update)?.affected_rows > 0 {
                            return Ok(());
                        }
                    }
                    let names: Vec<String> = columns
                        .iter()
                        .map(|(c, _)| self.dialect.quote_one(c))
                        .collect();
                    let markers = vec!["?"; columns.len()].join(", ");
                    let insert = Statement::new(
                        format!(
                            "INSERT INTO {} ({}) VALUES ({})",
                            self.dialect.quote_identifier(&mapping.table.parts()),
                            names.join(", "),
                            markers
                        ),
                        columns.iter().map(|(_, v)| v.clone()).collect(),
                    );
                    tx.execute(&insert)?;
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    fn native_upsert(
        &self,
        mapping: &TableMapping,
        columns: &[(String, Value)],
        id_column: &str,
        assign: impl Fn(&str) -> String,
    ) -> Statement {
        let names: Vec<String> = columns
            .iter()
            .map(|(c, _)| self.dialect.quote_one(c))
            .collect();
        let markers = vec!["?"; columns.len()].join(", ");
        let updates: Vec<String> = columns
            .iter()
            .filter(|(c, _)| c != id_column)
            .map(|(c, _)| assign(&self.dialect.quote_one(c)))
            .collect();
        let clause = match self.dialect.upsert_strategy() {
            UpsertStrategy::OnDuplicateKey => {
                format!(" ON DUPLICATE KEY UPDATE {}", updates.join(", "))
            }
            UpsertStrategy::OnConflict => format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                self.dialect.quote_one(id_column),
                updates.join(", ")
            ),
            UpsertStrategy::UpdateThenInsert => String::new(),
        };
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                self.dialect.quote_identifier(&mapping.table.parts()),
                names.join(", "),
                markers,
                clause
            ),
            columns.iter().map(|(_, v)| v.clone()).collect(),
        )
    }

    /// Columns persisted for a field list: scalars by value, to-one fields
    /// as their foreign key cell (entity object or bare id accepted),
    /// embedded objects flattened by prefix. Computed fields, collections
    /// and other-bags never persist. Fields absent from the record map are
    /// left out entirely, so partial records never null out columns they do
    /// not mention; an explicit JSON null does persist as NULL.
    fn persistable_columns(
        &self,
        fields: &[FieldDef],
        record: &Map<String, Value>,
    ) -> Result<Vec<(String, Value)>, Error> {
        let mut out = Vec::new();
        for field in fields {
            match &field.kind {
                FieldKind::Scalar(_) => {
                    let Some(value) = record.get(&field.name) else {
                        continue;
                    };
                    let column = field.column_name().expect("scalar fields map a column");
                    out.push((column, value.clone()));
                }
                FieldKind::ToOne { target, .. } => {
                    let Some(raw) = record.get(&field.name) else {
                        continue;
                    };
                    let column = field.column_name().expect("to-one fields map a column");
                    let value = match raw {
                        Value::Null => Value::Null,
                        Value::Object(entity) => {
                            let target_id = analyzer::id_field(self.registry, target)?;
                            entity.get(&target_id.name).cloned().unwrap_or(Value::Null)
                        }
                        plain_id => plain_id.clone(),
                    };
                    out.push((column, value));
                }
                FieldKind::Embedded { target, prefix } => {
                    let Some(nested) = record.get(&field.name) else {
                        continue;
                    };
                    self.flatten_embedded(target, prefix, Some(nested), &mut out)?;
                }
                FieldKind::Computed(_)
                | FieldKind::ToMany { .. }
                | FieldKind::LinkMany { .. }
                | FieldKind::OtherBag => {}
            }
        }
        Ok(out)
    }

    fn flatten_embedded(
        &self,
        target: &str,
        prefix: &str,
        value: Option<&Value>,
        out: &mut Vec<(String, Value)>,
    ) -> Result<(), Error> {
        let record = self.registry.get(target)?.clone();
        let object = value.and_then(|v| v.as_object());
        for field in &record.fields {
            match &field.kind {
                FieldKind::Scalar(_) => {
                    let column = field.column_name().expect("scalar fields map a column");
                    let cell = object
                        .and_then(|o| o.get(&field.name))
                        .cloned()
                        .unwrap_or(Value::Null);
                    out.push((format!("{}{}", prefix, column), cell));
                }
                FieldKind::Embedded {
                    target: inner,
                    prefix: inner_prefix,
                } => {
                    let nested = object.and_then(|o| o.get(&field.name));
                    let composed = format!("{}{}", prefix, inner_prefix);
                    self.flatten_embedded(inner, &composed, nested, out)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn version_field(&self, type_name: &str) -> Result<Option<String>, Error> {
        Ok(self.registry.get(type_name)?.version_field.clone())
    }

    fn require_field(
        &self,
        record: &Map<String, Value>,
        type_name: &str,
        field: &str,
        operation: &'static str,
    ) -> Result<Value, Error> {
        match record.get(field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(MappingError::MissingFieldValue {
                type_name: type_name.to_string(),
                field: field.to_string(),
                operation,
            }
            .into()),
        }
    }
}
