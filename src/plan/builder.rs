//! The alias planner.
//!
//! Walks a validated model from the root record type and allocates the
//! dotted alias namespace, join edges, and projection list. Visit order is
//! fixed: superclass chain first, then declared fields in source order, so
//! the emitted SQL is deterministic and cacheable.
//!
//! Alias naming: the root alias is the root table name. Relation, embedded
//! and linked-value children of the root use the bare field name; deeper
//! children append `.fieldName` to their parent's path. Inherited tables and
//! subclass branches always append `.tableName` (single-table branches,
//! having no table of their own, append the lowercased type name).

use std::collections::{HashMap, HashSet};

use crate::model::analyzer::{self, BranchInfo, TableMapping};
use crate::model::{FieldDef, FieldKind, ModelError, ModelRegistry, RecordType};
use crate::plan::{
    AliasKind, AliasNode, BranchPlan, JoinCondition, JoinEdge, JoinKind, ProjectionEntry,
    ProjectionSource, QueryPlan,
};

/// Compile `root_type` into a [`QueryPlan`]. Fails on any structural model
/// problem; a plan is only ever produced from a valid, acyclic model.
pub fn build_query_plan(
    registry: &ModelRegistry,
    root_type: &str,
) -> Result<QueryPlan, ModelError> {
    analyzer::validate_root(registry, root_type)?;

    let chain = analyzer::table_chain(registry, root_type)?;
    let root_table = chain.last().expect("chain is non-empty").table.clone();
    let root_alias = root_table.name.clone();
    let id = analyzer::id_field(registry, root_type)?;
    let root_id_column = id.column_name().unwrap_or_else(|| id.name.clone());

    let mut planner = Planner {
        registry,
        root_alias: root_alias.clone(),
        aliases: Vec::new(),
        index: HashMap::new(),
        joins: Vec::new(),
        projections: Vec::new(),
        keys: HashSet::new(),
        group_by: Vec::new(),
    };
    planner.add_alias(AliasNode {
        path: root_alias.clone(),
        type_name: root_type.to_string(),
        parent: None,
        link_field: None,
        kind: AliasKind::Root,
        container: None,
        id_keys: Vec::new(),
        discriminator_key: None,
        branches: Vec::new(),
        other_bag_field: None,
        value_type: None,
    })?;
    planner.expand_entity(root_type, &root_alias)?;

    log::debug!(
        "planned `{}`: {} aliases, {} joins, {} projections",
        root_type,
        planner.aliases.len(),
        planner.joins.len(),
        planner.projections.len()
    );

    Ok(QueryPlan {
        root_type: root_type.to_string(),
        root_table,
        root_alias: root_alias.clone(),
        aliases: planner.aliases,
        joins: planner.joins,
        projections: planner.projections,
        group_by: planner.group_by,
        root_id_column: (root_alias, root_id_column),
    })
}

/// Per-entity context the field walk needs: where the entity's identity
/// lives on the SQL side.
struct EntityCtx<'a> {
    alias: &'a str,
    concrete_table: &'a str,
    id_column: &'a str,
}

struct Planner<'r> {
    registry: &'r ModelRegistry,
    root_alias: String,
    aliases: Vec<AliasNode>,
    index: HashMap<String, usize>,
    joins: Vec<JoinEdge>,
    projections: Vec<ProjectionEntry>,
    keys: HashSet<String>,
    group_by: Vec<(String, String)>,
}

impl<'r> Planner<'r> {
    fn add_alias(&mut self, node: AliasNode) -> Result<(), ModelError> {
        if self.index.contains_key(&node.path) {
            return Err(ModelError::AliasCollision {
                alias: node.path.clone(),
            });
        }
        self.index.insert(node.path.clone(), self.aliases.len());
        self.aliases.push(node);
        Ok(())
    }

    fn alias_mut(&mut self, path: &str) -> &mut AliasNode {
        let i = self.index[path];
        &mut self.aliases[i]
    }

    /// Children of the root drop the root prefix; everything else appends.
    fn child_alias(&self, parent: &str, name: &str) -> String {
        if parent == self.root_alias {
            name.to_string()
        } else {
            format!("{}.{}", parent, name)
        }
    }

    fn add_projection(&mut self, entry: ProjectionEntry) -> Result<(), ModelError> {
        if !self.keys.insert(entry.result_key.clone()) {
            return Err(ModelError::AliasCollision {
                alias: entry.result_key.clone(),
            });
        }
        self.projections.push(entry);
        Ok(())
    }

    /// Expand one entity alias: inherited-table joins, field projections,
    /// relation joins, subclass branches.
    fn expand_entity(&mut self, type_name: &str, alias: &str) -> Result<(), ModelError> {
        let chain = analyzer::table_chain(self.registry, type_name)?;
        let id = analyzer::id_field(self.registry, type_name)?;
        let id_column = id.column_name().unwrap_or_else(|| id.name.clone());
        let (supers, concrete) = chain.split_at(chain.len() - 1);
        let concrete: &TableMapping = &concrete[0];

        let ctx = EntityCtx {
            alias,
            concrete_table: &concrete.table.name,
            id_column: &id_column,
        };

        // Inherited tables join INNER on the shared id. A super table with
        // no surviving fields contributes nothing and is skipped.
        for mapping in supers {
            if mapping.own_fields.is_empty() {
                continue;
            }
            let super_alias = format!("{}.{}", alias, mapping.table.name);
            self.add_alias(AliasNode {
                path: super_alias.clone(),
                type_name: String::new(),
                parent: Some(alias.to_string()),
                link_field: None,
                kind: AliasKind::SuperTable,
                container: None,
                id_keys: Vec::new(),
                discriminator_key: None,
                branches: Vec::new(),
                other_bag_field: None,
                value_type: None,
            })?;
            self.joins.push(JoinEdge {
                kind: JoinKind::Inner,
                table: mapping.table.clone(),
                alias: super_alias.clone(),
                condition: JoinCondition::Equi {
                    left_alias: alias.to_string(),
                    left_column: id_column.clone(),
                    right_alias: super_alias.clone(),
                    right_column: id_column.clone(),
                },
            });
            self.project_fields(&mapping.own_fields, alias, &super_alias, &ctx)?;
        }

        self.project_fields(&concrete.own_fields, alias, alias, &ctx)?;
        self.alias_mut(alias).id_keys = vec![format!("{}.{}", alias, id.name)];

        let record = self.registry.get(type_name)?.clone();
        if !record.subclasses.is_empty() {
            self.expand_branches(&record, alias, &concrete.table.name, &id_column, &id.name)?;
        }
        Ok(())
    }

    /// Project one field list. `entity_alias` is the alias whose object the
    /// values land in; `sql_alias` is the table alias that physically holds
    /// the columns (they differ for inherited tables and single-table
    /// branches).
    fn project_fields(
        &mut self,
        fields: &[FieldDef],
        entity_alias: &str,
        sql_alias: &str,
        ctx: &EntityCtx<'_>,
    ) -> Result<(), ModelError> {
        for field in fields {
            match &field.kind {
                FieldKind::Scalar(column_type) => {
                    let column = field.column_name().expect("scalar fields map a column");
                    self.add_projection(ProjectionEntry {
                        source: ProjectionSource::Column {
                            alias: sql_alias.to_string(),
                            column: column.clone(),
                        },
                        result_key: format!("{}.{}", entity_alias, field.name),
                        target_alias: entity_alias.to_string(),
                        target_field: Some(field.name.clone()),
                        mapper: Some(column_type.clone()),
                    })?;
                    if field.group_by {
                        self.group_by.push((sql_alias.to_string(), column));
                    }
                }
                FieldKind::Computed(expression) => {
                    self.add_projection(ProjectionEntry {
                        source: ProjectionSource::Expression {
                            text: expression.clone(),
                            scope_alias: entity_alias.to_string(),
                        },
                        result_key: format!("{}.{}", entity_alias, field.name),
                        target_alias: entity_alias.to_string(),
                        target_field: Some(field.name.clone()),
                        mapper: None,
                    })?;
                }
                FieldKind::Embedded { target, prefix } => {
                    let child = self.child_alias(entity_alias, &field.name);
                    self.expand_embedded(target, &child, sql_alias, prefix, entity_alias, &field.name)?;
                }
                FieldKind::ToOne {
                    target,
                    foreign_key,
                    join_condition,
                } => {
                    let child = self.child_alias(entity_alias, &field.name);
                    let target_chain = analyzer::table_chain(self.registry, target)?;
                    let target_table = target_chain.last().expect("chain non-empty").table.clone();
                    let target_id = analyzer::id_field(self.registry, target)?;
                    let target_id_column = target_id
                        .column_name()
                        .unwrap_or_else(|| target_id.name.clone());
                    let fk = foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", field.name));
                    self.add_alias(AliasNode {
                        path: child.clone(),
                        type_name: target.clone(),
                        parent: Some(entity_alias.to_string()),
                        link_field: Some(field.name.clone()),
                        kind: AliasKind::ToOne,
                        container: None,
                        id_keys: Vec::new(),
                        discriminator_key: None,
                        branches: Vec::new(),
                        other_bag_field: None,
                        value_type: None,
                    })?;
                    let condition = match join_condition {
                        Some(text) => JoinCondition::Fragment {
                            text: text.clone(),
                            scope_alias: entity_alias.to_string(),
                            link_table: None,
                        },
                        None => JoinCondition::Equi {
                            left_alias: sql_alias.to_string(),
                            left_column: fk,
                            right_alias: child.clone(),
                            right_column: target_id_column,
                        },
                    };
                    self.joins.push(JoinEdge {
                        kind: JoinKind::Left,
                        table: target_table,
                        alias: child.clone(),
                        condition,
                    });
                    self.expand_entity(target, &child)?;
                }
                FieldKind::ToMany {
                    target,
                    container,
                    inverse_key,
                    join_condition,
                } => {
                    let child = self.child_alias(entity_alias, &field.name);
                    let target_chain = analyzer::table_chain(self.registry, target)?;
                    let target_table = target_chain.last().expect("chain non-empty").table.clone();
                    let inverse = inverse_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", ctx.concrete_table));
                    self.add_alias(AliasNode {
                        path: child.clone(),
                        type_name: target.clone(),
                        parent: Some(entity_alias.to_string()),
                        link_field: Some(field.name.clone()),
                        kind: AliasKind::ToMany,
                        container: Some(*container),
                        id_keys: Vec::new(),
                        discriminator_key: None,
                        branches: Vec::new(),
                        other_bag_field: None,
                        value_type: None,
                    })?;
                    let condition = match join_condition {
                        Some(text) => JoinCondition::Fragment {
                            text: text.clone(),
                            scope_alias: entity_alias.to_string(),
                            link_table: None,
                        },
                        None => JoinCondition::Equi {
                            left_alias: ctx.alias.to_string(),
                            left_column: ctx.id_column.to_string(),
                            right_alias: child.clone(),
                            right_column: inverse,
                        },
                    };
                    self.joins.push(JoinEdge {
                        kind: JoinKind::Left,
                        table: target_table,
                        alias: child.clone(),
                        condition,
                    });
                    self.expand_entity(target, &child)?;
                }
                FieldKind::LinkMany {
                    target,
                    link_table,
                    container,
                    left_column,
                    right_column,
                    fetch_column,
                    value_type,
                    join_condition,
                } => {
                    let link_alias = self.child_alias(entity_alias, link_table);
                    self.add_alias(AliasNode {
                        path: link_alias.clone(),
                        type_name: String::new(),
                        parent: Some(entity_alias.to_string()),
                        link_field: None,
                        kind: AliasKind::LinkTable,
                        container: None,
                        id_keys: Vec::new(),
                        discriminator_key: None,
                        branches: Vec::new(),
                        other_bag_field: None,
                        value_type: None,
                    })?;
                    let left = left_column
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", ctx.concrete_table));
                    self.joins.push(JoinEdge {
                        kind: JoinKind::Left,
                        table: crate::model::TableRef::new(link_table.clone()),
                        alias: link_alias.clone(),
                        condition: JoinCondition::Equi {
                            left_alias: ctx.alias.to_string(),
                            left_column: ctx.id_column.to_string(),
                            right_alias: link_alias.clone(),
                            right_column: left,
                        },
                    });

                    if let Some(fetch) = fetch_column {
                        // Collapsed to a value sequence off the junction row.
                        let value_alias = self.child_alias(entity_alias, &field.name);
                        self.add_alias(AliasNode {
                            path: value_alias.clone(),
                            type_name: String::new(),
                            parent: Some(entity_alias.to_string()),
                            link_field: Some(field.name.clone()),
                            kind: AliasKind::LinkedValue,
                            container: Some(*container),
                            id_keys: Vec::new(),
                            discriminator_key: None,
                            branches: Vec::new(),
                            other_bag_field: None,
                            value_type: value_type.clone(),
                        })?;
                        self.add_projection(ProjectionEntry {
                            source: ProjectionSource::Column {
                                alias: link_alias.clone(),
                                column: fetch.clone(),
                            },
                            result_key: format!("{}.value", value_alias),
                            target_alias: value_alias.clone(),
                            target_field: Some("value".to_string()),
                            mapper: value_type.clone(),
                        })?;
                    } else {
                        let target = target.as_ref().expect("validated link target");
                        let child = self.child_alias(entity_alias, &field.name);
                        let target_chain = analyzer::table_chain(self.registry, target)?;
                        let target_table =
                            target_chain.last().expect("chain non-empty").table.clone();
                        let target_id = analyzer::id_field(self.registry, target)?;
                        let target_id_column = target_id
                            .column_name()
                            .unwrap_or_else(|| target_id.name.clone());
                        let right = right_column
                            .clone()
                            .unwrap_or_else(|| format!("{}_id", target_table.name));
                        self.add_alias(AliasNode {
                            path: child.clone(),
                            type_name: target.clone(),
                            parent: Some(entity_alias.to_string()),
                            link_field: Some(field.name.clone()),
                            kind: AliasKind::ToMany,
                            container: Some(*container),
                            id_keys: Vec::new(),
                            discriminator_key: None,
                            branches: Vec::new(),
                            other_bag_field: None,
                            value_type: None,
                        })?;
                        let condition = match join_condition {
                            Some(text) => JoinCondition::Fragment {
                                text: text.clone(),
                                scope_alias: entity_alias.to_string(),
                                link_table: Some(link_alias.clone()),
                            },
                            None => JoinCondition::Equi {
                                left_alias: link_alias.clone(),
                                left_column: right,
                                right_alias: child.clone(),
                                right_column: target_id_column,
                            },
                        };
                        self.joins.push(JoinEdge {
                            kind: JoinKind::Left,
                            table: target_table,
                            alias: child.clone(),
                            condition,
                        });
                        self.expand_entity(target, &child)?;
                    }
                }
                FieldKind::OtherBag => {
                    self.alias_mut(entity_alias).other_bag_field = Some(field.name.clone());
                }
            }
        }
        Ok(())
    }

    fn expand_embedded(
        &mut self,
        target: &str,
        child: &str,
        sql_alias: &str,
        prefix: &str,
        parent_alias: &str,
        link_field: &str,
    ) -> Result<(), ModelError> {
        self.add_alias(AliasNode {
            path: child.to_string(),
            type_name: target.to_string(),
            parent: Some(parent_alias.to_string()),
            link_field: Some(link_field.to_string()),
            kind: AliasKind::Embedded,
            container: None,
            id_keys: Vec::new(),
            discriminator_key: None,
            branches: Vec::new(),
            other_bag_field: None,
            value_type: None,
        })?;
        let record = self.registry.get(target)?.clone();
        for field in &record.fields {
            match &field.kind {
                FieldKind::Scalar(column_type) => {
                    let column = field.column_name().expect("scalar fields map a column");
                    self.add_projection(ProjectionEntry {
                        source: ProjectionSource::Column {
                            alias: sql_alias.to_string(),
                            column: format!("{}{}", prefix, column),
                        },
                        result_key: format!("{}.{}", child, field.name),
                        target_alias: child.to_string(),
                        target_field: Some(field.name.clone()),
                        mapper: Some(column_type.clone()),
                    })?;
                }
                FieldKind::Embedded {
                    target: inner,
                    prefix: inner_prefix,
                } => {
                    let nested = format!("{}.{}", child, field.name);
                    let composed = format!("{}{}", prefix, inner_prefix);
                    self.expand_embedded(inner, &nested, sql_alias, &composed, child, &field.name)?;
                }
                // validate_embedded already rejected anything else
                _ => unreachable!("embedded types only contain scalar and embedded fields"),
            }
        }
        Ok(())
    }

    fn expand_branches(
        &mut self,
        record: &RecordType,
        alias: &str,
        parent_table: &str,
        id_column: &str,
        id_name: &str,
    ) -> Result<(), ModelError> {
        let branches = analyzer::branches(self.registry, record)?;

        let discriminator_key = if branches.iter().any(|b| b.table.is_none()) {
            let column = record
                .discriminator_column
                .clone()
                .expect("validated by analyzer::branches");
            Some(self.ensure_discriminator_projection(alias, &column)?)
        } else {
            None
        };

        let mut plans = Vec::new();
        for branch in &branches {
            let plan = match &branch.table {
                Some(table) => {
                    self.expand_table_branch(branch, table.clone(), alias, id_column, id_name)?
                }
                None => self.expand_single_table_branch(branch, alias, parent_table, id_column)?,
            };
            plans.push(plan);
        }

        let node = self.alias_mut(alias);
        node.branches = plans;
        node.discriminator_key = discriminator_key;
        Ok(())
    }

    /// The discriminator cell may already be projected through a declared
    /// scalar field; reuse its key in that case.
    fn ensure_discriminator_projection(
        &mut self,
        alias: &str,
        column: &str,
    ) -> Result<String, ModelError> {
        let existing = self.projections.iter().find(|p| {
            p.target_alias == alias
                && matches!(&p.source, ProjectionSource::Column { alias: a, column: c }
                    if a == alias && c == column)
        });
        if let Some(p) = existing {
            return Ok(p.result_key.clone());
        }
        let key = format!("{}.{}", alias, column);
        self.add_projection(ProjectionEntry {
            source: ProjectionSource::Column {
                alias: alias.to_string(),
                column: column.to_string(),
            },
            result_key: key.clone(),
            target_alias: alias.to_string(),
            target_field: None,
            mapper: None,
        })?;
        Ok(key)
    }

    fn expand_table_branch(
        &mut self,
        branch: &BranchInfo,
        table: crate::model::TableRef,
        alias: &str,
        id_column: &str,
        id_name: &str,
    ) -> Result<BranchPlan, ModelError> {
        let branch_table_name = table.name.clone();
        let branch_alias = format!("{}.{}", alias, table.name);
        self.add_alias(AliasNode {
            path: branch_alias.clone(),
            type_name: branch.type_name.clone(),
            parent: Some(alias.to_string()),
            link_field: None,
            kind: AliasKind::SubclassBranch,
            container: None,
            id_keys: Vec::new(),
            discriminator_key: None,
            branches: Vec::new(),
            other_bag_field: None,
            value_type: None,
        })?;
        self.joins.push(JoinEdge {
            kind: JoinKind::Left,
            table,
            alias: branch_alias.clone(),
            condition: JoinCondition::Equi {
                left_alias: alias.to_string(),
                left_column: id_column.to_string(),
                right_alias: branch_alias.clone(),
                right_column: id_column.to_string(),
            },
        });
        // Branch id drives discrimination; it never lands in a field (the
        // parent already owns the id value).
        let id_key = format!("{}.{}", branch_alias, id_name);
        self.add_projection(ProjectionEntry {
            source: ProjectionSource::Column {
                alias: branch_alias.clone(),
                column: id_column.to_string(),
            },
            result_key: id_key.clone(),
            target_alias: branch_alias.clone(),
            target_field: None,
            mapper: None,
        })?;
        self.alias_mut(&branch_alias).id_keys = vec![id_key.clone()];

        let branch_ctx = EntityCtx {
            alias: &branch_alias,
            concrete_table: &branch_table_name,
            id_column,
        };
        self.project_fields(&branch.own_fields, &branch_alias, &branch_alias, &branch_ctx)?;

        Ok(BranchPlan {
            type_name: branch.type_name.clone(),
            alias: branch_alias,
            id_key: Some(id_key),
            discriminator_value: branch.discriminator_value.clone(),
        })
    }

    fn expand_single_table_branch(
        &mut self,
        branch: &BranchInfo,
        alias: &str,
        parent_table: &str,
        id_column: &str,
    ) -> Result<BranchPlan, ModelError> {
        let branch_alias = format!("{}.{}", alias, branch.type_name.to_lowercase());
        self.add_alias(AliasNode {
            path: branch_alias.clone(),
            type_name: branch.type_name.clone(),
            parent: Some(alias.to_string()),
            link_field: None,
            kind: AliasKind::SubclassBranch,
            container: None,
            id_keys: Vec::new(),
            discriminator_key: None,
            branches: Vec::new(),
            other_bag_field: None,
            value_type: None,
        })?;
        // Branch columns live in the parent's table; no join.
        let ctx = EntityCtx {
            alias,
            concrete_table: parent_table,
            id_column,
        };
        self.project_fields(&branch.own_fields, &branch_alias, alias, &ctx)?;
        Ok(BranchPlan {
            type_name: branch.type_name.clone(),
            alias: branch_alias,
            id_key: None,
            discriminator_value: branch.discriminator_value.clone(),
        })
    }
}
