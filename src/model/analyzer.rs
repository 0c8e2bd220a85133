//! Model analysis: table chains, inheritance flattening, and the structural
//! validation pass that runs before any alias is allocated.
//!
//! The analyzer is the only place that understands the inheritance rules;
//! the planner consumes its output and never walks `parent` links itself.

use crate::model::{FieldDef, FieldKind, ModelError, ModelRegistry, RecordType, TableRef};

/// One entry of a table chain: a physical table plus the fields stored in
/// it. Fields declared on table-less classes attach to the mapping of the
/// nearest annotated descendant: a class without a table is only ever
/// realized through whichever concrete subclass instantiates it, so its
/// columns live in that subclass's table. A table-less leaf has no
/// descendant table and attaches to the concrete table itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    pub table: TableRef,
    pub declaring_type: String,
    pub own_fields: Vec<FieldDef>,
}

/// Resolve the ordered table chain for `type_name`, topmost ancestor first.
/// The last entry is the concrete table. Empty chains are an error: a type
/// reachable as an entity must map somewhere.
pub fn table_chain(
    registry: &ModelRegistry,
    type_name: &str,
) -> Result<Vec<TableMapping>, ModelError> {
    let lineage = lineage(registry, type_name)?;
    let mut chain: Vec<TableMapping> = Vec::new();
    // Fields of table-less classes wait here until the next annotated class
    // below them opens its mapping.
    let mut pending: Vec<FieldDef> = Vec::new();

    for record in &lineage {
        match &record.table {
            Some(table) => {
                let mut own_fields = std::mem::take(&mut pending);
                own_fields.extend(record.fields.iter().cloned());
                chain.push(TableMapping {
                    table: table.clone(),
                    declaring_type: record.name.clone(),
                    own_fields,
                });
            }
            None => pending.extend(record.fields.iter().cloned()),
        }
    }

    if chain.is_empty() {
        return Err(ModelError::MissingTable {
            type_name: type_name.to_string(),
        });
    }
    if !pending.is_empty() {
        // table-less leaf classes: their concrete table is the last in the
        // chain
        chain
            .last_mut()
            .expect("chain checked non-empty")
            .own_fields
            .extend(pending);
    }
    Ok(chain)
}

/// The class chain from topmost ancestor down to `type_name`.
fn lineage<'r>(
    registry: &'r ModelRegistry,
    type_name: &str,
) -> Result<Vec<&'r RecordType>, ModelError> {
    let mut up = Vec::new();
    let mut current = Some(type_name.to_string());
    while let Some(name) = current {
        // A parent chain that revisits a type would never terminate.
        if up.iter().any(|r: &&RecordType| r.name == name) {
            return Err(ModelError::Cycle {
                path: format!("{} (superclass chain)", name),
            });
        }
        let record = registry.get(&name)?;
        up.push(record);
        current = record.parent.clone();
    }
    up.reverse();
    Ok(up)
}

/// All fields of `type_name` after inheritance flattening, declaration
/// order, topmost class first.
pub fn flattened_fields(
    registry: &ModelRegistry,
    type_name: &str,
) -> Result<Vec<FieldDef>, ModelError> {
    Ok(lineage(registry, type_name)?
        .iter()
        .flat_map(|r| r.fields.iter().cloned())
        .collect())
}

/// The single id field of an entity type, post-flattening.
pub fn id_field(registry: &ModelRegistry, type_name: &str) -> Result<FieldDef, ModelError> {
    let ids: Vec<FieldDef> = flattened_fields(registry, type_name)?
        .into_iter()
        .filter(|f| f.is_id)
        .collect();
    match ids.len() {
        1 => Ok(ids.into_iter().next().unwrap()),
        n => Err(ModelError::IdCount {
            type_name: type_name.to_string(),
            count: n,
        }),
    }
}

/// A subclass branch as the planner consumes it: its own table when it is
/// table-per-subclass, and the fields that belong to the branch alone.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub type_name: String,
    /// `None` for single-table branches (columns live in the parent table).
    pub table: Option<TableRef>,
    pub own_fields: Vec<FieldDef>,
    pub discriminator_value: Option<String>,
}

/// Resolve the branch set of `parent`. Enforces the discriminator rules: a
/// branch without its own table must be discriminated through the parent's
/// discriminator column, and carry a value for it.
pub fn branches(
    registry: &ModelRegistry,
    parent: &RecordType,
) -> Result<Vec<BranchInfo>, ModelError> {
    let mut out = Vec::new();
    for branch_name in &parent.subclasses {
        let branch = registry.get(branch_name)?;
        // Classes between the branch and the parent contribute their fields
        // to the branch; the first table found from the branch upward is the
        // branch table.
        let mut classes = Vec::new();
        let mut current = Some(branch_name.clone());
        loop {
            match current {
                Some(name) if name == parent.name => break,
                Some(name) => {
                    let record = registry.get(&name)?;
                    classes.push(record);
                    current = record.parent.clone();
                }
                None => {
                    return Err(ModelError::InvalidConfig {
                        message: format!(
                            "subclass `{}` does not descend from `{}`",
                            branch_name, parent.name
                        ),
                    })
                }
            }
        }
        classes.reverse();
        let table = classes.iter().find_map(|r| r.table.clone());
        let own_fields: Vec<FieldDef> = classes
            .iter()
            .flat_map(|r| r.fields.iter().cloned())
            .collect();

        if table.is_none() {
            if parent.discriminator_column.is_none() {
                return Err(ModelError::BranchWithoutTable {
                    type_name: parent.name.clone(),
                    branch: branch_name.clone(),
                });
            }
            if branch.discriminator_value.is_none() {
                return Err(ModelError::BranchWithoutDiscriminator {
                    type_name: parent.name.clone(),
                    branch: branch_name.clone(),
                });
            }
        }
        out.push(BranchInfo {
            type_name: branch_name.clone(),
            table,
            own_fields,
            discriminator_value: branch.discriminator_value.clone(),
        });
    }
    Ok(out)
}

/// Validate everything reachable from `root` as an entity graph: targets
/// exist, entities carry exactly one id, embedded targets are plain value
/// types, link fields are well-shaped, and the graph is acyclic. Runs before
/// planning; a model that fails here never produces SQL.
pub fn validate_root(registry: &ModelRegistry, root: &str) -> Result<(), ModelError> {
    let mut stack: Vec<(String, String)> = Vec::new();
    validate_entity(registry, root, root, &mut stack)
}

fn validate_entity(
    registry: &ModelRegistry,
    type_name: &str,
    path: &str,
    stack: &mut Vec<(String, String)>,
) -> Result<(), ModelError> {
    if stack.iter().any(|(t, _)| t == type_name) {
        let mut cycle: Vec<&str> = stack.iter().map(|(_, p)| p.as_str()).collect();
        cycle.push(path);
        return Err(ModelError::Cycle {
            path: cycle.join(" -> "),
        });
    }
    stack.push((type_name.to_string(), path.to_string()));
    log::trace!("validating entity `{}` at `{}`", type_name, path);

    table_chain(registry, type_name)?;
    id_field(registry, type_name)?;

    let record = registry.get(type_name)?;
    for branch in branches(registry, record)? {
        if branch.table.is_some() {
            let branch_path = format!("{}.{}", path, branch.type_name);
            // Branch entities share the parent's id, so only their relations
            // need the recursive walk.
            validate_fields(registry, &branch.type_name, &branch.own_fields, &branch_path, stack)?;
        }
    }

    let fields = flattened_fields(registry, type_name)?;
    validate_fields(registry, type_name, &fields, path, stack)?;

    stack.pop();
    Ok(())
}

fn validate_fields(
    registry: &ModelRegistry,
    type_name: &str,
    fields: &[FieldDef],
    path: &str,
    stack: &mut Vec<(String, String)>,
) -> Result<(), ModelError> {
    for field in fields {
        let field_path = format!("{}.{}", path, field.name);
        match &field.kind {
            FieldKind::Embedded { target, .. } => {
                validate_embedded(registry, type_name, &field.name, target)?;
            }
            FieldKind::ToOne { target, .. } | FieldKind::ToMany { target, .. } => {
                require_target(registry, type_name, &field.name, target)?;
                validate_entity(registry, target, &field_path, stack)?;
            }
            FieldKind::LinkMany {
                target: Some(target),
                fetch_column: None,
                ..
            } => {
                require_target(registry, type_name, &field.name, target)?;
                validate_entity(registry, target, &field_path, stack)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn require_target(
    registry: &ModelRegistry,
    type_name: &str,
    field: &str,
    target: &str,
) -> Result<(), ModelError> {
    if !registry.contains(target) {
        return Err(ModelError::UnknownTarget {
            type_name: type_name.to_string(),
            field: field.to_string(),
            target: target.to_string(),
        });
    }
    Ok(())
}

fn validate_embedded(
    registry: &ModelRegistry,
    type_name: &str,
    field: &str,
    target: &str,
) -> Result<(), ModelError> {
    require_target(registry, type_name, field, target)?;
    let record = registry.get(target)?;
    if record.has_table() {
        return Err(ModelError::EmbeddedEntity {
            type_name: type_name.to_string(),
            field: field.to_string(),
            target: target.to_string(),
        });
    }
    for nested in &record.fields {
        match &nested.kind {
            FieldKind::Scalar(_) => {}
            FieldKind::Embedded { target: inner, .. } => {
                validate_embedded(registry, target, &nested.name, inner)?;
            }
            _ => {
                return Err(ModelError::EmbeddedRelation {
                    target: target.to_string(),
                    field: nested.name.clone(),
                });
            }
        }
    }
    Ok(())
}
