//! Result-set reduction.
//!
//! Folds the rectangular row output of a planned query back into the object
//! graph the model describes. Every row is a flat mapping from
//! `"alias.field"` keys to cells; the reducer walks the plan's alias graph,
//! deduplicates per alias identity, resolves subclass branches, inlines
//! embedded objects and assembles containers.
//!
//! Entities are built as JSON object trees. A child shared by several
//! parents is built once and attached to each of them; within one reduction
//! two rows carrying the same `(alias, id tuple)` always resolve to the same
//! object. Nothing survives across reductions: the identity map is scoped to
//! a single call.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub mod coerce;
pub mod errors;
pub mod streaming;

pub use errors::MappingError;

use crate::model::ContainerKind;
use crate::plan::{AliasKind, AliasNode, ProjectionEntry, QueryPlan};

/// One result row: column name to cell value, as delivered by the row
/// source. Column names are matched case-insensitively as a fallback for
/// drivers that fold case.
pub type Row = Map<String, Value>;

/// Reduce `rows` into root entities, in order of first appearance of each
/// root identity.
pub fn reduce_rows<I>(plan: &QueryPlan, rows: I) -> Result<Vec<Value>, MappingError>
where
    I: IntoIterator<Item = Row>,
{
    let mut reduction = Reduction::new(plan);
    for row in rows {
        reduction.process_row(&row)?;
    }
    Ok(reduction.materialize_roots())
}

/// Case-tolerant cell lookup: exact key first, then a case-insensitive scan.
pub(crate) fn lookup<'r>(row: &'r Row, key: &str) -> Option<&'r Value> {
    row.get(key)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
}

/// Container state of one link field on one parent entity. The declared
/// container kind decides the dedup rule: lists dedup by identity, sets
/// additionally by record value at materialisation, arrays grow by one with
/// no dedup at all.
enum LinkSlot {
    Single(Option<usize>),
    Many {
        container: ContainerKind,
        order: Vec<usize>,
        seen: HashSet<usize>,
    },
    Values {
        order: Vec<Value>,
        seen: HashSet<String>,
    },
}

/// The in-flight state of one reduction.
pub struct Reduction<'p> {
    plan: &'p QueryPlan,
    /// Projection indexes grouped by target alias.
    by_alias: Vec<Vec<usize>>,
    /// Child alias indexes per alias.
    children: Vec<Vec<usize>>,
    /// Nearest entity-bearing ancestor per alias.
    entity_parent: Vec<Option<usize>>,
    /// Every planned result key, for other-bag exclusion.
    planned_keys: HashSet<String>,
    /// Entities under construction.
    slots: Vec<Map<String, Value>>,
    /// Link state per slot, keyed by field name.
    links: Vec<HashMap<String, LinkSlot>>,
    /// `(alias index, id tuple)` to slot.
    identities: HashMap<(usize, String), usize>,
    /// Root slots in first-seen order.
    roots: Vec<usize>,
}

impl<'p> Reduction<'p> {
    pub fn new(plan: &'p QueryPlan) -> Self {
        let index_of: HashMap<&str, usize> = plan
            .aliases
            .iter()
            .enumerate()
            .map(|(i, a)| (a.path.as_str(), i))
            .collect();
        let mut by_alias = vec![Vec::new(); plan.aliases.len()];
        for (pi, projection) in plan.projections.iter().enumerate() {
            if let Some(&ai) = index_of.get(projection.target_alias.as_str()) {
                by_alias[ai].push(pi);
            }
        }
        let mut children = vec![Vec::new(); plan.aliases.len()];
        for (ai, alias) in plan.aliases.iter().enumerate() {
            if let Some(parent) = alias.parent.as_deref() {
                if let Some(&pi) = index_of.get(parent) {
                    children[pi].push(ai);
                }
            }
        }
        let entity_parent = plan
            .aliases
            .iter()
            .map(|alias| {
                let mut current = alias.parent.as_deref();
                while let Some(path) = current {
                    let i = index_of[path];
                    let node = &plan.aliases[i];
                    if is_entity_kind(node.kind) {
                        return Some(i);
                    }
                    current = node.parent.as_deref();
                }
                None
            })
            .collect();
        let planned_keys = plan
            .projections
            .iter()
            .map(|p| p.result_key.clone())
            .collect();
        Reduction {
            plan,
            by_alias,
            children,
            entity_parent,
            planned_keys,
            slots: Vec::new(),
            links: Vec::new(),
            identities: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// Fold one row into the graph. Returns the root slot present on this
    /// row, with its identity tuple, or `None` when the row carries no root.
    pub fn process_row(&mut self, row: &Row) -> Result<Option<(usize, String)>, MappingError> {
        let mut row_slots: HashMap<usize, usize> = HashMap::new();
        let mut root: Option<(usize, String)> = None;

        for ai in 0..self.plan.aliases.len() {
            let alias = &self.plan.aliases[ai];
            match alias.kind {
                AliasKind::Root | AliasKind::ToOne | AliasKind::ToMany => {
                    if let Some((slot, identity)) = self.process_entity(ai, row)? {
                        row_slots.insert(ai, slot);
                        if alias.kind == AliasKind::Root {
                            root = Some((slot, identity));
                        } else {
                            self.attach(ai, slot, &row_slots)?;
                        }
                    }
                }
                AliasKind::LinkedValue => {
                    self.process_linked_value(ai, row, &row_slots)?;
                }
                // Super tables, link tables, embedded objects and subclass
                // branches are folded in while their entity alias builds.
                _ => {}
            }
        }
        Ok(root)
    }

    /// Materialize all roots, first-seen order.
    pub fn materialize_roots(&self) -> Vec<Value> {
        self.roots.iter().map(|&slot| self.materialize(slot)).collect()
    }

    pub fn materialize(&self, slot: usize) -> Value {
        let mut object = self.slots[slot].clone();
        for (field, link) in &self.links[slot] {
            let value = match link {
                LinkSlot::Single(Some(child)) => self.materialize(*child),
                LinkSlot::Single(None) => Value::Null,
                LinkSlot::Many { container, order, .. } => {
                    let mut children: Vec<Value> =
                        order.iter().map(|&c| self.materialize(c)).collect();
                    if *container == ContainerKind::Set {
                        // value-based equality on the whole record, first
                        // occurrence wins
                        let mut seen = HashSet::new();
                        children.retain(|child| seen.insert(child.to_string()));
                    }
                    Value::Array(children)
                }
                LinkSlot::Values { order, .. } => Value::Array(order.clone()),
            };
            object.insert(field.clone(), value);
        }
        Value::Object(object)
    }

    fn process_entity(
        &mut self,
        ai: usize,
        row: &Row,
    ) -> Result<Option<(usize, String)>, MappingError> {
        let alias = &self.plan.aliases[ai];

        // Per-alias null check over the alias's own cells.
        let mut any_present = false;
        let mut any_non_null = false;
        for &pi in &self.by_alias[ai] {
            let key = &self.plan.projections[pi].result_key;
            if let Some(v) = lookup(row, key) {
                any_present = true;
                if !v.is_null() {
                    any_non_null = true;
                }
            }
        }
        if !any_present || !any_non_null {
            return Ok(None);
        }

        // Identity: the tuple of id cells. A missing id column while other
        // cells are present is a mapping error; a null id means the LEFT
        // JOIN found nothing.
        let mut id_values = Vec::with_capacity(alias.id_keys.len());
        for key in &alias.id_keys {
            match lookup(row, key) {
                None => {
                    return Err(MappingError::MissingColumn {
                        column: key.clone(),
                        alias: alias.path.clone(),
                    })
                }
                Some(Value::Null) => return Ok(None),
                Some(v) => id_values.push(v.clone()),
            }
        }
        let identity = Value::Array(id_values).to_string();

        if let Some(&slot) = self.identities.get(&(ai, identity.clone())) {
            return Ok(Some((slot, identity)));
        }

        let slot = self.create_entity(ai, row)?;
        self.identities.insert((ai, identity.clone()), slot);
        if self.plan.aliases[ai].kind == AliasKind::Root {
            self.roots.push(slot);
        }
        Ok(Some((slot, identity)))
    }

    fn create_entity(&mut self, ai: usize, row: &Row) -> Result<usize, MappingError> {
        let alias = &self.plan.aliases[ai];
        let mut object = Map::new();

        let winning_branch = self.resolve_branch(alias, row)?;
        if !alias.branches.is_empty() {
            let type_name = winning_branch
                .map(|bi| alias.branches[bi].type_name.clone())
                .unwrap_or_else(|| alias.type_name.clone());
            object.insert("_type".to_string(), Value::String(type_name));
        }

        self.apply_fields(ai, row, &mut object)?;
        let mut owner_aliases = vec![ai];
        if let Some(bi) = winning_branch {
            let branch_path = self.plan.aliases[ai].branches[bi].alias.clone();
            if let Some(bai) = self.alias_index(&branch_path) {
                self.apply_fields(bai, row, &mut object)?;
                owner_aliases.push(bai);
            }
        }

        // Embedded children and relation placeholders, in alias order so the
        // final object shape is stable.
        let mut link_fields: HashMap<String, LinkSlot> = HashMap::new();
        for owner in owner_aliases {
            let child_indexes = self.children[owner].clone();
            for ci in child_indexes {
                let child = &self.plan.aliases[ci];
                match child.kind {
                    AliasKind::Embedded => {
                        let field = child.link_field.clone().expect("embedded aliases link a field");
                        let value = self.build_embedded(ci, row)?;
                        object.insert(field, value);
                    }
                    AliasKind::ToOne => {
                        let field = child.link_field.clone().expect("relations link a field");
                        object.insert(field.clone(), Value::Null);
                        link_fields.insert(field, LinkSlot::Single(None));
                    }
                    AliasKind::ToMany | AliasKind::LinkedValue => {
                        let field = child.link_field.clone().expect("relations link a field");
                        object.insert(field.clone(), Value::Array(Vec::new()));
                        let slot = if child.kind == AliasKind::LinkedValue {
                            LinkSlot::Values {
                                order: Vec::new(),
                                seen: HashSet::new(),
                            }
                        } else {
                            LinkSlot::Many {
                                container: child.container.unwrap_or_default(),
                                order: Vec::new(),
                                seen: HashSet::new(),
                            }
                        };
                        link_fields.insert(field, slot);
                    }
                    _ => {}
                }
            }
        }

        let alias = &self.plan.aliases[ai];
        if let Some(ref bag_field) = alias.other_bag_field {
            let bag = self.collect_other_bag(&alias.path, row);
            object.insert(bag_field.clone(), Value::Object(bag));
        }

        self.slots.push(object);
        self.links.push(link_fields);
        Ok(self.slots.len() - 1)
    }

    /// Pick the subclass branch for this row: the branch whose table id is
    /// non-null (table-per-subclass), or the one matching the discriminator
    /// cell (single-table). `None` keeps the declared type.
    fn resolve_branch(
        &self,
        alias: &AliasNode,
        row: &Row,
    ) -> Result<Option<usize>, MappingError> {
        if alias.branches.is_empty() {
            return Ok(None);
        }
        let discriminator = alias
            .discriminator_key
            .as_deref()
            .and_then(|key| lookup(row, key))
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        let mut winner = None;
        for (bi, branch) in alias.branches.iter().enumerate() {
            let matched = match &branch.id_key {
                Some(id_key) => lookup(row, id_key).map(|v| !v.is_null()).unwrap_or(false),
                None => {
                    branch.discriminator_value.is_some()
                        && branch.discriminator_value.as_deref() == discriminator.as_deref()
                }
            };
            if matched {
                if winner.is_some() {
                    log::warn!(
                        "alias `{}`: more than one subclass branch matched on one row; keeping the first",
                        alias.path
                    );
                } else {
                    winner = Some(bi);
                }
            }
        }
        Ok(winner)
    }

    /// Apply the scalar and computed cells targeted at `ai` to `object`.
    fn apply_fields(
        &self,
        ai: usize,
        row: &Row,
        object: &mut Map<String, Value>,
    ) -> Result<(), MappingError> {
        for &pi in &self.by_alias[ai] {
            let projection: &ProjectionEntry = &self.plan.projections[pi];
            let Some(ref field) = projection.target_field else {
                continue; // service projections: discriminators, branch ids
            };
            let cell = lookup(row, &projection.result_key)
                .cloned()
                .unwrap_or(Value::Null);
            let value = match &projection.mapper {
                Some(column_type) => coerce::coerce(&cell, column_type, &projection.result_key)?,
                None => cell,
            };
            object.insert(field.clone(), value);
        }
        Ok(())
    }

    /// Build an embedded sub-object; all-null cells (including every nested
    /// embedded) mean the object is absent.
    fn build_embedded(&self, ai: usize, row: &Row) -> Result<Value, MappingError> {
        let mut object = Map::new();
        let mut any_non_null = false;
        self.apply_fields(ai, row, &mut object)?;
        if object.values().any(|v| !v.is_null()) {
            any_non_null = true;
        }
        for &ci in &self.children[ai] {
            let child = &self.plan.aliases[ci];
            if child.kind != AliasKind::Embedded {
                continue;
            }
            let field = child.link_field.clone().expect("embedded aliases link a field");
            let nested = self.build_embedded(ci, row)?;
            if !nested.is_null() {
                any_non_null = true;
            }
            object.insert(field, nested);
        }
        if any_non_null {
            Ok(Value::Object(object))
        } else {
            Ok(Value::Null)
        }
    }

    fn collect_other_bag(&self, alias_path: &str, row: &Row) -> Map<String, Value> {
        let prefix = format!("{}.", alias_path);
        let mut bag = Map::new();
        for (key, value) in row.iter() {
            if self.planned_keys.contains(key) {
                continue;
            }
            if let Some(rest) = key.strip_prefix(&prefix) {
                bag.insert(rest.to_string(), value.clone());
            }
        }
        bag
    }

    /// Attach the entity in `slot` to its parent's link field.
    fn attach(
        &mut self,
        ai: usize,
        slot: usize,
        row_slots: &HashMap<usize, usize>,
    ) -> Result<(), MappingError> {
        let alias = &self.plan.aliases[ai];
        let parent_ai = self.entity_parent[ai].ok_or_else(|| MappingError::MissingParent {
            alias: alias.path.clone(),
        })?;
        let &parent_slot = row_slots
            .get(&parent_ai)
            .ok_or_else(|| MappingError::MissingParent {
                alias: alias.path.clone(),
            })?;
        let field = alias.link_field.clone().expect("relations link a field");

        let link = self.links[parent_slot]
            .entry(field)
            .or_insert_with(|| match alias.kind {
                AliasKind::ToOne => LinkSlot::Single(None),
                _ => LinkSlot::Many {
                    container: alias.container.unwrap_or_default(),
                    order: Vec::new(),
                    seen: HashSet::new(),
                },
            });
        match link {
            LinkSlot::Single(current) => {
                // idempotent: the same identity resolves to the same slot
                if current.is_none() {
                    *current = Some(slot);
                }
            }
            LinkSlot::Many {
                container,
                order,
                seen,
            } => match container {
                // arrays grow by one per row, duplicates and all
                ContainerKind::Array => order.push(slot),
                ContainerKind::List | ContainerKind::Set => {
                    if seen.insert(slot) {
                        order.push(slot);
                    }
                }
            },
            LinkSlot::Values { .. } => unreachable!("entities never attach to a value link"),
        }
        Ok(())
    }

    fn process_linked_value(
        &mut self,
        ai: usize,
        row: &Row,
        row_slots: &HashMap<usize, usize>,
    ) -> Result<(), MappingError> {
        let alias = &self.plan.aliases[ai];
        let Some(&pi) = self.by_alias[ai].first() else {
            return Ok(());
        };
        let projection = &self.plan.projections[pi];
        let Some(cell) = lookup(row, &projection.result_key) else {
            return Ok(());
        };
        if cell.is_null() {
            return Ok(());
        }
        let value = match &projection.mapper {
            Some(column_type) => coerce::coerce(cell, column_type, &projection.result_key)?,
            None => cell.clone(),
        };

        let parent_ai = self.entity_parent[ai].ok_or_else(|| MappingError::MissingParent {
            alias: alias.path.clone(),
        })?;
        let &parent_slot = row_slots
            .get(&parent_ai)
            .ok_or_else(|| MappingError::MissingParent {
                alias: alias.path.clone(),
            })?;
        let field = alias.link_field.clone().expect("linked values link a field");
        let link = self.links[parent_slot]
            .entry(field)
            .or_insert_with(|| LinkSlot::Values {
                order: Vec::new(),
                seen: HashSet::new(),
            });
        if let LinkSlot::Values { order, seen } = link {
            // row multiplication makes duplicates indistinguishable from
            // genuine ones; value identity wins
            if seen.insert(value.to_string()) {
                order.push(value);
            }
        }
        Ok(())
    }

    fn alias_index(&self, path: &str) -> Option<usize> {
        self.plan.aliases.iter().position(|a| a.path == path)
    }
}

fn is_entity_kind(kind: AliasKind) -> bool {
    matches!(kind, AliasKind::Root | AliasKind::ToOne | AliasKind::ToMany)
}
