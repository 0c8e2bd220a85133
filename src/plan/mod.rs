//! Query plan value types.
//!
//! A [`QueryPlan`] is the immutable compilation product of one root record
//! type: the alias graph, the join list, and the projection list with their
//! result-column keys. Plans carry no dialect decisions and no user
//! fragments; they can be cached and shared freely between threads.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::model::{ColumnType, ContainerKind, TableRef};

pub mod builder;

pub use builder::build_query_plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    /// Superclass-table rows must exist; anything else is data corruption.
    Inner,
    /// Relations and subclass branches may be absent.
    Left,
}

/// How a join's ON clause is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinCondition {
    /// `left_alias.left_column = right_alias.right_column`, fully quoted at
    /// emission time.
    Equi {
        left_alias: String,
        left_column: String,
        right_alias: String,
        right_column: String,
    },
    /// A user-supplied fragment in the `{alias}` token language, resolved in
    /// `scope_alias` (with `{linktable}` bound when the edge has one).
    Fragment {
        text: String,
        scope_alias: String,
        link_table: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub kind: JoinKind,
    pub table: TableRef,
    pub alias: String,
    pub condition: JoinCondition,
}

/// The role an alias plays in the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasKind {
    Root,
    ToOne,
    ToMany,
    /// Junction table of a many-to-many edge; never materialised.
    LinkTable,
    /// A link edge collapsed to plain values through a fetch column.
    LinkedValue,
    /// Inlined value object; presence decided by its cells, no identity.
    Embedded,
    /// Inherited table of a multi-table chain; its cells belong to the
    /// owning entity alias.
    SuperTable,
    /// Subclass branch; its cells merge into the parent entity when the
    /// branch wins discrimination.
    SubclassBranch,
}

/// One subclass branch attached to a branched alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPlan {
    pub type_name: String,
    /// The branch's alias path.
    pub alias: String,
    /// Result key of the branch-table id; `None` for single-table branches,
    /// which are chosen by discriminator instead.
    pub id_key: Option<String>,
    pub discriminator_value: Option<String>,
}

/// One node of the alias graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasNode {
    /// Dotted path; the root alias equals the root table name.
    pub path: String,
    /// Record type materialised here; empty for link tables and super
    /// tables, the value type's enum name for linked values.
    pub type_name: String,
    pub parent: Option<String>,
    /// Field on the parent entity receiving this alias's output.
    pub link_field: Option<String>,
    pub kind: AliasKind,
    pub container: Option<ContainerKind>,
    /// Result keys whose cells form this alias's identity on a row.
    pub id_keys: Vec<String>,
    /// Result key of the discriminator cell when this alias has
    /// single-table branches.
    pub discriminator_key: Option<String>,
    pub branches: Vec<BranchPlan>,
    /// Field receiving unmapped cells at this alias.
    pub other_bag_field: Option<String>,
    /// Coercion target for linked values.
    pub value_type: Option<ColumnType>,
}

/// Where a projected column comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectionSource {
    Column { alias: String, column: String },
    /// Computed field: a fragment in the token language, resolved in
    /// `scope_alias`.
    Expression { text: String, scope_alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    pub source: ProjectionSource,
    /// The result-column name, always `"alias.field"`.
    pub result_key: String,
    /// Alias whose materialised object receives the value. May differ from
    /// the SQL-side alias for super tables and subclass branches.
    pub target_alias: String,
    /// Receiving field; `None` for service projections (discriminators).
    pub target_field: Option<String>,
    pub mapper: Option<ColumnType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub root_type: String,
    pub root_table: TableRef,
    pub root_alias: String,
    /// Insertion-ordered: parents always precede their children.
    pub aliases: Vec<AliasNode>,
    pub joins: Vec<JoinEdge>,
    pub projections: Vec<ProjectionEntry>,
    /// `(alias, column)` pairs contributed by group-by fields.
    pub group_by: Vec<(String, String)>,
    /// The root id column on the concrete root table, for count and id-list
    /// projections.
    pub root_id_column: (String, String),
}

impl QueryPlan {
    pub fn alias(&self, path: &str) -> Option<&AliasNode> {
        self.aliases.iter().find(|a| a.path == path)
    }

    pub fn root(&self) -> &AliasNode {
        // The planner always inserts the root first.
        &self.aliases[0]
    }

    /// Result keys forming the root identity.
    pub fn root_id_keys(&self) -> &[String] {
        &self.root().id_keys
    }

    /// Every alias path a fragment may legally reference.
    pub fn alias_set(&self) -> HashSet<String> {
        self.aliases.iter().map(|a| a.path.clone()).collect()
    }

    /// Projections whose values belong to `alias`'s object.
    pub fn projections_for<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a ProjectionEntry> {
        self.projections
            .iter()
            .filter(move |p| p.target_alias == alias)
    }

    /// Children of `alias` in the alias graph.
    pub fn children_of<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a AliasNode> {
        self.aliases
            .iter()
            .filter(move |a| a.parent.as_deref() == Some(alias))
    }

    /// Map from result key to projection entry, for reducers and tests.
    pub fn projection_index(&self) -> HashMap<&str, &ProjectionEntry> {
        self.projections
            .iter()
            .map(|p| (p.result_key.as_str(), p))
            .collect()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- QueryPlan for {} ----", self.root_type)?;
        writeln!(f, "root: {} AS {}", self.root_table.name, self.root_alias)?;
        for join in &self.joins {
            writeln!(f, "join: {:?} {} AS {}", join.kind, join.table.name, join.alias)?;
        }
        for p in &self.projections {
            writeln!(f, "select: {:?} AS {}", p.source, p.result_key)?;
        }
        writeln!(f, "--------------------------")
    }
}
