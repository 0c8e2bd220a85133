//! Record type descriptors and operations
//!
//! A [`RecordType`] is the declarative description of one user record: the
//! table it maps to, its fields, its place in an inheritance hierarchy. Types
//! are collected in a [`ModelRegistry`](registry::ModelRegistry) and consumed
//! by the analyzer and the alias planner; nothing in this module touches SQL.
//!
//! Descriptors are built either through [`RecordType::build`] or loaded from
//! a YAML sidecar (see [`config`]).

use serde::{Deserialize, Serialize};

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod registry;

pub use errors::ModelError;
pub use registry::ModelRegistry;

/// A table reference, optionally schema-qualified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            name: name.into(),
            schema: None,
        }
    }

    pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
        TableRef {
            name: name.into(),
            schema: Some(schema.into()),
        }
    }

    /// Identifier segments in quoting order.
    pub fn parts(&self) -> Vec<&str> {
        match &self.schema {
            Some(s) => vec![s.as_str(), self.name.as_str()],
            None => vec![self.name.as_str()],
        }
    }
}

/// Abstract column types, mapped to concrete SQL types by the dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Int,
    Long,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    VarChar(u32),
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    Enum { name: String, variants: Vec<String> },
}

impl ColumnType {
    /// Whether `self` can hold every value of `narrower` without loss.
    /// Drives the migration differ: only widenings are ever emitted.
    pub fn widens(&self, narrower: &ColumnType) -> bool {
        use ColumnType::*;
        match (self, narrower) {
            (a, b) if a == b => false,
            (Int, SmallInt) => true,
            (Long, SmallInt) | (Long, Int) => true,
            (Double, Float) => true,
            (VarChar(a), VarChar(b)) => a > b,
            (Text, VarChar(_)) => true,
            _ => false,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, ColumnType::SmallInt | ColumnType::Int | ColumnType::Long)
    }
}

/// Container shape of a to-many field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Ordered, first-seen order preserved.
    #[default]
    List,
    /// Unordered, value-deduplicated.
    Set,
    /// Fixed-shape array, grown one element at a time.
    Array,
}

/// Field classification. The variants mirror the relation vocabulary of the
/// query compiler; classification order matters and is enforced by the
/// builder (an explicit link table wins over a generic to-many, an explicit
/// join condition wins over convention, embedded wins over to-one).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A plain column on the declaring table.
    Scalar(ColumnType),
    /// A user-provided SQL fragment projected alongside the scalars.
    /// Alias references use the `{alias}` token language; `{this}` is the
    /// owning alias. Never persisted by the mutator.
    Computed(String),
    /// Nested value object inlined into the declaring table with a column
    /// prefix (`prefix_subfield`).
    Embedded { target: String, prefix: String },
    /// Reference to another entity through a foreign key on the declaring
    /// table. Default key is `<field>_id`.
    ToOne {
        target: String,
        #[serde(default)]
        foreign_key: Option<String>,
        #[serde(default)]
        join_condition: Option<String>,
    },
    /// Collection of child entities keyed back to this table. Default
    /// inverse key is `<parent_table>_id` on the child table.
    ToMany {
        target: String,
        #[serde(default)]
        container: ContainerKind,
        #[serde(default)]
        inverse_key: Option<String>,
        #[serde(default)]
        join_condition: Option<String>,
    },
    /// Many-to-many through a junction table. When `fetch_column` is set the
    /// relation collapses to a sequence of plain values of `value_type`
    /// projected straight off the junction table.
    LinkMany {
        #[serde(default)]
        target: Option<String>,
        link_table: String,
        #[serde(default)]
        container: ContainerKind,
        #[serde(default)]
        left_column: Option<String>,
        #[serde(default)]
        right_column: Option<String>,
        #[serde(default)]
        fetch_column: Option<String>,
        #[serde(default)]
        value_type: Option<ColumnType>,
        #[serde(default)]
        join_condition: Option<String>,
    },
    /// Catch-all map receiving every projected column at the owning alias
    /// that no declared field maps. Keys keep their column spelling
    /// (embedded prefixes included); only the alias prefix is stripped.
    OtherBag,
}

/// One declared field of a record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Column name override; defaults to the field name.
    #[serde(default)]
    pub column: Option<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub is_id: bool,
    /// Skipped by UPDATE statements.
    #[serde(default)]
    pub no_update: bool,
    /// Large object; steers the dialect type mapping.
    #[serde(default)]
    pub lob: bool,
    /// Added to GROUP BY whenever the plan projects computed aggregates.
    #[serde(default)]
    pub group_by: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
}

fn default_nullable() -> bool {
    true
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>, column_type: ColumnType) -> Self {
        FieldDef {
            name: name.into(),
            column: None,
            kind: FieldKind::Scalar(column_type),
            is_id: false,
            no_update: false,
            lob: false,
            group_by: false,
            nullable: true,
            unique: false,
        }
    }

    pub fn with_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDef {
            name: name.into(),
            column: None,
            kind,
            is_id: false,
            no_update: false,
            lob: false,
            group_by: false,
            nullable: true,
            unique: false,
        }
    }

    /// The column this field maps to. Relations answer their foreign key
    /// column, computed and other-bag fields have none.
    pub fn column_name(&self) -> Option<String> {
        if let Some(ref c) = self.column {
            return Some(c.clone());
        }
        match &self.kind {
            FieldKind::Scalar(_) => Some(self.name.clone()),
            FieldKind::ToOne { foreign_key, .. } => Some(
                foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", self.name)),
            ),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar(_))
    }
}

/// Declarative description of one record type.
///
/// `parent` names the supertype; the chain of `table`-annotated ancestors
/// forms the table chain under multi-table inheritance. `subclasses` lists
/// branch types materialised by the reducer (table-per-subclass when the
/// branch declares its own table, single-table when it shares the parent's
/// and carries a `discriminator_value`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordType {
    pub name: String,
    #[serde(default)]
    pub table: Option<TableRef>,
    #[serde(default)]
    pub parent: Option<String>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub subclasses: Vec<String>,
    #[serde(default)]
    pub discriminator_column: Option<String>,
    #[serde(default)]
    pub discriminator_value: Option<String>,
    /// Optimistic-lock column; updates compare and bump it.
    #[serde(default)]
    pub version_field: Option<String>,
}

impl RecordType {
    pub fn build(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            inner: RecordType {
                name: name.into(),
                table: None,
                parent: None,
                fields: Vec::new(),
                subclasses: Vec::new(),
                discriminator_column: None,
                discriminator_value: None,
                version_field: None,
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.is_id).collect()
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }
}

/// Fluent construction of [`RecordType`] values. `add_`-style mutation is
/// intentionally absent; a descriptor is immutable once finished.
pub struct RecordTypeBuilder {
    inner: RecordType,
}

impl RecordTypeBuilder {
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.inner.table = Some(TableRef::new(name));
        self
    }

    pub fn table_in_schema(mut self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.inner.table = Some(TableRef::with_schema(name, schema));
        self
    }

    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.inner.parent = Some(name.into());
        self
    }

    pub fn subclasses(mut self, names: &[&str]) -> Self {
        self.inner.subclasses = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn discriminator(mut self, column: impl Into<String>) -> Self {
        self.inner.discriminator_column = Some(column.into());
        self
    }

    pub fn discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.inner.discriminator_value = Some(value.into());
        self
    }

    pub fn version(mut self, field: impl Into<String>) -> Self {
        self.inner.version_field = Some(field.into());
        self
    }

    /// Declare the id field. Integral ids are auto-generated on insert.
    pub fn id(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let mut f = FieldDef::scalar(name, column_type);
        f.is_id = true;
        f.nullable = false;
        self.inner.fields.push(f);
        self
    }

    pub fn scalar(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.inner.fields.push(FieldDef::scalar(name, column_type));
        self
    }

    pub fn scalar_in_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        let mut f = FieldDef::scalar(name, column_type);
        f.column = Some(column.into());
        self.inner.fields.push(f);
        self
    }

    pub fn computed(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.inner
            .fields
            .push(FieldDef::with_kind(name, FieldKind::Computed(expression.into())));
        self
    }

    pub fn embedded(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = format!("{}_", name);
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::Embedded {
                target: target.into(),
                prefix,
            },
        ));
        self
    }

    pub fn embedded_with_prefix(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::Embedded {
                target: target.into(),
                prefix: prefix.into(),
            },
        ));
        self
    }

    pub fn to_one(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::ToOne {
                target: target.into(),
                foreign_key: None,
                join_condition: None,
            },
        ));
        self
    }

    pub fn to_one_by(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::ToOne {
                target: target.into(),
                foreign_key: Some(foreign_key.into()),
                join_condition: None,
            },
        ));
        self
    }

    pub fn to_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::ToMany {
                target: target.into(),
                container: ContainerKind::List,
                inverse_key: None,
                join_condition: None,
            },
        ));
        self
    }

    pub fn to_many_in(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        container: ContainerKind,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::ToMany {
                target: target.into(),
                container,
                inverse_key: None,
                join_condition: None,
            },
        ));
        self
    }

    pub fn to_many_by(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse_key: impl Into<String>,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::ToMany {
                target: target.into(),
                container: ContainerKind::List,
                inverse_key: Some(inverse_key.into()),
                join_condition: None,
            },
        ));
        self
    }

    pub fn link_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        link_table: impl Into<String>,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::LinkMany {
                target: Some(target.into()),
                link_table: link_table.into(),
                container: ContainerKind::List,
                left_column: None,
                right_column: None,
                fetch_column: None,
                value_type: None,
                join_condition: None,
            },
        ));
        self
    }

    /// Many-to-many collapsed to a value sequence: only `fetch_column` is
    /// projected off the junction table and coerced to `value_type`.
    pub fn link_values(
        mut self,
        name: impl Into<String>,
        link_table: impl Into<String>,
        fetch_column: impl Into<String>,
        value_type: ColumnType,
        container: ContainerKind,
    ) -> Self {
        self.inner.fields.push(FieldDef::with_kind(
            name,
            FieldKind::LinkMany {
                target: None,
                link_table: link_table.into(),
                container,
                left_column: None,
                right_column: None,
                fetch_column: Some(fetch_column.into()),
                value_type: Some(value_type),
                join_condition: None,
            },
        ));
        self
    }

    pub fn other_bag(mut self, name: impl Into<String>) -> Self {
        self.inner
            .fields
            .push(FieldDef::with_kind(name, FieldKind::OtherBag));
        self
    }

    /// Push a fully configured field, for the attributes the shorthand
    /// methods do not cover (no_update, lob, group_by, nullable, unique,
    /// join conditions).
    pub fn field(mut self, field: FieldDef) -> Self {
        self.inner.fields.push(field);
        self
    }

    pub fn finish(self) -> RecordType {
        self.inner
    }
}
