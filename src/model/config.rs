//! Declarative model configuration.
//!
//! Record types can be described in a YAML sidecar instead of the builder
//! API. The file shape:
//!
//! ```yaml
//! types:
//!   - name: Article
//!     table: article
//!     fields:
//!       - name: id
//!         type: long
//!         id: true
//!       - name: title
//!         type: varchar(255)
//!       - name: author
//!         to_one: User
//!       - name: comments
//!         to_many: Comment
//!   - name: User
//!     table: user
//!     fields:
//!       - name: id
//!         type: long
//!         id: true
//!       - name: roles
//!         link_table: user_roles
//!         fetch_column: element
//!         value_type: "enum(Role: ADMIN|AGENT)"
//!         container: set
//! ```
//!
//! Field definitions are classified in the same order as the builder:
//! `link_table` wins over `to_many`, `embedded` wins over `to_one`,
//! `computed` fields never persist. `transient: true` drops the field
//! entirely.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::model::{
    ColumnType, ContainerKind, FieldDef, FieldKind, ModelError, ModelRegistry, RecordType, TableRef,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub types: Vec<TypeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub subclasses: Vec<String>,
    #[serde(default)]
    pub discriminator_column: Option<String>,
    #[serde(default)]
    pub discriminator_value: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    /// Scalar column type, e.g. `long`, `varchar(255)`, `decimal(10,2)`,
    /// `enum(Role: ADMIN|AGENT)`.
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub id: bool,
    #[serde(default)]
    pub transient: bool,
    #[serde(default)]
    pub no_update: bool,
    #[serde(default)]
    pub lob: bool,
    #[serde(default)]
    pub group_by: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub computed: Option<String>,
    #[serde(default)]
    pub embedded: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub to_one: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub to_many: Option<String>,
    #[serde(default)]
    pub inverse_key: Option<String>,
    #[serde(default)]
    pub link_table: Option<String>,
    #[serde(default)]
    pub link_target: Option<String>,
    #[serde(default)]
    pub left_column: Option<String>,
    #[serde(default)]
    pub right_column: Option<String>,
    #[serde(default)]
    pub fetch_column: Option<String>,
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub join_condition: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerKind>,
    #[serde(default)]
    pub other: bool,
}

fn default_true() -> bool {
    true
}

impl ModelConfig {
    pub fn from_yaml(text: &str) -> Result<ModelConfig, ModelError> {
        serde_yaml::from_str(text).map_err(|e| ModelError::InvalidConfig {
            message: e.to_string(),
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<ModelConfig, ModelError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| ModelError::InvalidConfig {
            message: format!("failed to read {}: {}", path.as_ref().display(), e),
        })?;
        ModelConfig::from_yaml(&text)
    }

    /// Convert and register every type in declaration order.
    pub fn register_into(&self, registry: &mut ModelRegistry) -> Result<(), ModelError> {
        for def in &self.types {
            registry.register(def.to_record_type()?)?;
        }
        Ok(())
    }

    pub fn to_registry(&self) -> Result<ModelRegistry, ModelError> {
        let mut registry = ModelRegistry::new();
        self.register_into(&mut registry)?;
        Ok(registry)
    }
}

impl TypeDefinition {
    pub fn to_record_type(&self) -> Result<RecordType, ModelError> {
        let table = match (&self.table, &self.schema) {
            (Some(t), Some(s)) => Some(TableRef::with_schema(t.clone(), s.clone())),
            (Some(t), None) => Some(TableRef::new(t.clone())),
            (None, Some(_)) => {
                return Err(ModelError::InvalidConfig {
                    message: format!("type `{}` declares a schema but no table", self.name),
                })
            }
            (None, None) => None,
        };
        let mut fields = Vec::new();
        for fd in &self.fields {
            if fd.transient {
                continue;
            }
            fields.push(fd.to_field(&self.name)?);
        }
        Ok(RecordType {
            name: self.name.clone(),
            table,
            parent: self.parent.clone(),
            fields,
            subclasses: self.subclasses.clone(),
            discriminator_column: self.discriminator_column.clone(),
            discriminator_value: self.discriminator_value.clone(),
            version_field: self.version.clone(),
        })
    }
}

impl FieldDefinition {
    /// Ordered classification, most specific marker first.
    fn to_field(&self, type_name: &str) -> Result<FieldDef, ModelError> {
        let kind = if self.other {
            FieldKind::OtherBag
        } else if let Some(ref link_table) = self.link_table {
            FieldKind::LinkMany {
                target: self.link_target.clone(),
                link_table: link_table.clone(),
                container: self.container.unwrap_or_default(),
                left_column: self.left_column.clone(),
                right_column: self.right_column.clone(),
                fetch_column: self.fetch_column.clone(),
                value_type: self
                    .value_type
                    .as_deref()
                    .map(parse_column_type)
                    .transpose()?,
                join_condition: self.join_condition.clone(),
            }
        } else if let Some(ref target) = self.embedded {
            FieldKind::Embedded {
                target: target.clone(),
                prefix: self
                    .prefix
                    .clone()
                    .unwrap_or_else(|| format!("{}_", self.name)),
            }
        } else if let Some(ref target) = self.to_many {
            FieldKind::ToMany {
                target: target.clone(),
                container: self.container.unwrap_or_default(),
                inverse_key: self.inverse_key.clone(),
                join_condition: self.join_condition.clone(),
            }
        } else if let Some(ref target) = self.to_one {
            FieldKind::ToOne {
                target: target.clone(),
                foreign_key: self.foreign_key.clone(),
                join_condition: self.join_condition.clone(),
            }
        } else if let Some(ref expression) = self.computed {
            FieldKind::Computed(expression.clone())
        } else if let Some(ref ty) = self.column_type {
            FieldKind::Scalar(parse_column_type(ty)?)
        } else {
            return Err(ModelError::InvalidConfig {
                message: format!(
                    "field `{}.{}` declares neither a type nor a relation",
                    type_name, self.name
                ),
            });
        };
        Ok(FieldDef {
            name: self.name.clone(),
            column: self.column.clone(),
            kind,
            is_id: self.id,
            no_update: self.no_update,
            lob: self.lob,
            group_by: self.group_by,
            nullable: self.nullable,
            unique: self.unique,
        })
    }
}

/// Parse the textual column type vocabulary. Aliases are accepted
/// case-insensitively: `bool`, `integer`, `bigint`, `string(n)`,
/// `clob`, `blob`, `datetime`.
pub fn parse_column_type(text: &str) -> Result<ColumnType, ModelError> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let simple = match lower.as_str() {
        "boolean" | "bool" => Some(ColumnType::Boolean),
        "smallint" => Some(ColumnType::SmallInt),
        "int" | "integer" => Some(ColumnType::Int),
        "long" | "bigint" => Some(ColumnType::Long),
        "float" => Some(ColumnType::Float),
        "double" => Some(ColumnType::Double),
        "text" | "clob" => Some(ColumnType::Text),
        "bytes" | "blob" => Some(ColumnType::Bytes),
        "date" => Some(ColumnType::Date),
        "time" => Some(ColumnType::Time),
        "timestamp" | "datetime" => Some(ColumnType::Timestamp),
        _ => None,
    };
    if let Some(t) = simple {
        return Ok(t);
    }

    let invalid = || ModelError::InvalidConfig {
        message: format!("unrecognised column type `{}`", trimmed),
    };
    let args = |prefix: &str| -> Option<&str> {
        lower
            .strip_prefix(prefix)?
            .strip_prefix('(')?
            .strip_suffix(')')
    };

    if let Some(len) = args("varchar").or_else(|| args("string")) {
        let len: u32 = len.trim().parse().map_err(|_| invalid())?;
        return Ok(ColumnType::VarChar(len));
    }
    if let Some(ps) = args("decimal") {
        let mut parts = ps.split(',');
        let precision: u8 = parts
            .next()
            .ok_or_else(invalid)?
            .trim()
            .parse()
            .map_err(|_| invalid())?;
        let scale: u8 = parts
            .next()
            .ok_or_else(invalid)?
            .trim()
            .parse()
            .map_err(|_| invalid())?;
        return Ok(ColumnType::Decimal { precision, scale });
    }
    // enum(Name: V1|V2) keeps the original casing of name and variants.
    if lower.starts_with("enum(") && trimmed.ends_with(')') {
        let body = &trimmed["enum(".len()..trimmed.len() - 1];
        let (name, variants) = body.split_once(':').ok_or_else(invalid)?;
        let variants: Vec<String> = variants
            .split('|')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        return Ok(ColumnType::Enum {
            name: name.trim().to_string(),
            variants,
        });
    }
    Err(invalid())
}
