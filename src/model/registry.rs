//! The model registry: every record type the compiler may reference,
//! keyed by type name, validated on registration.

use std::collections::HashMap;

use crate::model::{FieldKind, ModelError, RecordType};

/// Holds all registered record types. Registration order is preserved so
/// that downstream output (DDL, plans) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    types: Vec<RecordType>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Register a record type. Local shape checks run here; cross-type
    /// checks (unknown targets, id counts over the inheritance chain,
    /// cycles) run in the analyzer where the whole graph is visible.
    pub fn register(&mut self, record: RecordType) -> Result<(), ModelError> {
        if self.index.contains_key(&record.name) {
            return Err(ModelError::DuplicateType {
                type_name: record.name.clone(),
            });
        }
        validate_local(&record)?;
        log::debug!("registering record type `{}`", record.name);
        self.index.insert(record.name.clone(), self.types.len());
        self.types.push(record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&RecordType, ModelError> {
        self.index
            .get(name)
            .map(|&i| &self.types[i])
            .ok_or_else(|| ModelError::UnknownType {
                type_name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All registered types in registration order.
    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.iter()
    }
}

fn validate_local(record: &RecordType) -> Result<(), ModelError> {
    let mut seen = HashMap::new();
    let mut bags = 0usize;
    for field in &record.fields {
        if seen.insert(field.name.as_str(), ()).is_some() {
            return Err(ModelError::DuplicateField {
                type_name: record.name.clone(),
                field: field.name.clone(),
            });
        }
        match &field.kind {
            FieldKind::OtherBag => bags += 1,
            FieldKind::LinkMany {
                target,
                fetch_column,
                value_type,
                ..
            } => {
                let as_values = fetch_column.is_some() && value_type.is_some();
                let as_records = target.is_some() && fetch_column.is_none();
                if !as_values && !as_records {
                    return Err(ModelError::LinkShape {
                        type_name: record.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    if bags > 1 {
        return Err(ModelError::MultipleOtherBags {
            type_name: record.name.clone(),
        });
    }
    if let Some(ref version) = record.version_field {
        let ok = record
            .field(version)
            .map(|f| f.is_scalar())
            .unwrap_or(false);
        if !ok {
            return Err(ModelError::VersionField {
                type_name: record.name.clone(),
                field: version.clone(),
            });
        }
    }
    Ok(())
}
