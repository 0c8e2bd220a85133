//! SQL dialect capabilities.
//!
//! Everything dialect-specific funnels through [`Dialect`]: identifier
//! quoting, abstract-to-concrete type mapping, auto-increment syntax, limit
//! clauses, and the upsert primitive. A process-wide default exists for
//! convenience, but every API that builds SQL also accepts an explicit
//! dialect; the default is only a fallback.

use lazy_static::lazy_static;
use std::fmt;
use std::sync::RwLock;

use crate::model::ColumnType;
use crate::sql::errors::DialectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Hsqldb,
}

/// How a dialect expresses "insert or update".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStrategy {
    /// `INSERT … ON DUPLICATE KEY UPDATE …`
    OnDuplicateKey,
    /// `INSERT … ON CONFLICT (id) DO UPDATE SET …`
    OnConflict,
    /// No native primitive: `UPDATE`, and `INSERT` when nothing matched,
    /// inside one transaction.
    UpdateThenInsert,
}

lazy_static! {
    static ref DEFAULT_DIALECT: RwLock<Dialect> = RwLock::new(Dialect::MySql);
}

/// The process-wide default dialect.
pub fn default_dialect() -> Dialect {
    *DEFAULT_DIALECT.read().expect("default dialect lock poisoned")
}

/// Replace the process-wide default dialect. Atomic; visible to all threads.
pub fn set_default_dialect(dialect: Dialect) {
    *DEFAULT_DIALECT.write().expect("default dialect lock poisoned") = dialect;
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Hsqldb => "hsqldb",
        }
    }

    fn quote_char(&self) -> Option<char> {
        match self {
            Dialect::MySql => Some('`'),
            Dialect::Postgres => Some('"'),
            Dialect::Hsqldb => None,
        }
    }

    /// Quote identifier segments and join them with `.`. Inner quote
    /// characters escape by doubling.
    pub fn quote_identifier(&self, parts: &[&str]) -> String {
        match self.quote_char() {
            None => parts.join("."),
            Some(q) => {
                let doubled = format!("{}{}", q, q);
                parts
                    .iter()
                    .map(|p| format!("{}{}{}", q, p.replace(q, &doubled), q))
                    .collect::<Vec<_>>()
                    .join(".")
            }
        }
    }

    /// Quote a single identifier (an alias path is one identifier even when
    /// it contains dots).
    pub fn quote_one(&self, identifier: &str) -> String {
        self.quote_identifier(&[identifier])
    }

    /// Map an abstract column type to this dialect's SQL type.
    pub fn sql_type(&self, column_type: &ColumnType) -> Result<String, DialectError> {
        use ColumnType::*;
        let unsupported = || DialectError::UnsupportedType {
            dialect: self.name(),
            column_type: format!("{:?}", column_type),
        };
        Ok(match column_type {
            Boolean => match self {
                Dialect::MySql => "TINYINT(1)".to_string(),
                _ => "BOOLEAN".to_string(),
            },
            SmallInt => "SMALLINT".to_string(),
            Int => "INT".to_string(),
            Long => "BIGINT".to_string(),
            Float => match self {
                Dialect::Postgres => "REAL".to_string(),
                _ => "FLOAT".to_string(),
            },
            Double => match self {
                Dialect::Postgres => "DOUBLE PRECISION".to_string(),
                _ => "DOUBLE".to_string(),
            },
            Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            VarChar(len) => format!("VARCHAR({})", len),
            Text => match self {
                Dialect::MySql => "LONGTEXT".to_string(),
                Dialect::Postgres => "TEXT".to_string(),
                Dialect::Hsqldb => "CLOB".to_string(),
            },
            Bytes => match self {
                Dialect::MySql => "LONGBLOB".to_string(),
                Dialect::Postgres => "BYTEA".to_string(),
                Dialect::Hsqldb => "BLOB".to_string(),
            },
            Date => "DATE".to_string(),
            Time => "TIME".to_string(),
            Timestamp => match self {
                Dialect::MySql => "DATETIME".to_string(),
                _ => "TIMESTAMP".to_string(),
            },
            Enum { variants, .. } => {
                if variants.is_empty() {
                    return Err(unsupported());
                }
                match self {
                    Dialect::MySql => {
                        let list = variants
                            .iter()
                            .map(|v| format!("'{}'", v.replace('\'', "''")))
                            .collect::<Vec<_>>()
                            .join(",");
                        format!("ENUM({})", list)
                    }
                    _ => "VARCHAR(255)".to_string(),
                }
            }
        })
    }

    /// The clause appended to an id column definition to make the database
    /// generate its values.
    pub fn auto_increment_clause(&self) -> &'static str {
        match self {
            Dialect::MySql => "AUTO_INCREMENT",
            Dialect::Postgres => "",
            Dialect::Hsqldb => "GENERATED BY DEFAULT AS IDENTITY",
        }
    }

    /// The full column type of an auto-generated id, where the dialect
    /// expresses generation through the type itself.
    pub fn auto_id_type(&self, column_type: &ColumnType) -> Result<String, DialectError> {
        match self {
            Dialect::Postgres => Ok(match column_type {
                ColumnType::Long => "BIGSERIAL".to_string(),
                _ => "SERIAL".to_string(),
            }),
            _ => self.sql_type(column_type),
        }
    }

    pub fn limit_clause(&self, offset: i64, count: i64) -> String {
        if offset > 0 {
            format!("LIMIT {} OFFSET {}", count, offset)
        } else {
            format!("LIMIT {}", count)
        }
    }

    /// Trailing table declaration, e.g. the storage engine.
    pub fn table_suffix(&self) -> &'static str {
        match self {
            Dialect::MySql => " ENGINE=InnoDB",
            _ => "",
        }
    }

    pub fn upsert_strategy(&self) -> UpsertStrategy {
        match self {
            Dialect::MySql => UpsertStrategy::OnDuplicateKey,
            Dialect::Postgres => UpsertStrategy::OnConflict,
            Dialect::Hsqldb => UpsertStrategy::UpdateThenInsert,
        }
    }
}
