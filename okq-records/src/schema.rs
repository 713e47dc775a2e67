//! Durable schema of the records store.
//!
//! The schema is a static definition owned by this module; backends receive
//! it by reference when asked to initialize. There is no process-wide
//! registration, so stores on different backends share nothing.
//!
//! ```text
//! records
//! ├── ts          TEXT          NOT NULL  ─┐
//! ├── entity_id   VARCHAR(250)  NOT NULL   ├─ PRIMARY KEY
//! ├── field_name  VARCHAR(250)  NOT NULL  ─┘
//! └── value       REAL          NULL
//! ```
//!
//! `ts` holds the canonical timestamp string (see [`crate::timestamp`]),
//! which compares in chronological order as text.

use std::collections::HashSet;

use crate::error::SchemaError;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Canonical timestamp string.
    Timestamp,
    /// Bounded text.
    Text {
        /// Maximum length in characters.
        max_len: u32,
    },
    /// Double-precision float.
    Float,
}

impl ColumnType {
    /// Returns the SQL type name used in DDL.
    pub fn sql_type(self) -> String {
        match self {
            Self::Timestamp => "TEXT".to_string(),
            Self::Text { max_len } => format!("VARCHAR({max_len})"),
            Self::Float => "REAL".to_string(),
        }
    }
}

/// One column of a table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

/// A static table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [Column],
}

/// The narrow `records` table.
pub const RECORDS_TABLE: TableSchema = TableSchema {
    name: "records",
    columns: &[
        Column {
            name: "ts",
            column_type: ColumnType::Timestamp,
            nullable: false,
            primary_key: true,
        },
        Column {
            name: "entity_id",
            column_type: ColumnType::Text { max_len: 250 },
            nullable: false,
            primary_key: true,
        },
        Column {
            name: "field_name",
            column_type: ColumnType::Text { max_len: 250 },
            nullable: false,
            primary_key: true,
        },
        Column {
            name: "value",
            column_type: ColumnType::Float,
            nullable: true,
            primary_key: false,
        },
    ],
};

impl TableSchema {
    /// Checks that the definition can be created on a backend.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefinition`] if the table has no
    /// columns, no primary key, duplicate column names, or a nullable
    /// primary key column.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidDefinition {
            table: self.name,
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("table name is empty"));
        }
        if self.columns.is_empty() {
            return Err(invalid("no columns"));
        }

        let mut seen = HashSet::new();
        for column in self.columns {
            if !seen.insert(column.name) {
                return Err(invalid(&format!("duplicate column '{}'", column.name)));
            }
            if column.primary_key && column.nullable {
                return Err(invalid(&format!(
                    "primary key column '{}' is nullable",
                    column.name
                )));
            }
        }

        if self.primary_key().next().is_none() {
            return Err(invalid("no primary key"));
        }
        Ok(())
    }

    /// Returns the primary key column names in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name)
    }

    /// Renders an idempotent `CREATE TABLE IF NOT EXISTS` statement.
    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "NULL" } else { "NOT NULL" };
                format!("{} {} {}", c.name, c.column_type.sql_type(), null)
            })
            .collect();
        let pk: Vec<&str> = self.primary_key().collect();
        parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            parts.join(", ")
        )
    }
}
