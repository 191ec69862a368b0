//! Schema metadata for extracted and loaded relations.

use serde::{Deserialize, Serialize};

/// Logical column type shared by every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Decimal,
    Text,
    /// Text of arbitrary length and content, including line terminators
    /// and delimiters.
    LargeText,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Check if this is a large-text type.
    pub fn is_large_text(self) -> bool {
        matches!(self, ColumnType::LargeText)
    }

    /// Map a PostgreSQL type name to a column type.
    pub fn from_pg_type(type_name: &str) -> Option<Self> {
        match type_name {
            "int2" | "int4" | "int8" => Some(ColumnType::Integer),
            "numeric" | "float4" | "float8" => Some(ColumnType::Decimal),
            "varchar" | "bpchar" | "name" => Some(ColumnType::Text),
            "text" | "json" | "jsonb" => Some(ColumnType::LargeText),
            "timestamp" | "timestamptz" => Some(ColumnType::Timestamp),
            "bool" => Some(ColumnType::Boolean),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::LargeText => "large_text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Logical column type.
    pub column_type: ColumnType,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as a NOT NULL primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// Ordered column list describing a relation or query result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in order.
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of all large-text columns.
    pub fn large_text_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.column_type.is_large_text())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Sub-schema of the named columns, in schema order.
    #[must_use]
    pub fn project(&self, names: &[String]) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .filter(|c| names.contains(&c.name))
                .cloned()
                .collect(),
        }
    }

    /// Sub-schema without the named columns.
    #[must_use]
    pub fn without(&self, names: &[String]) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name))
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
