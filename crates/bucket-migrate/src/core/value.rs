//! Typed scalar values and records.
//!
//! A [`Record`] is an ordered mapping from column name to [`Value`]. The column
//! set of every record in a job equals the projection of the job's schema.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::schema::ColumnType;

/// Text form used for timestamps in delimited-text shards.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A typed scalar value.
///
/// Large-text columns carry [`Value::Text`] payloads; the distinction lives in
/// the schema, not in the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL.
    Null,

    /// 64-bit signed integer.
    Integer(i64),

    /// Exact decimal with preserved scale.
    Decimal(Decimal),

    /// Text of any length, including large text.
    Text(String),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Boolean value.
    Boolean(bool),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Boolean(_) => "boolean",
        }
    }

    /// Coerce this value into a column of the given type.
    ///
    /// NULL conforms to every type. Integers widen to decimals and text fits
    /// both text column kinds. Everything else must match exactly.
    pub fn coerce_to(&self, ty: ColumnType) -> Option<Value> {
        match (self, ty) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(v), ColumnType::Integer) => Some(Value::Integer(*v)),
            (Value::Integer(v), ColumnType::Decimal) => Some(Value::Decimal(Decimal::from(*v))),
            (Value::Decimal(v), ColumnType::Decimal) => Some(Value::Decimal(*v)),
            (Value::Text(v), ColumnType::Text | ColumnType::LargeText) => {
                Some(Value::Text(v.clone()))
            }
            (Value::Timestamp(v), ColumnType::Timestamp) => Some(Value::Timestamp(*v)),
            (Value::Boolean(v), ColumnType::Boolean) => Some(Value::Boolean(*v)),
            _ => None,
        }
    }

    /// Render the value as delimited-text field content (unquoted).
    ///
    /// Returns `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Timestamp(v) => Some(v.format(TIMESTAMP_FORMAT).to_string()),
            Value::Boolean(v) => Some(v.to_string()),
        }
    }

    /// Parse delimited-text field content as a value of the given type.
    pub fn parse_text(text: &str, ty: ColumnType) -> Option<Value> {
        match ty {
            ColumnType::Integer => text.parse::<i64>().ok().map(Value::Integer),
            ColumnType::Decimal => text.parse::<Decimal>().ok().map(Value::Decimal),
            ColumnType::Text | ColumnType::LargeText => Some(Value::Text(text.to_string())),
            ColumnType::Timestamp => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
                .ok()
                .map(Value::Timestamp),
            ColumnType::Boolean => match text {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered mapping from column name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field append.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Append a field.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((column.into(), value.into()));
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over (column, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Keep only the named columns, preserving record order.
    #[must_use]
    pub fn project(self, columns: &[String]) -> Record {
        Record {
            fields: self
                .fields
                .into_iter()
                .filter(|(name, _)| columns.iter().any(|c| c == name))
                .collect(),
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A batch of records streamed from a source.
///
/// Sources send batches through a bounded channel so that extraction applies
/// backpressure to the query.
#[derive(Debug, Default)]
pub struct Batch {
    /// Records in this batch.
    pub records: Vec<Record>,

    /// Whether this is the final batch of the result set.
    pub is_last: bool,
}

impl Batch {
    /// Create a new batch with the given records.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            is_last: false,
        }
    }

    /// Create an empty final batch.
    pub fn empty_final() -> Self {
        Self {
            records: Vec::new(),
            is_last: true,
        }
    }

    /// Mark this as the final batch.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    /// Get the number of records in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
