//! In-memory target store with transactional load sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{InsertOutcome, LoadSession, RejectReason, Record, Schema, TargetStore, Value};
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Default)]
struct MemTable {
    schema: Schema,
    rows: Vec<Record>,
}

impl MemTable {
    fn key_of(&self, record: &Record) -> Option<Vec<Value>> {
        let keys: Vec<Value> = self
            .schema
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| {
                record
                    .get(&c.name)
                    .and_then(|v| v.coerce_to(c.column_type))
                    .unwrap_or(Value::Null)
            })
            .collect();
        (!keys.is_empty()).then_some(keys)
    }
}

/// Target store over in-process tables.
///
/// Enforces NOT NULL, primary key uniqueness and column types the way a
/// relational target would. Loaded rows only become visible on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    tables: Arc<Mutex<HashMap<String, MemTable>>>,
    offline: Option<String>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table.
    pub async fn create_table(&self, name: &str, schema: Schema) {
        self.tables.lock().await.insert(
            name.to_lowercase(),
            MemTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    /// A target that refuses every call.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            tables: Arc::default(),
            offline: Some(reason.into()),
        }
    }

    /// Committed rows of a table, in insertion order.
    pub async fn rows(&self, name: &str) -> Vec<Record> {
        self.tables
            .lock()
            .await
            .get(&name.to_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        match &self.offline {
            Some(reason) => Err(MigrateError::target_unavailable(reason)),
            None => Ok(()),
        }
    }

    async fn table(&self, name: &str) -> Result<MemTable> {
        self.check_online()?;
        self.tables
            .lock()
            .await
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| MigrateError::schema_mismatch(name, "table does not exist"))
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn describe(&self, table: &str) -> Result<Schema> {
        Ok(self.table(table).await?.schema)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.table(table).await?.rows.len() as u64)
    }

    async fn begin_load(&self, table: &str, _schema: &Schema) -> Result<Box<dyn LoadSession>> {
        let snapshot = self.table(table).await?;
        Ok(Box::new(MemoryLoadSession {
            tables: Arc::clone(&self.tables),
            table: table.to_lowercase(),
            snapshot,
            staged: Vec::new(),
            truncate: false,
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}

/// Load session buffering inserts until commit.
struct MemoryLoadSession {
    tables: Arc<Mutex<HashMap<String, MemTable>>>,
    table: String,
    snapshot: MemTable,
    staged: Vec<Record>,
    truncate: bool,
}

impl MemoryLoadSession {
    fn check(&self, record: &Record) -> Option<(RejectReason, String)> {
        let schema = &self.snapshot.schema;

        if let Some(unknown) = record.columns().find(|c| schema.column(c).is_none()) {
            return Some((
                RejectReason::UnknownColumn,
                format!("column '{}' does not exist in '{}'", unknown, self.table),
            ));
        }

        for col in &schema.columns {
            let value = record.get(&col.name).unwrap_or(&Value::Null);
            if value.is_null() {
                if !col.nullable {
                    return Some((
                        RejectReason::NotNullViolation,
                        format!("null value in column '{}'", col.name),
                    ));
                }
            } else if value.coerce_to(col.column_type).is_none() {
                return Some((
                    RejectReason::TypeMismatch,
                    format!(
                        "column '{}' is {} but value is {}",
                        col.name,
                        col.column_type,
                        value.kind()
                    ),
                ));
            }
        }

        if let Some(key) = self.snapshot.key_of(record) {
            let existing = if self.truncate {
                &[][..]
            } else {
                &self.snapshot.rows[..]
            };
            let duplicate = existing
                .iter()
                .chain(self.staged.iter())
                .any(|row| self.snapshot.key_of(row).as_ref() == Some(&key));
            if duplicate {
                return Some((
                    RejectReason::UniqueViolation,
                    format!("duplicate key in '{}'", self.table),
                ));
            }
        }

        None
    }
}

#[async_trait]
impl LoadSession for MemoryLoadSession {
    async fn truncate(&mut self) -> Result<()> {
        self.truncate = true;
        self.staged.clear();
        Ok(())
    }

    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome> {
        if let Some((reason, detail)) = self.check(record) {
            return Ok(InsertOutcome::Rejected(reason, detail));
        }
        let mut row = Record::new();
        for col in &self.snapshot.schema.columns {
            let value = record
                .get(&col.name)
                .and_then(|v| v.coerce_to(col.column_type))
                .unwrap_or(Value::Null);
            row.push(col.name.clone(), value);
        }
        self.staged.push(row);
        Ok(InsertOutcome::Inserted)
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        let this = *self;
        let mut tables = this.tables.lock().await;
        let table = tables.get_mut(&this.table).ok_or_else(|| {
            MigrateError::schema_mismatch(&this.table, "table dropped during load")
        })?;
        if this.truncate {
            table.rows.clear();
        }
        let inserted = this.staged.len() as u64;
        table.rows.extend(this.staged);
        Ok(inserted)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
