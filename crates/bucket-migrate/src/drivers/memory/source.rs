//! In-memory source store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::{Batch, Record, Schema, SourceStore, Value};
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone)]
struct MemTable {
    schema: Schema,
    records: Vec<Record>,
}

/// A parsed `SELECT <cols|*> FROM <relation>` query.
#[derive(Debug, Clone, PartialEq)]
struct Selection {
    columns: Option<Vec<String>>,
    relation: String,
}

/// Source store over in-process tables.
///
/// Understands only `SELECT <col, ...|*> FROM <relation>`. Any other query
/// text is reported as `SourceUnavailable`, the same as a failing query on a
/// real store.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Arc<HashMap<String, MemTable>>,
    offline: Option<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Records are stored in the given order.
    #[must_use]
    pub fn with_table(mut self, name: &str, schema: Schema, records: Vec<Record>) -> Self {
        Arc::make_mut(&mut self.tables).insert(name.to_lowercase(), MemTable { schema, records });
        self
    }

    /// A source that refuses every call.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            tables: Arc::default(),
            offline: Some(reason.into()),
        }
    }

    fn check_online(&self) -> Result<()> {
        match &self.offline {
            Some(reason) => Err(MigrateError::source_unavailable(reason)),
            None => Ok(()),
        }
    }

    fn resolve(&self, query: &str) -> Result<(Selection, &MemTable, Schema)> {
        self.check_online()?;
        let selection = parse_query(query)?;
        let table = self.tables.get(&selection.relation).ok_or_else(|| {
            MigrateError::source_unavailable(format!(
                "relation '{}' does not exist",
                selection.relation
            ))
        })?;

        let schema = match &selection.columns {
            None => table.schema.clone(),
            Some(columns) => {
                let mut projected = Vec::with_capacity(columns.len());
                for name in columns {
                    let col = table.schema.column(name).ok_or_else(|| {
                        MigrateError::source_unavailable(format!(
                            "column '{}' does not exist in '{}'",
                            name, selection.relation
                        ))
                    })?;
                    projected.push(col.clone());
                }
                Schema::new(projected)
            }
        };
        Ok((selection, table, schema))
    }
}

fn parse_query(query: &str) -> Result<Selection> {
    let unsupported =
        || MigrateError::source_unavailable(format!("unsupported query: {}", query.trim()));

    let text = query.trim().trim_end_matches(';').trim();
    let upper = text.to_ascii_uppercase();
    if !upper.starts_with("SELECT ") {
        return Err(unsupported());
    }
    let select_len = "SELECT".len();
    let from = upper[select_len..]
        .find(" FROM ")
        .map(|idx| idx + select_len)
        .ok_or_else(unsupported)?;

    let column_list = text[select_len..from].trim();
    if column_list.is_empty() {
        return Err(unsupported());
    }
    let relation = text[from + " FROM ".len()..].trim();
    if relation.is_empty() || relation.contains(char::is_whitespace) {
        return Err(unsupported());
    }

    let columns = if column_list == "*" {
        None
    } else {
        let names: Vec<String> = column_list
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .collect();
        if names.iter().any(String::is_empty) {
            return Err(unsupported());
        }
        Some(names)
    };

    Ok(Selection {
        columns,
        relation: relation.to_lowercase(),
    })
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn describe(&self, query: &str) -> Result<Schema> {
        let (_, _, schema) = self.resolve(query)?;
        Ok(schema)
    }

    async fn count(&self, query: &str) -> Result<u64> {
        let (_, table, _) = self.resolve(query)?;
        Ok(table.records.len() as u64)
    }

    fn read(&self, query: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(16);
        let resolved = self.resolve(query).map(|(_, table, schema)| {
            let names = schema.names();
            table
                .records
                .iter()
                .map(|r| {
                    let mut out = Record::new();
                    for name in &names {
                        out.push(name.clone(), r.get(name).cloned().unwrap_or(Value::Null));
                    }
                    out
                })
                .collect::<Vec<_>>()
        });
        let batch_size = batch_size.max(1);

        tokio::spawn(async move {
            let records = match resolved {
                Ok(records) => records,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            if records.is_empty() {
                let _ = tx.send(Ok(Batch::empty_final())).await;
                return;
            }
            let chunks: Vec<Vec<Record>> = records
                .chunks(batch_size)
                .map(<[Record]>::to_vec)
                .collect();
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut batch = Batch::new(chunk);
                if i == last {
                    batch = batch.mark_final();
                }
                if tx.send(Ok(batch)).await.is_err() {
                    return;
                }
            }
        });

        rx
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}
