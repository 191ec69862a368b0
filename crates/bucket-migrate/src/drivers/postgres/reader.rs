//! PostgreSQL source store.
//!
//! Uses deadpool-postgres for connection pooling and streams rows with
//! `query_raw`, so a large result set is never buffered whole.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_postgres::Row;
use tracing::{debug, info};

use crate::core::{Batch, Column, ColumnType, Record, Schema, SourceStore, Value};
use crate::error::{MigrateError, Result};

use super::connect_pool;

/// PostgreSQL source store implementation.
pub struct PostgresSource {
    pool: Pool,
}

impl PostgresSource {
    /// Connect to a PostgreSQL source.
    pub async fn connect(url: &str, max_conns: usize) -> Result<Self> {
        let pool = connect_pool(url, max_conns)
            .await
            .map_err(MigrateError::source_unavailable)?;
        info!("Connected to PostgreSQL source");
        Ok(Self { pool })
    }

    async fn client(&self, purpose: &str) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            MigrateError::source_unavailable(format!("getting connection for {}: {}", purpose, e))
        })
    }
}

fn query_error(e: tokio_postgres::Error) -> MigrateError {
    MigrateError::source_unavailable(e)
}

fn strip_terminator(query: &str) -> &str {
    query.trim().trim_end_matches(';')
}

#[async_trait]
impl SourceStore for PostgresSource {
    async fn describe(&self, query: &str) -> Result<Schema> {
        let client = self.client("describe").await?;
        let stmt = client
            .prepare(strip_terminator(query))
            .await
            .map_err(query_error)?;

        let mut columns = Vec::with_capacity(stmt.columns().len());
        for col in stmt.columns() {
            let type_name = col.type_().name();
            let column_type = ColumnType::from_pg_type(type_name).ok_or_else(|| {
                MigrateError::source_unavailable(format!(
                    "column '{}' has unsupported type '{}'",
                    col.name(),
                    type_name
                ))
            })?;
            columns.push(Column::new(col.name(), column_type));
        }
        Ok(Schema::new(columns))
    }

    async fn count(&self, query: &str) -> Result<u64> {
        let client = self.client("count").await?;
        let sql = format!(
            "SELECT COUNT(*)::int8 FROM ({}) AS extract_source",
            strip_terminator(query)
        );
        let row = client.query_one(&sql, &[]).await.map_err(query_error)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    fn read(&self, query: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(16);
        let pool = self.pool.clone();
        let query = strip_terminator(query).to_string();

        tokio::spawn(async move {
            if let Err(e) = read_query_internal(pool, query, batch_size.max(1), tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("ping").await?;
        client.simple_query("SELECT 1").await.map_err(query_error)?;
        Ok(())
    }

    fn store_type(&self) -> &str {
        "postgres"
    }
}

/// Stream a query into record batches.
async fn read_query_internal(
    pool: Pool,
    query: String,
    batch_size: usize,
    tx: mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let client = pool.get().await.map_err(|e| {
        MigrateError::source_unavailable(format!("getting connection for read: {}", e))
    })?;

    let stmt = client.prepare(&query).await.map_err(query_error)?;
    let names: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    let stream = client
        .query_raw(&stmt, std::iter::empty::<i32>())
        .await
        .map_err(query_error)?;
    futures::pin_mut!(stream);

    let mut records = Vec::with_capacity(batch_size);
    let mut total = 0u64;
    while let Some(row) = stream.try_next().await.map_err(query_error)? {
        let mut record = Record::new();
        for (idx, name) in names.iter().enumerate() {
            record.push(name.clone(), convert_pg_row_value(&row, idx).map_err(query_error)?);
        }
        records.push(record);
        total += 1;

        if records.len() >= batch_size {
            let batch = Batch::new(std::mem::take(&mut records));
            if tx.send(Ok(batch)).await.is_err() {
                debug!("Reader channel closed after {} rows", total);
                return Ok(());
            }
        }
    }

    let _ = tx.send(Ok(Batch::new(records).mark_final())).await;
    debug!("Read {} rows from source", total);
    Ok(())
}

/// Convert a PostgreSQL row value to a Value.
fn convert_pg_row_value(row: &Row, idx: usize) -> std::result::Result<Value, tokio_postgres::Error> {
    let type_name = row.columns()[idx].type_().name();
    Ok(match type_name {
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.into(),
        "numeric" => row.try_get::<_, Option<Decimal>>(idx)?.into(),
        "float4" => float_value(row.try_get::<_, Option<f32>>(idx)?.map(f64::from)),
        "float8" => float_value(row.try_get::<_, Option<f64>>(idx)?),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| v.to_string())
            .into(),
        "timestamp" => row.try_get::<_, Option<NaiveDateTime>>(idx)?.into(),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| v.naive_utc())
            .into(),
        "bool" => row.try_get::<_, Option<bool>>(idx)?.into(),
        _ => row.try_get::<_, Option<String>>(idx)?.into(),
    })
}

/// Floats become decimals; NaN and infinities have no decimal form and
/// read as NULL.
fn float_value(v: Option<f64>) -> Value {
    v.and_then(|f| Decimal::try_from(f).ok()).into()
}
