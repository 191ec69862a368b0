//! PostgreSQL target store.
//!
//! A load session holds one pooled connection with an open transaction.
//! Every insert runs under a savepoint: a failing record is rolled back to
//! the savepoint and classified by its SQLSTATE, and the transaction stays
//! usable for the next record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Object, Pool};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Statement;
use tracing::{debug, info, warn};

use crate::core::{
    Column, InsertOutcome, LoadSession, RejectReason, Record, Schema, TargetStore, Value,
};
use crate::error::{MigrateError, Result};

use super::{connect_pool, quote_ident, quote_relation};

const DESCRIBE_SQL: &str = r#"
SELECT a.attname::text,
       t.typname::text,
       NOT a.attnotnull,
       COALESCE(bool_or(i.indisprimary), false)
FROM pg_attribute a
JOIN pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_index i
       ON i.indrelid = a.attrelid AND i.indisprimary AND a.attnum = ANY(i.indkey)
WHERE a.attrelid = to_regclass($1)
  AND a.attnum > 0
  AND NOT a.attisdropped
GROUP BY a.attnum, a.attname, t.typname, a.attnotnull
ORDER BY a.attnum
"#;

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL target store implementation.
pub struct PostgresTarget {
    pool: Pool,
}

impl PostgresTarget {
    /// Connect to a PostgreSQL target.
    pub async fn connect(url: &str, max_conns: usize) -> Result<Self> {
        let pool = connect_pool(url, max_conns)
            .await
            .map_err(MigrateError::target_unavailable)?;
        info!("Connected to PostgreSQL target");
        Ok(Self { pool })
    }

    async fn client(&self, purpose: &str) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            MigrateError::target_unavailable(format!("getting connection for {}: {}", purpose, e))
        })
    }

    /// Column names and PostgreSQL type names of a relation.
    ///
    /// The relation is resolved from the same quoted name the load statements
    /// use, so `Orders` and `orders` are different tables.
    async fn describe_pg(&self, client: &Object, table: &str) -> Result<Vec<(Column, String)>> {
        let relation = quote_relation(table);
        let rows = client
            .query(DESCRIBE_SQL, &[&relation])
            .await
            .map_err(MigrateError::target_unavailable)?;
        if rows.is_empty() {
            return Err(MigrateError::schema_mismatch(table, "table does not exist"));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let type_name: String = row.get(1);
            let nullable: bool = row.get(2);
            let primary_key: bool = row.get(3);
            let column_type = crate::core::ColumnType::from_pg_type(&type_name).ok_or_else(|| {
                MigrateError::schema_mismatch(
                    table,
                    format!("column '{}' has unsupported type '{}'", name, type_name),
                )
            })?;
            columns.push((
                Column {
                    name,
                    column_type,
                    nullable,
                    primary_key,
                },
                type_name,
            ));
        }
        Ok(columns)
    }
}

#[async_trait]
impl TargetStore for PostgresTarget {
    async fn describe(&self, table: &str) -> Result<Schema> {
        let client = self.client("describe").await?;
        let columns = self.describe_pg(&client, table).await?;
        Ok(Schema::new(columns.into_iter().map(|(c, _)| c).collect()))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let client = self.client("row_count").await?;
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", quote_relation(table));
        let row = client
            .query_one(&sql, &[])
            .await
            .map_err(|e| classify_statement_error(table, e))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn begin_load(&self, table: &str, _schema: &Schema) -> Result<Box<dyn LoadSession>> {
        let client = self.client("load").await?;
        let columns = self.describe_pg(&client, table).await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(MigrateError::target_unavailable)?;
        debug!("Opened load transaction on {}", table);

        Ok(Box::new(PostgresLoadSession {
            client: Some(client),
            table: table.to_string(),
            pg_types: columns
                .iter()
                .map(|(c, t)| (c.name.clone(), t.clone()))
                .collect(),
            statements: HashMap::new(),
            inserted: 0,
        }))
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("ping").await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(MigrateError::target_unavailable)?;
        Ok(())
    }

    fn store_type(&self) -> &str {
        "postgres"
    }
}

/// Map errors from statements outside a load session.
fn classify_statement_error(table: &str, e: tokio_postgres::Error) -> MigrateError {
    match e.code() {
        Some(code) if *code == SqlState::UNDEFINED_TABLE => {
            MigrateError::schema_mismatch(table, e.to_string())
        }
        _ => MigrateError::target_unavailable(e),
    }
}

/// Classify the SQLSTATE of a failed insert.
///
/// Only data exceptions (class 22) and integrity constraint violations
/// (class 23) are about the record itself. Anything else, such as missing
/// privileges, a shutdown or a cancelled statement, is about the target and
/// returns `None`.
pub(crate) fn classify_sqlstate(code: &SqlState) -> Option<RejectReason> {
    if *code == SqlState::UNIQUE_VIOLATION {
        Some(RejectReason::UniqueViolation)
    } else if *code == SqlState::NOT_NULL_VIOLATION {
        Some(RejectReason::NotNullViolation)
    } else if code.code().starts_with("23") {
        Some(RejectReason::ConstraintViolation)
    } else if code.code().starts_with("22") || *code == SqlState::DATATYPE_MISMATCH {
        Some(RejectReason::TypeMismatch)
    } else {
        None
    }
}

/// Build the bound parameter for a value in a column of the given
/// PostgreSQL type.
fn to_sql_param(value: &Value, pg_type: &str) -> std::result::Result<SqlParam, String> {
    let param: SqlParam = match (pg_type, value) {
        ("int2", Value::Null) => Box::new(None::<i16>),
        ("int4", Value::Null) => Box::new(None::<i32>),
        ("int8", Value::Null) => Box::new(None::<i64>),
        ("numeric", Value::Null) => Box::new(None::<Decimal>),
        ("float4", Value::Null) => Box::new(None::<f32>),
        ("float8", Value::Null) => Box::new(None::<f64>),
        ("json" | "jsonb", Value::Null) => Box::new(None::<serde_json::Value>),
        ("timestamp", Value::Null) => Box::new(None::<NaiveDateTime>),
        ("timestamptz", Value::Null) => Box::new(None::<DateTime<Utc>>),
        ("bool", Value::Null) => Box::new(None::<bool>),
        (_, Value::Null) => Box::new(None::<String>),

        ("int2", Value::Integer(v)) => Box::new(
            i16::try_from(*v).map_err(|_| format!("{} is out of range for smallint", v))?,
        ),
        ("int4", Value::Integer(v)) => Box::new(
            i32::try_from(*v).map_err(|_| format!("{} is out of range for integer", v))?,
        ),
        ("int8", Value::Integer(v)) => Box::new(*v),
        ("numeric", Value::Integer(v)) => Box::new(Decimal::from(*v)),
        ("numeric", Value::Decimal(v)) => Box::new(*v),
        ("float4", Value::Integer(v)) => Box::new(*v as f32),
        ("float8", Value::Integer(v)) => Box::new(*v as f64),
        ("float4", Value::Decimal(v)) => Box::new(
            v.to_f32()
                .ok_or_else(|| format!("{} is out of range for real", v))?,
        ),
        ("float8", Value::Decimal(v)) => Box::new(
            v.to_f64()
                .ok_or_else(|| format!("{} is out of range for double precision", v))?,
        ),
        ("json" | "jsonb", Value::Text(v)) => Box::new(
            serde_json::from_str::<serde_json::Value>(v)
                .map_err(|e| format!("invalid JSON: {}", e))?,
        ),
        ("varchar" | "bpchar" | "name" | "text", Value::Text(v)) => Box::new(v.clone()),
        ("timestamp", Value::Timestamp(v)) => Box::new(*v),
        ("timestamptz", Value::Timestamp(v)) => Box::new(v.and_utc()),
        ("bool", Value::Boolean(v)) => Box::new(*v),
        (ty, v) => return Err(format!("cannot store {} in a {} column", v.kind(), ty)),
    };
    Ok(param)
}

/// One open load transaction.
struct PostgresLoadSession {
    client: Option<Object>,
    table: String,
    pg_types: HashMap<String, String>,
    statements: HashMap<Vec<String>, Statement>,
    inserted: u64,
}

impl PostgresLoadSession {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::target_unavailable("load session already finished"))
    }

    async fn statement(&mut self, columns: Vec<String>) -> Result<Statement> {
        if let Some(stmt) = self.statements.get(&columns) {
            return Ok(stmt.clone());
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_relation(&self.table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            (1..=columns.len())
                .map(|i| format!("${}", i))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let stmt = self
            .client()?
            .prepare(&sql)
            .await
            .map_err(|e| classify_statement_error(&self.table, e))?;
        self.statements.insert(columns, stmt.clone());
        Ok(stmt)
    }
}

#[async_trait]
impl LoadSession for PostgresLoadSession {
    async fn truncate(&mut self) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", quote_relation(&self.table));
        self.client()?
            .batch_execute(&sql)
            .await
            .map_err(|e| classify_statement_error(&self.table, e))?;
        info!("Truncated {} inside load transaction", self.table);
        Ok(())
    }

    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome> {
        let mut columns = Vec::with_capacity(record.len());
        let mut params: Vec<SqlParam> = Vec::with_capacity(record.len());
        for (name, value) in record.iter() {
            let Some(pg_type) = self.pg_types.get(name) else {
                return Ok(InsertOutcome::Rejected(
                    RejectReason::UnknownColumn,
                    format!("column '{}' does not exist in '{}'", name, self.table),
                ));
            };
            match to_sql_param(value, pg_type) {
                Ok(param) => params.push(param),
                Err(detail) => {
                    return Ok(InsertOutcome::Rejected(
                        RejectReason::TypeMismatch,
                        format!("column '{}': {}", name, detail),
                    ))
                }
            }
            columns.push(name.to_string());
        }

        let stmt = self.statement(columns).await?;
        let client = self.client()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        client
            .batch_execute("SAVEPOINT load_record")
            .await
            .map_err(MigrateError::target_unavailable)?;

        match client.execute(&stmt, &refs).await {
            Ok(_) => {
                client
                    .batch_execute("RELEASE SAVEPOINT load_record")
                    .await
                    .map_err(MigrateError::target_unavailable)?;
                self.inserted += 1;
                Ok(InsertOutcome::Inserted)
            }
            Err(e) => {
                let Some(reason) = e.code().and_then(classify_sqlstate) else {
                    return Err(MigrateError::target_unavailable(e));
                };
                client
                    .batch_execute("ROLLBACK TO SAVEPOINT load_record")
                    .await
                    .map_err(MigrateError::target_unavailable)?;
                let detail = e
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                Ok(InsertOutcome::Rejected(reason, detail))
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<u64> {
        let client = self.client.take().ok_or_else(|| {
            MigrateError::target_unavailable("load session already finished")
        })?;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(MigrateError::target_unavailable)?;
        debug!("Committed {} rows into {}", self.inserted, self.table);
        Ok(self.inserted)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(MigrateError::target_unavailable)?;
        debug!("Rolled back load transaction on {}", self.table);
        Ok(())
    }
}

impl Drop for PostgresLoadSession {
    fn drop(&mut self) {
        // An unfinished transaction must not go back to the pool. Detaching
        // the connection closes it and the server rolls the transaction back.
        if let Some(client) = self.client.take() {
            warn!("Load session on {} dropped without commit", self.table);
            drop(Object::take(client));
        }
    }
}
