//! Loading: staged shards into the target.
//!
//! All shards matched by a locator are loaded inside one target transaction.
//! A record that fails to parse, convert or insert is diverted to the reject
//! log and the load continues. Once the number of rejects exceeds the reject
//! limit the whole transaction is rolled back.

pub mod rejects;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::artifact::duration_ms;
use crate::core::{
    Column, InsertOutcome, LoadSession, ObjectStore, RejectReason, RejectedRecord, Record, Schema,
    TargetStore,
};
use crate::error::{MigrateError, Result};
use crate::format::delimited::parse_header;
use crate::format::{split_records, CodecError, DelimitedCodec, Format, RawRecord, RecordCodec, StructuredCodec};
use crate::storage::Locator;

pub use rejects::{read_reject_log, JsonlRejectLog, MemoryRejectLog, RejectSink};

/// Parameters of one load operation.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub locator: Locator,
    pub table: String,
    pub format: Format,
    /// Rejects tolerated before the load is rolled back.
    pub reject_limit: u64,
    /// Empty the target inside the load transaction first.
    pub truncate_before_load: bool,
}

impl LoadRequest {
    pub fn new(locator: Locator, table: impl Into<String>, format: Format) -> Self {
        Self {
            locator,
            table: table.into(),
            format,
            reject_limit: 0,
            truncate_before_load: false,
        }
    }
}

/// Outcome of a committed load operation.
///
/// `committed_count + rejected_count == records_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub committed_count: u64,
    pub rejected_count: u64,
    pub records_read: u64,
    /// Shards loaded, in load order.
    pub shards: Vec<String>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counts {
    committed: u64,
    rejected: u64,
    read: u64,
}

/// Loads staged shards from an object store into a target store.
pub struct Loader<'a> {
    store: &'a dyn ObjectStore,
    target: &'a dyn TargetStore,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn ObjectStore, target: &'a dyn TargetStore) -> Self {
        Self { store, target }
    }

    /// Load every shard the locator resolves to.
    ///
    /// On any error the load transaction is rolled back and nothing from the
    /// operation is committed. Rejected records seen so far remain in the
    /// reject sink.
    pub async fn load(
        &self,
        req: &LoadRequest,
        sink: &mut dyn RejectSink,
        cancel: &CancellationToken,
    ) -> Result<LoadResult> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let shards = req.locator.resolve(self.store).await?;
        info!(
            "Loading {} shard(s) matching '{}' into {}",
            shards.len(),
            req.locator,
            req.table
        );

        let schema = self.target.describe(&req.table).await?;
        let mut session = self.target.begin_load(&req.table, &schema).await?;

        let outcome = self
            .load_into(session.as_mut(), req, &schema, &shards, sink, cancel)
            .await;
        let flushed = sink.flush();

        let counts = match outcome {
            Ok(counts) => counts,
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!("Rollback of {} failed: {}", req.table, rollback_err);
                }
                warn!("Load into {} rolled back: {}", req.table, e);
                return Err(e);
            }
        };
        if let Err(e) = flushed {
            if let Err(rollback_err) = session.rollback().await {
                warn!("Rollback of {} failed: {}", req.table, rollback_err);
            }
            return Err(e);
        }

        let committed = session.commit().await?;
        if committed != counts.committed {
            warn!(
                "Target reported {} committed rows, loader counted {}",
                committed, counts.committed
            );
        }

        let result = LoadResult {
            committed_count: counts.committed,
            rejected_count: counts.rejected,
            records_read: counts.read,
            shards,
            elapsed: started.elapsed(),
        };
        info!(
            "Loaded {} records into {} ({} rejected) in {:.2}s",
            result.committed_count,
            req.table,
            result.rejected_count,
            result.elapsed.as_secs_f64()
        );
        Ok(result)
    }

    async fn load_into(
        &self,
        session: &mut dyn LoadSession,
        req: &LoadRequest,
        schema: &Schema,
        shards: &[String],
        sink: &mut dyn RejectSink,
        cancel: &CancellationToken,
    ) -> Result<Counts> {
        if req.truncate_before_load {
            session.truncate().await?;
        }

        let mut counts = Counts::default();
        for shard in shards {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let data = self.store.get(shard).await?;
            let mut raw_records = split_records(req.format, &data).into_iter();

            let codec: Box<dyn RecordCodec> = match req.format {
                Format::Delimited => {
                    let Some(header) = raw_records.next() else {
                        debug!("Shard {} is empty", shard);
                        continue;
                    };
                    Box::new(header_codec(&req.table, shard, &header, schema)?)
                }
                Format::Structured => Box::new(StructuredCodec),
            };

            let before = counts.read;
            for raw in raw_records {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                counts.read += 1;

                let decoded = match raw.error.clone() {
                    Some(err) => Err(err),
                    None => codec
                        .deserialize(&raw.bytes)
                        .and_then(|record| conform(record, schema)),
                };
                let outcome = match decoded {
                    Ok(record) => session.insert(&record).await?,
                    Err(err) => InsertOutcome::Rejected(err.reason, err.detail),
                };

                match outcome {
                    InsertOutcome::Inserted => counts.committed += 1,
                    InsertOutcome::Rejected(reason, detail) => {
                        counts.rejected += 1;
                        debug!("Rejected {}:{} ({}): {}", shard, raw.line, reason, detail);
                        sink.record(&rejected_record(shard, &raw, reason, detail))?;
                        if counts.rejected > req.reject_limit {
                            return Err(MigrateError::RejectLimitExceeded {
                                rejected: counts.rejected,
                                limit: req.reject_limit,
                            });
                        }
                    }
                }
            }
            debug!("Shard {}: {} records read", shard, counts.read - before);
        }

        Ok(counts)
    }
}

fn rejected_record(shard: &str, raw: &RawRecord, reason: RejectReason, detail: String) -> RejectedRecord {
    RejectedRecord {
        shard: shard.to_string(),
        line: raw.line,
        reason,
        detail,
        raw: raw.lossy(),
    }
}

/// Build the record codec for a delimited shard from its header line.
///
/// Header columns must all exist in the target. Target columns missing from
/// the header load as NULL.
fn header_codec(
    table: &str,
    shard: &str,
    header: &RawRecord,
    target: &Schema,
) -> Result<DelimitedCodec> {
    if let Some(err) = &header.error {
        return Err(MigrateError::schema_mismatch(
            table,
            format!("unreadable header in {}: {}", shard, err.detail),
        ));
    }
    let names = parse_header(&header.bytes).map_err(|e| {
        MigrateError::schema_mismatch(table, format!("unreadable header in {}: {}", shard, e.detail))
    })?;

    let mut columns: Vec<Column> = Vec::with_capacity(names.len());
    for name in &names {
        let col = target.column(name).ok_or_else(|| {
            MigrateError::schema_mismatch(
                table,
                format!("shard {} has column '{}' which the target lacks", shard, name),
            )
        })?;
        columns.push(col.clone());
    }
    Ok(DelimitedCodec::new(Schema::new(columns)))
}

/// Check a decoded record against the target schema and coerce its values.
fn conform(record: Record, target: &Schema) -> std::result::Result<Record, CodecError> {
    let mut out = Record::new();
    for (name, value) in record.iter() {
        let col = target.column(name).ok_or_else(|| CodecError {
            reason: RejectReason::UnknownColumn,
            detail: format!("column '{}' does not exist in the target", name),
        })?;
        let coerced = value.coerce_to(col.column_type).ok_or_else(|| {
            CodecError::type_mismatch(format!(
                "column '{}' is {} but value is {}",
                name,
                col.column_type,
                value.kind()
            ))
        })?;
        out.push(name, coerced);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnType, Value};
    use crate::drivers::MemoryTarget;
    use crate::storage::MemoryObjectStore;
    use bytes::Bytes;

    async fn target() -> MemoryTarget {
        let target = MemoryTarget::new();
        target
            .create_table(
                "orders",
                Schema::new(vec![
                    Column::new("id", ColumnType::Integer).primary_key(),
                    Column::new("customer", ColumnType::Text).not_null(),
                    Column::new("amount", ColumnType::Decimal),
                ]),
            )
            .await;
        target
    }

    async fn store(objects: &[(&str, &str)]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for (name, data) in objects {
            store
                .put(name, Bytes::copy_from_slice(data.as_bytes()))
                .await
                .unwrap();
        }
        store
    }

    fn request(locator: &str, limit: u64) -> LoadRequest {
        let mut req = LoadRequest::new(Locator::parse(locator), "orders", Format::Delimited);
        req.reject_limit = limit;
        req
    }

    #[tokio::test]
    async fn test_conservation_with_mixed_rejects() {
        let target = target().await;
        let store = store(&[(
            "orders_1.csv",
            "id,customer,amount\n1,ann,1.50\n2,,2\nx,bob,3\n1,dup,4\n5,\"eve\"x,5\n6,fay,6\n",
        )])
        .await;
        let mut log = MemoryRejectLog::new();

        let result = Loader::new(&store, &target)
            .load(&request("orders_1.csv", 10), &mut log, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.records_read, 6);
        assert_eq!(result.committed_count, 2);
        assert_eq!(result.rejected_count, 4);
        assert_eq!(
            result.committed_count + result.rejected_count,
            result.records_read
        );

        let reasons: Vec<RejectReason> = log.records.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::NotNullViolation,
                RejectReason::TypeMismatch,
                RejectReason::UniqueViolation,
                RejectReason::ParseError,
            ]
        );
        assert_eq!(log.records[0].line, 3);
        assert_eq!(target.row_count("orders").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_threshold_rolls_back_everything() {
        let target = target().await;
        let store = store(&[(
            "orders_1.csv",
            "id,customer,amount\n1,ann,1\n2,,2\n3,,3\n4,dan,4\n",
        )])
        .await;
        let mut log = MemoryRejectLog::new();

        let err = Loader::new(&store, &target)
            .load(&request("orders_1.csv", 1), &mut log, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrateError::RejectLimitExceeded {
                rejected: 2,
                limit: 1
            }
        ));
        assert_eq!(target.row_count("orders").await.unwrap(), 0);
        assert_eq!(log.records.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_header_columns_load_as_null() {
        let target = target().await;
        let store = store(&[("o.csv", "customer,id\nann,1\n")]).await;
        let mut log = MemoryRejectLog::new();

        Loader::new(&store, &target)
            .load(&request("o.csv", 0), &mut log, &CancellationToken::new())
            .await
            .unwrap();
        let rows = target.rows("orders").await;
        assert_eq!(rows[0].get("amount"), Some(&Value::Null));
        assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_unknown_header_column_is_schema_mismatch() {
        let target = target().await;
        let store = store(&[("o.csv", "id,customer,notes\n1,ann,x\n")]).await;
        let mut log = MemoryRejectLog::new();

        let err = Loader::new(&store, &target)
            .load(&request("o.csv", 0), &mut log, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::TargetSchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_pattern_loads_every_match_in_order() {
        let target = target().await;
        let store = store(&[
            ("orders_2.csv", "id,customer\n2,b\n"),
            ("orders_1.csv", "id,customer\n1,a\n"),
            ("other_1.csv", "id,customer\n9,z\n"),
        ])
        .await;
        let mut log = MemoryRejectLog::new();

        let result = Loader::new(&store, &target)
            .load(&request("orders_*.csv", 0), &mut log, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.shards, vec!["orders_1.csv", "orders_2.csv"]);
        assert_eq!(result.committed_count, 2);
    }

    #[tokio::test]
    async fn test_no_match_loads_nothing() {
        let target = target().await;
        let store = store(&[]).await;
        let mut log = MemoryRejectLog::new();

        let err = Loader::new(&store, &target)
            .load(&request("orders_*.csv", 0), &mut log, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoMatchingArtifact(_)));
    }

    #[tokio::test]
    async fn test_structured_unknown_column_is_rejected() {
        let target = target().await;
        let good = Record::new().with("id", 1i64).with("customer", "a");
        let bad = Record::new()
            .with("id", 2i64)
            .with("customer", "b")
            .with("notes", "x");
        let codec = StructuredCodec;
        let mut payload = codec.serialize(&good).unwrap();
        payload.extend(codec.serialize(&bad).unwrap());
        let store = MemoryObjectStore::new();
        store.put("o.jsonl", Bytes::from(payload)).await.unwrap();

        let mut req = LoadRequest::new(Locator::parse("o.jsonl"), "orders", Format::Structured);
        req.reject_limit = 5;
        let mut log = MemoryRejectLog::new();
        let result = Loader::new(&store, &target)
            .load(&req, &mut log, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.committed_count, 1);
        assert_eq!(log.records[0].reason, RejectReason::UnknownColumn);
    }

    #[tokio::test]
    async fn test_truncate_before_load() {
        let target = target().await;
        let store = store(&[("o.csv", "id,customer\n1,a\n")]).await;
        let cancel = CancellationToken::new();
        let loader = Loader::new(&store, &target);

        loader
            .load(&request("o.csv", 0), &mut MemoryRejectLog::new(), &cancel)
            .await
            .unwrap();
        let mut req = request("o.csv", 0);
        req.truncate_before_load = true;
        let result = loader
            .load(&req, &mut MemoryRejectLog::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(result.rejected_count, 0);
        assert_eq!(target.row_count("orders").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_load_commits_nothing() {
        let target = target().await;
        let store = store(&[("o.csv", "id,customer\n1,a\n")]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Loader::new(&store, &target)
            .load(&request("o.csv", 0), &mut MemoryRejectLog::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert_eq!(target.row_count("orders").await.unwrap(), 0);
    }

    /// Target whose connection drops after a number of inserts.
    struct DroppingTarget {
        inner: MemoryTarget,
        inserts_before_drop: usize,
    }

    struct DroppingSession {
        inner: Box<dyn LoadSession>,
        remaining: usize,
    }

    #[async_trait::async_trait]
    impl TargetStore for DroppingTarget {
        async fn describe(&self, table: &str) -> Result<Schema> {
            self.inner.describe(table).await
        }

        async fn row_count(&self, table: &str) -> Result<u64> {
            self.inner.row_count(table).await
        }

        async fn begin_load(&self, table: &str, schema: &Schema) -> Result<Box<dyn LoadSession>> {
            let inner = self.inner.begin_load(table, schema).await?;
            Ok(Box::new(DroppingSession {
                inner,
                remaining: self.inserts_before_drop,
            }))
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        fn store_type(&self) -> &str {
            "memory"
        }
    }

    #[async_trait::async_trait]
    impl LoadSession for DroppingSession {
        async fn truncate(&mut self) -> Result<()> {
            self.inner.truncate().await
        }

        async fn insert(&mut self, record: &Record) -> Result<InsertOutcome> {
            if self.remaining == 0 {
                return Err(MigrateError::target_unavailable("connection reset by peer"));
            }
            self.remaining -= 1;
            self.inner.insert(record).await
        }

        async fn commit(self: Box<Self>) -> Result<u64> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_unreachable_target_is_target_unavailable() {
        let store = store(&[("o.csv", "id,customer\n1,a\n")]).await;
        let target = MemoryTarget::unreachable("connection refused");
        let mut log = MemoryRejectLog::new();

        let err = Loader::new(&store, &target)
            .load(&request("o.csv", 5), &mut log, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::TargetUnavailable(_)));
        assert!(log.records.is_empty());
    }

    #[tokio::test]
    async fn test_connection_lost_mid_load_commits_nothing() {
        let target = target().await;
        let store = store(&[
            ("seed.csv", "id,customer\n100,seed\n"),
            ("o.csv", "id,customer\n1,a\n2,b\n3,c\n"),
        ])
        .await;
        let cancel = CancellationToken::new();
        Loader::new(&store, &target)
            .load(&request("seed.csv", 0), &mut MemoryRejectLog::new(), &cancel)
            .await
            .unwrap();

        let dropping = DroppingTarget {
            inner: target.clone(),
            inserts_before_drop: 2,
        };
        let err = Loader::new(&store, &dropping)
            .load(&request("o.csv", 5), &mut MemoryRejectLog::new(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::TargetUnavailable(_)));
        assert_eq!(target.row_count("orders").await.unwrap(), 1);
    }
}
