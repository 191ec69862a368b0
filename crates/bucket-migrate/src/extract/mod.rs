//! Extraction: source query to staged shards.
//!
//! The extractor describes and counts the query, streams its records and
//! writes them to object storage as one or more shards. Shard names are
//! derived from the destination, a 1-based shard index and the UTC write
//! time, e.g. `orders_1_20251216T132352037130Z.csv`.

use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{ObjectStore, Record, Schema, ShardInfo, SourceStore, StagedArtifact};
use crate::error::{MigrateError, Result};
use crate::format::{codec_for, Format, RecordCodec};

/// Timestamp layout used in shard names.
pub const SHARD_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// What to do with large-text columns when the format cannot carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LargeTextPolicy {
    /// Fail with `UnsupportedColumnsForFormat`.
    #[default]
    Refuse,
    /// Drop the columns from the staged schema (lossy).
    ProjectOut,
    /// Write them anyway. Records whose values contain line terminators
    /// will be rejected on load.
    Force,
}

impl std::str::FromStr for LargeTextPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "refuse" => Ok(LargeTextPolicy::Refuse),
            "project_out" => Ok(LargeTextPolicy::ProjectOut),
            "force" => Ok(LargeTextPolicy::Force),
            other => Err(format!(
                "unknown large-text policy '{}' (expected refuse, project-out or force)",
                other
            )),
        }
    }
}

/// Parameters of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub query: String,
    pub destination: String,
    pub format: Format,
    /// Maximum records per shard. `None` writes a single shard, which
    /// holds the whole encoded result in memory until the stream ends.
    /// Set a bound for large tables.
    pub shard_size: Option<u64>,
    pub large_text: LargeTextPolicy,
    /// Records per batch requested from the source.
    pub batch_size: usize,
}

impl ExtractRequest {
    pub fn new(query: impl Into<String>, destination: impl Into<String>, format: Format) -> Self {
        Self {
            query: query.into(),
            destination: destination.into(),
            format,
            shard_size: None,
            large_text: LargeTextPolicy::default(),
            batch_size: 1000,
        }
    }
}

/// Build a shard object name.
pub fn shard_name(destination: &str, worker: usize, at: DateTime<Utc>, format: Format) -> String {
    format!(
        "{}_{}_{}.{}",
        destination,
        worker,
        at.format(SHARD_TIMESTAMP_FORMAT),
        format.extension()
    )
}

/// Decide the staged schema for a source schema, format and policy.
///
/// Returns the staged schema and the names of columns dropped from it.
pub fn plan_staged_schema(
    schema: &Schema,
    format: Format,
    policy: LargeTextPolicy,
) -> Result<(Schema, Vec<String>)> {
    let large = schema.large_text_columns();
    if format.carries_large_text() || large.is_empty() {
        return Ok((schema.clone(), Vec::new()));
    }

    match policy {
        LargeTextPolicy::Refuse => Err(MigrateError::UnsupportedColumnsForFormat {
            format: format.to_string(),
            columns: large,
        }),
        LargeTextPolicy::ProjectOut => {
            warn!(
                "Projecting out large-text columns [{}]; their data will not be staged",
                large.join(", ")
            );
            Ok((schema.without(&large), large))
        }
        LargeTextPolicy::Force => {
            warn!(
                "Writing large-text columns [{}] as {}; values containing line terminators \
                 will be rejected on load",
                large.join(", "),
                format
            );
            Ok((schema.clone(), Vec::new()))
        }
    }
}

/// Accumulates records and writes shards.
struct ShardWriter<'a> {
    store: &'a dyn ObjectStore,
    codec: Box<dyn RecordCodec>,
    destination: String,
    format: Format,
    shard_size: Option<u64>,
    buffer: Vec<u8>,
    buffered: u64,
    last_timestamp: Option<DateTime<Utc>>,
    shards: Vec<ShardInfo>,
}

impl<'a> ShardWriter<'a> {
    fn new(store: &'a dyn ObjectStore, req: &ExtractRequest, schema: &Schema) -> Self {
        Self {
            store,
            codec: codec_for(req.format, schema),
            destination: req.destination.clone(),
            format: req.format,
            shard_size: req.shard_size.filter(|n| *n > 0),
            buffer: Vec::new(),
            buffered: 0,
            last_timestamp: None,
            shards: Vec::new(),
        }
    }

    /// Shard timestamps are strictly increasing within one extraction.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    async fn write(&mut self, record: &Record) -> Result<()> {
        self.buffer.extend(self.codec.serialize(record)?);
        self.buffered += 1;
        if self.shard_size.is_some_and(|max| self.buffered >= max) {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let mut payload = self.codec.header()?.unwrap_or_default();
        payload.append(&mut self.buffer);

        let at = self.next_timestamp();
        let name = shard_name(&self.destination, self.shards.len() + 1, at, self.format);
        let bytes = payload.len() as u64;
        self.store.put(&name, Bytes::from(payload)).await?;

        debug!("Wrote shard {} ({} records, {} bytes)", name, self.buffered, bytes);
        self.shards.push(ShardInfo {
            name,
            records: self.buffered,
            bytes,
        });
        self.buffered = 0;
        Ok(())
    }

    /// Flush the tail. An empty extraction still produces one shard.
    async fn finish(mut self) -> Result<Vec<ShardInfo>> {
        if self.buffered > 0 || self.shards.is_empty() {
            self.flush().await?;
        }
        Ok(self.shards)
    }
}

/// Runs extractions from a source store into an object store.
pub struct Extractor<'a> {
    source: &'a dyn SourceStore,
    store: &'a dyn ObjectStore,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn SourceStore, store: &'a dyn ObjectStore) -> Self {
        Self { source, store }
    }

    /// Run the query and stage its records.
    ///
    /// On cancellation, shards already written remain in storage.
    pub async fn extract(
        &self,
        req: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        info!(
            "Extracting from {} source into '{}' ({})",
            self.source.store_type(),
            req.destination,
            req.format
        );

        let source_schema = self.source.describe(&req.query).await?;
        let (schema, dropped_columns) =
            plan_staged_schema(&source_schema, req.format, req.large_text)?;
        let staged_names = schema.names();
        let source_count = self.source.count(&req.query).await?;

        let mut writer = ShardWriter::new(self.store, req, &schema);
        let mut rx = self.source.read(&req.query, req.batch_size);
        let mut written = 0u64;

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        "Extraction cancelled after {} records; {} shards already staged",
                        written,
                        writer.shards.len()
                    );
                    return Err(MigrateError::Cancelled);
                }
                batch = rx.recv() => batch,
            };

            let Some(batch) = batch else {
                break;
            };
            let batch = batch?;
            let is_last = batch.is_last;

            for record in batch.records {
                let record = if dropped_columns.is_empty() {
                    record
                } else {
                    record.project(&staged_names)
                };
                writer.write(&record).await?;
                written += 1;
            }

            if is_last {
                break;
            }
        }

        let shards = writer.finish().await?;

        if written != source_count {
            warn!(
                "Source drift: count query returned {} but {} records were streamed",
                source_count, written
            );
        }

        let artifact = StagedArtifact {
            destination: req.destination.clone(),
            format: req.format,
            schema,
            shards,
            source_count,
            records_written: written,
            dropped_columns,
            elapsed: started.elapsed(),
        };

        info!(
            "Extracted {} records into {} shard(s), {} bytes in {:.2}s",
            artifact.records_written,
            artifact.shards.len(),
            artifact.total_bytes(),
            artifact.elapsed.as_secs_f64()
        );

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType};
    use crate::drivers::MemorySource;
    use crate::core::Batch;
    use crate::storage::{AccessGrant, MemoryObjectStore};
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn orders_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Integer).primary_key(),
            Column::new("customer", ColumnType::Text),
            Column::new("notes", ColumnType::LargeText),
        ])
    }

    fn source(rows: i64) -> MemorySource {
        let records = (1..=rows)
            .map(|i| {
                Record::new()
                    .with("id", i)
                    .with("customer", format!("c{}", i))
                    .with("notes", "some notes")
            })
            .collect();
        MemorySource::new().with_table("orders", orders_schema(), records)
    }

    #[test]
    fn test_shard_name_format() {
        let at = Utc
            .with_ymd_and_hms(2025, 12, 16, 13, 23, 52)
            .unwrap()
            + Duration::microseconds(37_130);
        assert_eq!(
            shard_name("customer_orders_clean", 1, at, Format::Delimited),
            "customer_orders_clean_1_20251216T132352037130Z.csv"
        );
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "project-out".parse::<LargeTextPolicy>().unwrap(),
            LargeTextPolicy::ProjectOut
        );
        assert!("lossy".parse::<LargeTextPolicy>().is_err());
    }

    #[test]
    fn test_refuse_lists_large_text_columns() {
        let err = plan_staged_schema(&orders_schema(), Format::Delimited, LargeTextPolicy::Refuse)
            .unwrap_err();
        match err {
            MigrateError::UnsupportedColumnsForFormat { columns, .. } => {
                assert_eq!(columns, vec!["notes"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_structured_ignores_policy() {
        let (schema, dropped) =
            plan_staged_schema(&orders_schema(), Format::Structured, LargeTextPolicy::Refuse)
                .unwrap();
        assert_eq!(schema.len(), 3);
        assert!(dropped.is_empty());
    }

    #[tokio::test]
    async fn test_extract_refuses_before_writing() {
        let source = source(3);
        let store = MemoryObjectStore::new();
        let req = ExtractRequest::new("SELECT * FROM orders", "orders", Format::Delimited);
        let err = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::UnsupportedColumnsForFormat { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_project_out_drops_columns() {
        let source = source(3);
        let store = MemoryObjectStore::new();
        let mut req = ExtractRequest::new("SELECT * FROM orders", "orders", Format::Delimited);
        req.large_text = LargeTextPolicy::ProjectOut;

        let artifact = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifact.dropped_columns, vec!["notes"]);
        assert_eq!(artifact.schema.names(), vec!["id", "customer"]);

        let data = store.get(&artifact.shards[0].name).await.unwrap();
        assert!(data.starts_with(b"id,customer\n1,c1\n"));
    }

    #[tokio::test]
    async fn test_shard_size_splits_output() {
        let source = source(5);
        let store = MemoryObjectStore::new();
        let mut req = ExtractRequest::new("SELECT id, customer FROM orders", "orders", Format::Delimited);
        req.shard_size = Some(2);
        req.batch_size = 3;

        let artifact = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap();
        let counts: Vec<u64> = artifact.shards.iter().map(|s| s.records).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(artifact.records_written, 5);
        assert_eq!(artifact.source_count, 5);

        let names = artifact.shard_names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names[0].starts_with("orders_1_"));
        assert!(names[2].starts_with("orders_3_"));
    }

    #[tokio::test]
    async fn test_empty_result_writes_header_only_shard() {
        let source = source(0);
        let store = MemoryObjectStore::new();
        let req = ExtractRequest::new("SELECT id FROM orders", "orders", Format::Delimited);

        let artifact = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifact.shards.len(), 1);
        assert_eq!(artifact.source_count, 0);
        let data = store.get(&artifact.shards[0].name).await.unwrap();
        assert_eq!(&data[..], b"id\n");
    }

    #[tokio::test]
    async fn test_expired_grant_is_write_rejected() {
        let source = source(1);
        let store = MemoryObjectStore::with_grant(AccessGrant::ephemeral(Duration::seconds(-1)));
        let req = ExtractRequest::new("SELECT id FROM orders", "orders", Format::Structured);
        let err = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::WriteRejected { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_source() {
        let source = MemorySource::unreachable("connection refused");
        let store = MemoryObjectStore::new();
        let req = ExtractRequest::new("SELECT id FROM orders", "orders", Format::Structured);
        let err = Extractor::new(&source, &store)
            .extract(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = source(1);
        let store = MemoryObjectStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = ExtractRequest::new("SELECT id FROM orders", "orders", Format::Structured);
        let err = Extractor::new(&source, &store)
            .extract(&req, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
    }

    /// Source that hands out one batch, then cancels once it has been taken.
    struct CancellingSource {
        inner: MemorySource,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl SourceStore for CancellingSource {
        async fn describe(&self, query: &str) -> Result<Schema> {
            self.inner.describe(query).await
        }

        async fn count(&self, query: &str) -> Result<u64> {
            self.inner.count(query).await
        }

        fn read(&self, _query: &str, _batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
            let (tx, rx) = mpsc::channel(1);
            let cancel = self.cancel.clone();
            let first: Vec<Record> = (1..=3i64).map(|i| Record::new().with("id", i)).collect();
            tokio::spawn(async move {
                if tx.send(Ok(Batch::new(first))).await.is_err() {
                    return;
                }
                // Capacity only frees up once the extractor took the batch.
                if let Ok(permit) = tx.reserve().await {
                    drop(permit);
                }
                cancel.cancel();
                tx.closed().await;
            });
            rx
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn store_type(&self) -> &str {
            "memory"
        }
    }

    #[tokio::test]
    async fn test_cancelled_mid_stream_leaves_whole_shards() {
        let cancel = CancellationToken::new();
        let source = CancellingSource {
            inner: source(5),
            cancel: cancel.clone(),
        };
        let store = MemoryObjectStore::new();
        let mut req = ExtractRequest::new("SELECT id FROM orders", "orders", Format::Delimited);
        req.shard_size = Some(2);

        let err = Extractor::new(&source, &store)
            .extract(&req, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));

        // Three records arrived: one full shard of two, the third was never flushed.
        let names = store.list("orders_").await.unwrap();
        assert_eq!(names.len(), 1);
        let data = store.get(&names[0]).await.unwrap();
        assert_eq!(&data[..], b"id\n1\n2\n");
    }
}
