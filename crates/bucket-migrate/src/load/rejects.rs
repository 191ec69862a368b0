//! Reject logs.
//!
//! Every record the loader refuses is written to a [`RejectSink`], including
//! the records of a load that is later rolled back, so a failed run can
//! still be inspected.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::RejectedRecord;
use crate::error::Result;

/// Destination for rejected records.
pub trait RejectSink: Send {
    fn record(&mut self, rejected: &RejectedRecord) -> Result<()>;

    /// Make everything recorded so far durable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reject log kept in memory.
#[derive(Debug, Default)]
pub struct MemoryRejectLog {
    pub records: Vec<RejectedRecord>,
}

impl MemoryRejectLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RejectSink for MemoryRejectLog {
    fn record(&mut self, rejected: &RejectedRecord) -> Result<()> {
        self.records.push(rejected.clone());
        Ok(())
    }
}

/// Reject log written as JSON Lines, one rejected record per line.
pub struct JsonlRejectLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlRejectLog {
    /// Create (or truncate) a reject log file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RejectSink for JsonlRejectLog {
    fn record(&mut self, rejected: &RejectedRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, rejected)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlRejectLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Read back a JSON Lines reject log.
pub fn read_reject_log(path: impl AsRef<Path>) -> Result<Vec<RejectedRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RejectReason;
    use tempfile::TempDir;

    fn rejected(line: u64) -> RejectedRecord {
        RejectedRecord {
            shard: "orders_1.csv".into(),
            line,
            reason: RejectReason::ParseError,
            detail: "embedded line terminator".into(),
            raw: "7,\"a\nb\"".into(),
        }
    }

    #[test]
    fn test_jsonl_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("rejects.jsonl");
        {
            let mut log = JsonlRejectLog::create(&path).unwrap();
            log.record(&rejected(2)).unwrap();
            log.record(&rejected(9)).unwrap();
            log.flush().unwrap();
        }
        let records = read_reject_log(&path).unwrap();
        assert_eq!(records, vec![rejected(2), rejected(9)]);
    }

    #[test]
    fn test_memory_log_collects() {
        let mut log = MemoryRejectLog::new();
        log.record(&rejected(1)).unwrap();
        assert_eq!(log.records.len(), 1);
    }
}
