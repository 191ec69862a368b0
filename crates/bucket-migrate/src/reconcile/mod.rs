//! Reconciliation of source and target counts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::artifact::duration_ms;
use crate::load::LoadResult;

/// Classification of a finished migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Every source record was committed.
    Complete,
    /// Some, but not all, source records were committed.
    Partial,
    /// Nothing was committed from a non-empty source.
    Failed,
    /// The source returned no records.
    Empty,
}

impl MigrationStatus {
    /// Process exit code for this status.
    pub fn exit_code(self) -> u8 {
        match self {
            MigrationStatus::Complete | MigrationStatus::Empty => 0,
            MigrationStatus::Partial => 1,
            MigrationStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Complete => write!(f, "complete"),
            MigrationStatus::Partial => write!(f, "partial"),
            MigrationStatus::Failed => write!(f, "failed"),
            MigrationStatus::Empty => write!(f, "empty"),
        }
    }
}

/// Final report of one migration job. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source_count: u64,
    /// Records committed by the load operation.
    pub target_count: u64,
    pub rejected_count: u64,
    #[serde(with = "duration_ms")]
    pub elapsed_extract: Duration,
    #[serde(with = "duration_ms")]
    pub elapsed_load: Duration,
    pub status: MigrationStatus,
}

impl MigrationReport {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Classify counts into a status.
pub fn classify(source_count: u64, target_count: u64) -> MigrationStatus {
    if source_count == 0 {
        MigrationStatus::Empty
    } else if target_count == source_count {
        MigrationStatus::Complete
    } else if target_count == 0 {
        MigrationStatus::Failed
    } else {
        MigrationStatus::Partial
    }
}

/// Build the report for a finished load. Performs no I/O.
pub fn reconcile(
    source_count: u64,
    load: &LoadResult,
    elapsed_extract: Duration,
) -> MigrationReport {
    MigrationReport {
        source_count,
        target_count: load.committed_count,
        rejected_count: load.rejected_count,
        elapsed_extract,
        elapsed_load: load.elapsed,
        status: classify(source_count, load.committed_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(committed: u64, rejected: u64) -> LoadResult {
        LoadResult {
            committed_count: committed,
            rejected_count: rejected,
            records_read: committed + rejected,
            shards: vec!["orders_1.csv".into()],
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(5, 5), MigrationStatus::Complete);
        assert_eq!(classify(10, 9), MigrationStatus::Partial);
        assert_eq!(classify(10, 0), MigrationStatus::Failed);
        assert_eq!(classify(0, 0), MigrationStatus::Empty);
    }

    #[test]
    fn test_empty_source_wins() {
        let report = reconcile(0, &load(0, 0), Duration::ZERO);
        assert_eq!(report.status, MigrationStatus::Empty);
        assert_eq!(report.status.exit_code(), 0);
    }

    #[test]
    fn test_partial_report() {
        let report = reconcile(10, &load(9, 1), Duration::from_millis(3));
        assert_eq!(report.target_count, 9);
        assert_eq!(report.rejected_count, 1);
        assert_eq!(report.elapsed_load, Duration::from_millis(12));
        assert_eq!(report.status, MigrationStatus::Partial);
        assert_eq!(report.status.exit_code(), 1);
    }

    #[test]
    fn test_report_json() {
        let report = reconcile(5, &load(5, 0), Duration::from_millis(7));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"complete\""));
        assert!(json.contains("\"elapsed_extract\": 7"));
    }
}
