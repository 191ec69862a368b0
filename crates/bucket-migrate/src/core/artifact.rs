//! Staged artifact description produced by extraction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::schema::Schema;
use crate::format::Format;

/// One object written to staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Object name within the bucket.
    pub name: String,

    /// Records serialized into the shard.
    pub records: u64,

    /// Payload size in bytes, header included.
    pub bytes: u64,
}

/// The set of shards one extraction wrote, plus what is known about them.
///
/// Write-once: an artifact describes objects that are never modified after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedArtifact {
    /// Destination name the shard names are derived from.
    pub destination: String,

    pub format: Format,

    /// Schema of the staged records (after any projection).
    pub schema: Schema,

    pub shards: Vec<ShardInfo>,

    /// Count reported by the source for the query.
    pub source_count: u64,

    /// Records actually streamed and written.
    pub records_written: u64,

    /// Large-text columns projected out of the staged schema.
    #[serde(default)]
    pub dropped_columns: Vec<String>,

    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl StagedArtifact {
    /// Names of all shards, in write order.
    pub fn shard_names(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.name.clone()).collect()
    }

    /// Total payload bytes across shards.
    pub fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes).sum()
    }
}

/// Serialize durations as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
