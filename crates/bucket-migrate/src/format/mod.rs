//! Staged record formats.
//!
//! A shard is a byte payload holding a sequence of serialized records.
//! [`framing::split_records`] cuts a shard into raw records and a
//! [`RecordCodec`] turns each raw record back into a [`Record`].
//!
//! Two formats exist:
//!
//! - [`Format::Delimited`]: comma-separated text with a header line. Compact
//!   and widely readable, but values containing line terminators do not
//!   survive a line-oriented reader.
//! - [`Format::Structured`]: JSON Lines. Self-describing and type-preserving
//!   for every value.

pub mod delimited;
pub mod framing;
pub mod structured;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{RejectReason, Record, Schema};

pub use delimited::DelimitedCodec;
pub use framing::{split_records, RawRecord};
pub use structured::StructuredCodec;

/// Staging format of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    #[default]
    Delimited,
    Structured,
}

impl Format {
    /// File extension used in shard names.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Delimited => "csv",
            Format::Structured => "jsonl",
        }
    }

    /// Whether the format can carry large-text values without loss.
    pub fn carries_large_text(self) -> bool {
        matches!(self, Format::Structured)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Delimited => f.write_str("delimited"),
            Format::Structured => f.write_str("structured"),
        }
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delimited" | "csv" => Ok(Format::Delimited),
            "structured" | "jsonl" | "json" => Ok(Format::Structured),
            other => Err(format!(
                "unknown format '{}' (expected delimited or structured)",
                other
            )),
        }
    }
}

/// A record-level decode failure, classified for the reject log.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}: {detail}")]
pub struct CodecError {
    pub reason: RejectReason,
    pub detail: String,
}

impl CodecError {
    pub fn parse(detail: impl Into<String>) -> Self {
        Self {
            reason: RejectReason::ParseError,
            detail: detail.into(),
        }
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Self {
            reason: RejectReason::TypeMismatch,
            detail: detail.into(),
        }
    }
}

/// Encode and decode single records for one staging format.
pub trait RecordCodec: Send + Sync {
    /// The format this codec speaks.
    fn format(&self) -> Format;

    /// Preamble written at the start of every shard, if any.
    fn header(&self) -> std::io::Result<Option<Vec<u8>>>;

    /// Serialize one record, including its record terminator.
    fn serialize(&self, record: &Record) -> std::io::Result<Vec<u8>>;

    /// Deserialize one raw record (without terminator).
    fn deserialize(&self, raw: &[u8]) -> std::result::Result<Record, CodecError>;
}

/// Build the codec for a format and record layout.
pub fn codec_for(format: Format, schema: &Schema) -> Box<dyn RecordCodec> {
    match format {
        Format::Delimited => Box::new(DelimitedCodec::new(schema.clone())),
        Format::Structured => Box::new(StructuredCodec),
    }
}
