//! JSON Lines structured format.
//!
//! Each line is one JSON object carrying the record's ordered fields with
//! their value types. Line terminators inside text are escaped by JSON, so a
//! line splitter can never cut a record in two.

use std::io;

use crate::core::Record;

use super::{CodecError, Format, RecordCodec};

/// Codec for structured (JSON Lines) shards.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredCodec;

impl RecordCodec for StructuredCodec {
    fn format(&self) -> Format {
        Format::Structured
    }

    fn header(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn serialize(&self, record: &Record) -> io::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        Ok(line)
    }

    fn deserialize(&self, raw: &[u8]) -> Result<Record, CodecError> {
        serde_json::from_slice(raw).map_err(|e| CodecError::parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RejectReason, Value};
    use chrono::NaiveDate;

    #[test]
    fn test_round_trip_preserves_large_text() {
        let placed = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let original = Record::new()
            .with("id", 1i64)
            .with("notes", "line one\nline two,\r\n\"quoted\"")
            .with("metadata_json", r#"{"k": [1, 2]}"#)
            .with("amount", Value::Decimal("0.001".parse().unwrap()))
            .with("placed_at", placed)
            .with("flag", Value::Null);

        let codec = StructuredCodec;
        let mut bytes = codec.serialize(&original).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        bytes.pop();
        assert_eq!(codec.deserialize(&bytes).unwrap(), original);
    }

    #[test]
    fn test_no_header() {
        assert!(StructuredCodec.header().unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_parse_error() {
        let err = StructuredCodec.deserialize(b"{\"fields\": [").unwrap_err();
        assert_eq!(err.reason, RejectReason::ParseError);
    }
}
