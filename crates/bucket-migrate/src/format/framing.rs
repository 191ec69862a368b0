//! Splitting shard payloads into raw records.
//!
//! The reader is line-oriented for both formats. For delimited text a
//! physical line that leaves a quote open is joined with the lines after it
//! until the quotes balance. The joined record is returned with a parse
//! error attached: a line-oriented consumer cannot tell an embedded line
//! terminator from a broken row, so the record is rejected rather than
//! repaired.

use super::{CodecError, Format};

/// One raw record cut from a shard.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based physical line where the record starts.
    pub line: u64,

    /// Raw bytes without the trailing terminator.
    pub bytes: Vec<u8>,

    /// Framing problem detected while splitting.
    pub error: Option<CodecError>,
}

impl RawRecord {
    /// Raw bytes as lossy UTF-8, for reject logs.
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Split a shard payload into raw records, header line included.
pub fn split_records(format: Format, data: &[u8]) -> Vec<RawRecord> {
    let mut lines: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    match format {
        Format::Delimited => split_delimited(&lines),
        Format::Structured => lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
            .map(|(i, line)| RawRecord {
                line: i as u64 + 1,
                bytes: line.to_vec(),
                error: None,
            })
            .collect(),
    }
}

fn quote_count(line: &[u8]) -> usize {
    line.iter().filter(|b| **b == b'"').count()
}

fn split_delimited(lines: &[&[u8]]) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let start = i;
        let mut bytes = lines[i].to_vec();
        let mut quotes = quote_count(lines[i]);
        i += 1;

        while quotes % 2 == 1 && i < lines.len() {
            bytes.push(b'\n');
            bytes.extend_from_slice(lines[i]);
            quotes += quote_count(lines[i]);
            i += 1;
        }

        let error = if quotes % 2 == 1 {
            Some(CodecError::parse("unterminated quoted field at end of shard"))
        } else if i - start > 1 {
            Some(CodecError::parse(format!(
                "embedded line terminator: record spans lines {}-{}",
                start + 1,
                i
            )))
        } else {
            None
        };

        records.push(RawRecord {
            line: start as u64 + 1,
            bytes,
            error,
        });
    }

    records
}
