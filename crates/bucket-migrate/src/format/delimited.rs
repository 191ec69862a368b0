//! Comma-separated delimited text.
//!
//! `,` separates fields, `\n` ends a record and `"` quotes a field. Quotes
//! inside a quoted field are doubled. An empty unquoted field is NULL and `""`
//! is the empty string, so the two stay distinguishable after a round trip.
//!
//! Quoting and field splitting are done by the `csv` crate. The codec only
//! decides where NULL goes and checks each field's raw span, which `csv`
//! does not report.

use std::io;

use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};

use crate::core::{Record, Schema, Value};

use super::{CodecError, Format, RecordCodec};

const DELIMITER: u8 = b',';
const QUOTE: u8 = b'"';
const TERMINATOR: u8 = b'\n';

/// Codec for delimited-text shards with a fixed column layout.
///
/// The schema gives both the field order and the type each field is parsed
/// as. On the load side it is built from the shard header, typed by the
/// target's columns.
#[derive(Debug, Clone)]
pub struct DelimitedCodec {
    schema: Schema,
}

impl DelimitedCodec {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl RecordCodec for DelimitedCodec {
    fn format(&self) -> Format {
        Format::Delimited
    }

    fn header(&self) -> io::Result<Option<Vec<u8>>> {
        let names = self.schema.columns.iter().map(|c| Some(c.name.as_bytes()));
        encode_line(names).map(Some)
    }

    fn serialize(&self, record: &Record) -> io::Result<Vec<u8>> {
        let texts: Vec<Option<String>> = self
            .schema
            .columns
            .iter()
            .map(|col| record.get(&col.name).and_then(Value::to_text))
            .collect();
        encode_line(texts.iter().map(|t| t.as_deref().map(str::as_bytes)))
    }

    fn deserialize(&self, raw: &[u8]) -> Result<Record, CodecError> {
        let fields = decode_line(raw)?;
        if fields.len() != self.schema.len() {
            return Err(CodecError::parse(format!(
                "expected {} fields, found {}",
                self.schema.len(),
                fields.len()
            )));
        }

        let mut record = Record::new();
        for (col, field) in self.schema.columns.iter().zip(fields) {
            let value = if field.is_null() {
                Value::Null
            } else {
                Value::parse_text(&field.text, col.column_type).ok_or_else(|| {
                    CodecError::type_mismatch(format!(
                        "column '{}': '{}' is not a valid {}",
                        col.name, field.text, col.column_type
                    ))
                })?
            };
            record.push(col.name.clone(), value);
        }
        Ok(record)
    }
}

/// Parse a header line into column names.
pub fn parse_header(raw: &[u8]) -> Result<Vec<String>, CodecError> {
    Ok(decode_line(raw)?
        .into_iter()
        .map(|f| f.text.trim().to_string())
        .collect())
}

/// One parsed field.
#[derive(Debug, Clone, PartialEq)]
struct Field {
    text: String,
    quoted: bool,
}

impl Field {
    fn is_null(&self) -> bool {
        !self.quoted && self.text.is_empty()
    }
}

/// Encode one line, terminator included. `None` is written as an empty
/// unquoted field.
///
/// Every present field is written as a single-field record, for which `csv`
/// quotes an empty value as `""`. The encoded spans are then joined into one
/// line.
fn encode_line<'a, I>(fields: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = Option<&'a [u8]>>,
{
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(TERMINATOR))
        .from_writer(Vec::new());

    let mut ends = Vec::new();
    for field in fields {
        match field {
            Some(bytes) => {
                wtr.write_record([bytes])?;
                wtr.flush()?;
                ends.push(Some(wtr.get_ref().len()));
            }
            None => ends.push(None),
        }
    }
    let encoded = wtr.into_inner().map_err(|e| e.into_error())?;

    let mut line = Vec::with_capacity(encoded.len() + ends.len());
    let mut start = 0;
    for (i, end) in ends.into_iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        if let Some(end) = end {
            // Drop the single-field record's own terminator.
            line.extend_from_slice(&encoded[start..end - 1]);
            start = end;
        }
    }
    line.push(TERMINATOR);
    Ok(line)
}

/// Split one raw record (without terminator) into fields.
fn decode_line(raw: &[u8]) -> Result<Vec<Field>, CodecError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(TERMINATOR))
        .from_reader(raw);

    let mut record = ByteRecord::new();
    let found = rdr
        .read_byte_record(&mut record)
        .map_err(|e| CodecError::parse(e.to_string()))?;
    if !found {
        // An empty line is a single NULL field.
        record.push_field(b"");
    } else if rdr
        .read_byte_record(&mut ByteRecord::new())
        .map_err(|e| CodecError::parse(e.to_string()))?
    {
        return Err(CodecError::parse("more than one record on the line"));
    }

    let quoted = quoted_fields(raw, &record)?;
    record
        .iter()
        .zip(quoted)
        .enumerate()
        .map(|(i, (bytes, quoted))| -> Result<Field, CodecError> {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| CodecError::parse(format!("field {}: invalid UTF-8: {}", i + 1, e)))?;
            Ok(Field {
                text: text.to_string(),
                quoted,
            })
        })
        .collect()
}

/// Whether each decoded field was quoted in `raw`.
///
/// Walks the raw spans the decoded fields must occupy. A span that does not
/// end on a delimiter, or a quoted span that does not end on its closing
/// quote, means the line had stray bytes that `csv` accepted leniently.
fn quoted_fields(raw: &[u8], record: &ByteRecord) -> Result<Vec<bool>, CodecError> {
    let mut quoted = Vec::with_capacity(record.len());
    let mut pos = 0;

    for (i, field) in record.iter().enumerate() {
        if i > 0 {
            pos += 1;
        }
        let is_quoted = raw.get(pos) == Some(&QUOTE);
        let width = if is_quoted {
            field.len() + 2 + field.iter().filter(|b| **b == QUOTE).count()
        } else {
            field.len()
        };
        let end = pos + width;

        let malformed = end > raw.len()
            || (is_quoted && raw[end - 1] != QUOTE)
            || raw.get(end).is_some_and(|b| *b != DELIMITER);
        if malformed {
            return Err(CodecError::parse(format!(
                "field {}: unexpected data around quotes",
                i + 1
            )));
        }

        quoted.push(is_quoted);
        pos = end;
    }

    if pos != raw.len() {
        return Err(CodecError::parse("unexpected data at end of line"));
    }
    Ok(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType, RejectReason};
    use chrono::NaiveDate;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Integer).primary_key(),
            Column::new("customer", ColumnType::Text),
            Column::new("amount", ColumnType::Decimal),
            Column::new("placed_at", ColumnType::Timestamp),
            Column::new("paid", ColumnType::Boolean),
        ])
    }

    fn record(id: i64, customer: Option<&str>) -> Record {
        let placed = NaiveDate::from_ymd_opt(2025, 1, 31)
            .unwrap()
            .and_hms_micro_opt(8, 0, 1, 250)
            .unwrap();
        Record::new()
            .with("id", id)
            .with("customer", customer)
            .with("amount", Value::Decimal("19.90".parse().unwrap()))
            .with("placed_at", placed)
            .with("paid", true)
    }

    fn strip_terminator(mut bytes: Vec<u8>) -> Vec<u8> {
        assert_eq!(bytes.pop(), Some(b'\n'));
        bytes
    }

    #[test]
    fn test_header_line() {
        let codec = DelimitedCodec::new(schema());
        assert_eq!(
            codec.header().unwrap().unwrap(),
            b"id,customer,amount,placed_at,paid\n".to_vec()
        );
    }

    #[test]
    fn test_round_trip_with_delimiters_and_quotes() {
        let codec = DelimitedCodec::new(schema());
        for customer in [
            Some("plain"),
            Some("Smith, \"Jo\""),
            Some(""),
            Some("tab\there"),
            None,
        ] {
            let original = record(7, customer);
            let bytes = strip_terminator(codec.serialize(&original).unwrap());
            assert_eq!(codec.deserialize(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_null_and_empty_string_are_distinct() {
        let codec = DelimitedCodec::new(schema());
        let null = codec.serialize(&record(1, None)).unwrap();
        let empty = codec.serialize(&record(1, Some(""))).unwrap();
        assert!(String::from_utf8(null).unwrap().starts_with("1,,"));
        assert!(String::from_utf8(empty).unwrap().starts_with("1,\"\","));
    }

    #[test]
    fn test_wrong_field_count_is_parse_error() {
        let codec = DelimitedCodec::new(schema());
        let err = codec.deserialize(b"1,ann").unwrap_err();
        assert_eq!(err.reason, RejectReason::ParseError);
    }

    #[test]
    fn test_bad_integer_is_type_mismatch() {
        let codec = DelimitedCodec::new(schema());
        let err = codec
            .deserialize(b"x1,ann,1.00,2025-01-31 08:00:01,true")
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::TypeMismatch);
        assert!(err.detail.contains("'id'"));
    }

    #[test]
    fn test_stray_quote_is_parse_error() {
        let codec = DelimitedCodec::new(schema());
        let err = codec
            .deserialize(b"1,\"ann\"x,1.00,2025-01-31 08:00:01,true")
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::ParseError);
    }

    #[test]
    fn test_parse_header_trims_names() {
        assert_eq!(
            parse_header(b"id, customer ,\"odd,name\"").unwrap(),
            vec!["id", "customer", "odd,name"]
        );
    }

    #[test]
    fn test_trailing_delimiter_yields_null_field() {
        let schema = Schema::new(vec![
            Column::new("a", ColumnType::Text),
            Column::new("b", ColumnType::Text),
        ]);
        let codec = DelimitedCodec::new(schema);
        let rec = codec.deserialize(b"x,").unwrap();
        assert_eq!(rec.get("b"), Some(&Value::Null));
    }

    #[test]
    fn test_round_trip_edge_values() {
        let codec = DelimitedCodec::new(schema());
        let placed = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 123_456_789)
            .unwrap();
        let edge = Record::new()
            .with("id", i64::MIN)
            .with("customer", " lead\rcr \"q\" ,")
            .with("amount", Value::Decimal("-0.0000000001".parse().unwrap()))
            .with("placed_at", placed)
            .with("paid", false);
        let all_null = Record::new()
            .with("id", Value::Null)
            .with("customer", Value::Null)
            .with("amount", Value::Null)
            .with("placed_at", Value::Null)
            .with("paid", Value::Null);

        for original in [edge, all_null] {
            let bytes = strip_terminator(codec.serialize(&original).unwrap());
            assert_eq!(codec.deserialize(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_single_column_null_and_empty_string() {
        let codec = DelimitedCodec::new(Schema::new(vec![Column::new("note", ColumnType::Text)]));
        let null = Record::new().with("note", Value::Null);
        let empty = Record::new().with("note", "");

        assert_eq!(codec.serialize(&null).unwrap(), b"\n".to_vec());
        assert_eq!(codec.serialize(&empty).unwrap(), b"\"\"\n".to_vec());
        assert_eq!(codec.deserialize(b"").unwrap(), null);
        assert_eq!(codec.deserialize(b"\"\"").unwrap(), empty);
    }

    #[test]
    fn test_quotes_are_doubled() {
        let codec = DelimitedCodec::new(Schema::new(vec![
            Column::new("a", ColumnType::Text),
            Column::new("b", ColumnType::Integer),
        ]));
        let rec = Record::new().with("a", "say \"hi\", ok").with("b", 3i64);
        assert_eq!(
            codec.serialize(&rec).unwrap(),
            b"\"say \"\"hi\"\", ok\",3\n".to_vec()
        );
    }
}
