//! Byte-level encoding of telemetry records.
//!
//! Every record is written as its tag followed by its fields, each pair
//! separated by [`VALUE_SEPARATOR`], and terminated by [`RECORD_SEPARATOR`].
//! There is no length prefix: a reader splits the stream on the record
//! separator first and then on the value separator, taking token 0 as the tag.
//!
//! ```text
//! PROTOCOL\0 1 \0 1700000000000 \x1e TEST\0 suite \0 method \0 case \x1e ...
//! ```

use thiserror::Error;

use crate::record::{Record, RecordKind};

pub const VALUE_SEPARATOR: u8 = 0x00;
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Errors produced while decoding a record stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("record {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },
    #[error("unknown record kind '{0}'")]
    UnknownKind(String),
    #[error("{kind} record expects {expected} fields, got {actual}")]
    FieldCount { kind: RecordKind, expected: usize, actual: usize },
    #[error("{kind} record has invalid number '{value}'")]
    InvalidNumber { kind: RecordKind, value: String },
    #[error("invalid boolean '{0}', expected 'true' or 'false'")]
    InvalidBool(String),
}

/// A record split into its tag and fields without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: String,
    pub fields: Vec<String>,
}

impl From<&Record> for RawRecord {
    fn from(record: &Record) -> Self {
        Self {
            kind: record.kind().as_str().to_string(),
            fields: record.fields(),
        }
    }
}

/// Appends the encoded form of `record` to `buffer`.
pub fn encode_record(record: &Record, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(record.kind().as_str().as_bytes());
    for field in record.fields() {
        buffer.push(VALUE_SEPARATOR);
        buffer.extend_from_slice(field.as_bytes());
    }
    buffer.push(RECORD_SEPARATOR);
}

pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for record in records {
        encode_record(record, &mut buffer);
    }
    buffer
}

/// Splits a stream into raw records. Empty chunks, such as the one after the
/// final separator, are skipped.
pub fn decode_raw(bytes: &[u8]) -> Result<Vec<RawRecord>, WireError> {
    bytes
        .split(|byte| *byte == RECORD_SEPARATOR)
        .filter(|chunk| !chunk.is_empty())
        .enumerate()
        .map(|(index, chunk)| {
            let text = std::str::from_utf8(chunk).map_err(|_| WireError::InvalidUtf8 { index })?;
            let mut tokens = text.split(VALUE_SEPARATOR as char).map(str::to_string);
            let kind = tokens.next().unwrap_or_default();
            Ok(RawRecord {
                kind,
                fields: tokens.collect(),
            })
        })
        .collect()
}

pub fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, WireError> {
    decode_raw(bytes)?.into_iter().map(Record::try_from).collect()
}

impl TryFrom<RawRecord> for Record {
    type Error = WireError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let kind: RecordKind = raw.kind.parse()?;
        if raw.fields.len() != kind.field_count() {
            return Err(WireError::FieldCount {
                kind,
                expected: kind.field_count(),
                actual: raw.fields.len(),
            });
        }

        let mut fields = raw.fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();

        let record = match kind {
            RecordKind::Protocol => {
                let version = next();
                let start = next();
                Record::Protocol {
                    version: version
                        .parse()
                        .map_err(|_| WireError::InvalidNumber { kind, value: version.clone() })?,
                    start_epoch_ms: start
                        .parse()
                        .map_err(|_| WireError::InvalidNumber { kind, value: start.clone() })?,
                }
            }
            RecordKind::Test => Record::Test {
                suite_name: next(),
                method_name: next(),
                case_id: next(),
            },
            RecordKind::ActivityStart => Record::ActivityStart {
                activity_id: next(),
                instance_id: next(),
            },
            RecordKind::ActivityEnd => Record::ActivityEnd {
                activity_id: next(),
                instance_id: next(),
            },
            RecordKind::TestResult => Record::TestResult {
                success: parse_bool(&next())?,
            },
        };
        Ok(record)
    }
}

fn parse_bool(value: &str) -> Result<bool, WireError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(WireError::InvalidBool(other.to_string())),
    }
}
