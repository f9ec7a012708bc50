//! Telemetry records emitted during one test run.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Version written into every `PROTOCOL` record.
pub const PROTOCOL_VERSION: u32 = 1;

/// Tag identifying the variant of a [`Record`] on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Protocol,
    Test,
    ActivityStart,
    ActivityEnd,
    TestResult,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Protocol => "PROTOCOL",
            RecordKind::Test => "TEST",
            RecordKind::ActivityStart => "ACTIVITY_START",
            RecordKind::ActivityEnd => "ACTIVITY_END",
            RecordKind::TestResult => "TEST_RESULT",
        }
    }

    /// Number of fields following the tag.
    pub fn field_count(self) -> usize {
        match self {
            RecordKind::Protocol => 2,
            RecordKind::Test => 3,
            RecordKind::ActivityStart | RecordKind::ActivityEnd => 2,
            RecordKind::TestResult => 1,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = WireError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PROTOCOL" => Ok(RecordKind::Protocol),
            "TEST" => Ok(RecordKind::Test),
            "ACTIVITY_START" => Ok(RecordKind::ActivityStart),
            "ACTIVITY_END" => Ok(RecordKind::ActivityEnd),
            "TEST_RESULT" => Ok(RecordKind::TestResult),
            other => Err(WireError::UnknownKind(other.to_string())),
        }
    }
}

/// One entry of the append-only run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    Protocol {
        version: u32,
        start_epoch_ms: i64,
    },
    Test {
        suite_name: String,
        method_name: String,
        case_id: String,
    },
    ActivityStart {
        activity_id: String,
        instance_id: String,
    },
    ActivityEnd {
        activity_id: String,
        instance_id: String,
    },
    TestResult {
        success: bool,
    },
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Protocol { .. } => RecordKind::Protocol,
            Record::Test { .. } => RecordKind::Test,
            Record::ActivityStart { .. } => RecordKind::ActivityStart,
            Record::ActivityEnd { .. } => RecordKind::ActivityEnd,
            Record::TestResult { .. } => RecordKind::TestResult,
        }
    }

    /// Field values in wire order, excluding the tag.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Record::Protocol { version, start_epoch_ms } => vec![version.to_string(), start_epoch_ms.to_string()],
            Record::Test {
                suite_name,
                method_name,
                case_id,
            } => vec![suite_name.clone(), method_name.clone(), case_id.clone()],
            Record::ActivityStart { activity_id, instance_id } | Record::ActivityEnd { activity_id, instance_id } => {
                vec![activity_id.clone(), instance_id.clone()]
            }
            Record::TestResult { success } => vec![success.to_string()],
        }
    }
}
