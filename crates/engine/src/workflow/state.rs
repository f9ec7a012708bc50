//! Telemetry collected during one test run.
//!
//! The recorder is an append-only log with a fixed shape: one `PROTOCOL`
//! record, one `TEST` record, any number of activity start/end records and
//! finally one `TEST_RESULT` record. Appends that would break that shape are
//! rejected with a [`RecorderError`].

use bpmndt_types::{PROTOCOL_VERSION, Record, encode_records};
use chrono::Utc;
use once_cell::sync::Lazy;
use thiserror::Error;

static PROCESS_START_EPOCH_MS: Lazy<i64> = Lazy::new(|| Utc::now().timestamp_millis());

/// Epoch milliseconds captured the first time telemetry is recorded in this
/// process. Every run of the same process reports the same value, which lets
/// a listener group runs into one session.
pub fn process_start_epoch_ms() -> i64 {
    *PROCESS_START_EPOCH_MS
}

/// Out-of-order use of the recorder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Protocol must be recorded first")]
    ProtocolAlreadyRecorded,
    #[error("Protocol must be recorded before the test")]
    ProtocolMissing,
    #[error("Test must be recorded first")]
    TestMissing,
    #[error("Test has already been recorded")]
    TestAlreadyRecorded,
    #[error("Test result has already been recorded")]
    ResultAlreadyRecorded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Empty,
    Protocol,
    Test,
    Finished,
}

/// Append-only record log of the current run.
#[derive(Debug, Clone, Default)]
pub struct TelemetryRecorder {
    records: Vec<Record>,
    phase: Phase,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_protocol(&mut self) -> Result<(), RecorderError> {
        self.record_protocol_at(process_start_epoch_ms())
    }

    pub fn record_protocol_at(&mut self, start_epoch_ms: i64) -> Result<(), RecorderError> {
        if self.phase != Phase::Empty {
            return Err(RecorderError::ProtocolAlreadyRecorded);
        }
        self.records.push(Record::Protocol {
            version: PROTOCOL_VERSION,
            start_epoch_ms,
        });
        self.phase = Phase::Protocol;
        Ok(())
    }

    pub fn record_test(&mut self, suite_name: &str, method_name: &str, case_id: &str) -> Result<(), RecorderError> {
        match self.phase {
            Phase::Empty => return Err(RecorderError::ProtocolMissing),
            Phase::Protocol => {}
            Phase::Test => return Err(RecorderError::TestAlreadyRecorded),
            Phase::Finished => return Err(RecorderError::ResultAlreadyRecorded),
        }
        self.records.push(Record::Test {
            suite_name: suite_name.to_string(),
            method_name: method_name.to_string(),
            case_id: case_id.to_string(),
        });
        self.phase = Phase::Test;
        Ok(())
    }

    pub fn record_activity_start(&mut self, activity_id: &str, instance_id: &str) -> Result<(), RecorderError> {
        self.ensure_in_test()?;
        self.records.push(Record::ActivityStart {
            activity_id: activity_id.to_string(),
            instance_id: instance_id.to_string(),
        });
        Ok(())
    }

    pub fn record_activity_end(&mut self, activity_id: &str, instance_id: &str) -> Result<(), RecorderError> {
        self.ensure_in_test()?;
        self.records.push(Record::ActivityEnd {
            activity_id: activity_id.to_string(),
            instance_id: instance_id.to_string(),
        });
        Ok(())
    }

    pub fn record_result(&mut self, success: bool) -> Result<(), RecorderError> {
        self.ensure_in_test()?;
        self.records.push(Record::TestResult { success });
        self.phase = Phase::Finished;
        Ok(())
    }

    fn ensure_in_test(&self) -> Result<(), RecorderError> {
        match self.phase {
            Phase::Empty | Phase::Protocol => Err(RecorderError::TestMissing),
            Phase::Test => Ok(()),
            Phase::Finished => Err(RecorderError::ResultAlreadyRecorded),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Outcome recorded by `TEST_RESULT`, once present.
    pub fn result(&self) -> Option<bool> {
        self.records.iter().rev().find_map(|record| match record {
            Record::TestResult { success } => Some(*success),
            _ => None,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_records(&self.records)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.phase = Phase::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmndt_types::RecordKind;

    fn started() -> TelemetryRecorder {
        let mut recorder = TelemetryRecorder::new();
        recorder.record_protocol_at(42).expect("protocol");
        recorder.record_test("OrderTest", "happyPath", "TC_order__start__end").expect("test");
        recorder
    }

    #[test]
    fn records_keep_their_shape() {
        let mut recorder = started();
        recorder.record_activity_start("approve", "a1").expect("start");
        recorder.record_activity_end("approve", "a1").expect("end");
        recorder.record_result(true).expect("result");

        let kinds: Vec<RecordKind> = recorder.records().iter().map(Record::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::Protocol,
                RecordKind::Test,
                RecordKind::ActivityStart,
                RecordKind::ActivityEnd,
                RecordKind::TestResult
            ]
        );
        assert_eq!(recorder.result(), Some(true));
    }

    #[test]
    fn result_before_test_is_rejected() {
        let mut recorder = TelemetryRecorder::new();
        assert_eq!(recorder.record_result(false), Err(RecorderError::TestMissing));

        recorder.record_protocol_at(1).expect("protocol");
        assert_eq!(recorder.record_activity_start("a", "1"), Err(RecorderError::TestMissing));
        assert_eq!(recorder.records().len(), 1);
    }

    #[test]
    fn nothing_is_recorded_after_the_result() {
        let mut recorder = started();
        recorder.record_result(false).expect("result");
        assert_eq!(recorder.record_result(true), Err(RecorderError::ResultAlreadyRecorded));
        assert_eq!(recorder.record_activity_end("a", "1"), Err(RecorderError::ResultAlreadyRecorded));
        assert_eq!(recorder.result(), Some(false));
    }

    #[test]
    fn protocol_and_test_are_recorded_once() {
        let mut recorder = started();
        assert_eq!(recorder.record_protocol_at(7), Err(RecorderError::ProtocolAlreadyRecorded));
        assert_eq!(recorder.record_test("a", "b", "c"), Err(RecorderError::TestAlreadyRecorded));
        assert_eq!(TelemetryRecorder::new().record_test("a", "b", "c"), Err(RecorderError::ProtocolMissing));
    }

    #[test]
    fn clear_resets_the_log() {
        let mut recorder = started();
        recorder.clear();
        assert!(recorder.is_empty());
        assert!(recorder.record_protocol().is_ok());
        assert_eq!(process_start_epoch_ms(), process_start_epoch_ms());
    }
}
