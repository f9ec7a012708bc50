//! Aggregation of received run telemetry.
//!
//! Each received stream is condensed into a [`RunDigest`]. The
//! [`ExecutionDataStore`] keeps the digests of the current session, a session
//! being all runs that report the same `PROTOCOL` start time. A run from a new
//! session replaces everything collected so far.

use bpmndt_types::{PROTOCOL_VERSION, Record, RecordKind};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("record stream is empty")]
    Empty,
    #[error("record stream must start with PROTOCOL, found {0}")]
    MissingProtocol(RecordKind),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("PROTOCOL must be followed by TEST")]
    MissingTest,
    #[error("unexpected {kind} record at position {position}")]
    Unexpected { kind: RecordKind, position: usize },
}

/// Condensed view of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDigest {
    pub session_epoch_ms: i64,
    pub suite_name: String,
    pub method_name: String,
    pub case_id: String,
    /// Activity ids in the order they started.
    pub started: Vec<String>,
    /// Activity ids in the order they ended.
    pub ended: Vec<String>,
    /// `None` when the stream ended before a `TEST_RESULT`.
    pub success: Option<bool>,
}

impl RunDigest {
    pub fn from_records(records: &[Record]) -> Result<Self, DigestError> {
        let mut iter = records.iter().enumerate();

        let session_epoch_ms = match iter.next() {
            None => return Err(DigestError::Empty),
            Some((_, Record::Protocol { version, start_epoch_ms })) => {
                if *version != PROTOCOL_VERSION {
                    return Err(DigestError::UnsupportedVersion(*version));
                }
                *start_epoch_ms
            }
            Some((_, other)) => return Err(DigestError::MissingProtocol(other.kind())),
        };

        let mut digest = match iter.next() {
            Some((
                _,
                Record::Test {
                    suite_name,
                    method_name,
                    case_id,
                },
            )) => RunDigest {
                session_epoch_ms,
                suite_name: suite_name.clone(),
                method_name: method_name.clone(),
                case_id: case_id.clone(),
                started: Vec::new(),
                ended: Vec::new(),
                success: None,
            },
            _ => return Err(DigestError::MissingTest),
        };

        for (position, record) in iter {
            if digest.success.is_some() {
                return Err(DigestError::Unexpected {
                    kind: record.kind(),
                    position,
                });
            }
            match record {
                Record::ActivityStart { activity_id, .. } => digest.started.push(activity_id.clone()),
                Record::ActivityEnd { activity_id, .. } => digest.ended.push(activity_id.clone()),
                Record::TestResult { success } => digest.success = Some(*success),
                other => {
                    return Err(DigestError::Unexpected {
                        kind: other.kind(),
                        position,
                    });
                }
            }
        }

        Ok(digest)
    }
}

/// Digests of the current session.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDataStore {
    session_epoch_ms: Option<i64>,
    runs: Vec<RunDigest>,
}

impl ExecutionDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a digest; returns `true` when it started a new session.
    pub fn add(&mut self, digest: RunDigest) -> bool {
        let new_session = self.session_epoch_ms != Some(digest.session_epoch_ms);
        if new_session {
            debug!(session = digest.session_epoch_ms, dropped = self.runs.len(), "new telemetry session");
            self.runs.clear();
            self.session_epoch_ms = Some(digest.session_epoch_ms);
        }
        self.runs.push(digest);
        new_session
    }

    pub fn session_epoch_ms(&self) -> Option<i64> {
        self.session_epoch_ms
    }

    pub fn runs(&self) -> &[RunDigest] {
        &self.runs
    }

    /// Activities ended by any run of `case_id`, in first-seen order.
    pub fn covered_activities(&self, case_id: &str) -> IndexSet<String> {
        self.runs
            .iter()
            .filter(|run| run.case_id == case_id)
            .flat_map(|run| run.ended.iter().cloned())
            .collect()
    }

    /// Covered activities per test case.
    pub fn coverage(&self) -> IndexMap<String, IndexSet<String>> {
        let mut coverage: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for run in &self.runs {
            coverage.entry(run.case_id.clone()).or_default().extend(run.ended.iter().cloned());
        }
        coverage
    }

    pub fn clear(&mut self) {
        self.session_epoch_ms = None;
        self.runs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: i64, case_id: &str, activities: &[&str], success: Option<bool>) -> Vec<Record> {
        let mut records = vec![
            Record::Protocol {
                version: PROTOCOL_VERSION,
                start_epoch_ms: session,
            },
            Record::Test {
                suite_name: "OrderTest".into(),
                method_name: "test".into(),
                case_id: case_id.into(),
            },
        ];
        for (index, activity) in activities.iter().enumerate() {
            let instance_id = format!("{activity}:{index}");
            records.push(Record::ActivityStart {
                activity_id: activity.to_string(),
                instance_id: instance_id.clone(),
            });
            records.push(Record::ActivityEnd {
                activity_id: activity.to_string(),
                instance_id,
            });
        }
        if let Some(success) = success {
            records.push(Record::TestResult { success });
        }
        records
    }

    #[test]
    fn digests_a_complete_run() {
        let digest = RunDigest::from_records(&run(5, "TC_a", &["start", "end"], Some(true))).unwrap();
        assert_eq!(digest.case_id, "TC_a");
        assert_eq!(digest.started, vec!["start", "end"]);
        assert_eq!(digest.ended, vec!["start", "end"]);
        assert_eq!(digest.success, Some(true));
    }

    #[test]
    fn truncated_runs_have_no_result() {
        let digest = RunDigest::from_records(&run(5, "TC_a", &["start"], None)).unwrap();
        assert_eq!(digest.success, None);
    }

    #[test]
    fn malformed_streams_are_rejected() {
        assert_eq!(RunDigest::from_records(&[]), Err(DigestError::Empty));
        assert_eq!(
            RunDigest::from_records(&[Record::TestResult { success: true }]),
            Err(DigestError::MissingProtocol(RecordKind::TestResult))
        );

        let mut records = run(5, "TC_a", &[], Some(true));
        records.push(Record::TestResult { success: false });
        assert_eq!(
            RunDigest::from_records(&records),
            Err(DigestError::Unexpected {
                kind: RecordKind::TestResult,
                position: 3
            })
        );
    }

    #[test]
    fn new_session_resets_the_store() {
        let mut store = ExecutionDataStore::new();
        assert!(store.add(RunDigest::from_records(&run(1, "TC_a", &["start"], Some(true))).unwrap()));
        assert!(!store.add(RunDigest::from_records(&run(1, "TC_a", &["task"], Some(true))).unwrap()));
        assert!(!store.add(RunDigest::from_records(&run(1, "TC_b", &["other"], Some(false))).unwrap()));

        let covered: Vec<String> = store.covered_activities("TC_a").into_iter().collect();
        assert_eq!(covered, vec!["start", "task"]);
        assert_eq!(store.coverage().len(), 2);

        assert!(store.add(RunDigest::from_records(&run(2, "TC_a", &["end"], Some(true))).unwrap()));
        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.session_epoch_ms(), Some(2));
    }
}
