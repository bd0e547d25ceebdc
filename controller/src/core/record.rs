//! Per-test run records and their lifecycle.
//!
//! A record is created `Running` by [`RecordBook::start`], accumulates
//! classified events, and becomes immutable once finalized.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::classifier::classify;
use crate::core::errors::RecordError;
use crate::core::policy::Policy;
use crate::core::types::{LogEvent, Outcome, TestId, TestState, Verdict, WorkerId};

/// A log event together with the verdict it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    #[serde(flatten)]
    pub event: LogEvent,
    pub verdict: Verdict,
}

/// Aggregate state and event trace for one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRunRecord {
    pub test_id: TestId,
    pub state: TestState,
    pub worker_id: WorkerId,
    pub events: Vec<RecordedEvent>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TestRunRecord {
    pub fn has_failure(&self) -> bool {
        self.events
            .iter()
            .any(|recorded| recorded.verdict == Verdict::Fail)
    }

    pub fn warning_count(&self) -> usize {
        self.events
            .iter()
            .filter(|recorded| recorded.verdict == Verdict::Warn)
            .count()
    }
}

/// Owner of all test run records for one run, in start order.
#[derive(Debug)]
pub struct RecordBook {
    policy: Policy,
    records: Vec<TestRunRecord>,
    index: HashMap<TestId, usize>,
}

impl RecordBook {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Create a `Running` record for `test_id`.
    ///
    /// A finished record for the same id is replaced by the new run.
    pub fn start(
        &mut self,
        test_id: &TestId,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<&TestRunRecord, RecordError> {
        let record = TestRunRecord {
            test_id: test_id.clone(),
            state: TestState::Running,
            worker_id: worker_id.clone(),
            events: Vec::new(),
            start_time: now,
            end_time: None,
        };
        let slot = match self.index.get(test_id) {
            Some(&slot) => {
                let existing = &self.records[slot];
                if !existing.state.is_terminal() {
                    return Err(RecordError::DuplicateTest(test_id.clone()));
                }
                debug!(test_id = %test_id, previous = ?existing.state, "replacing finished record");
                self.records[slot] = record;
                slot
            }
            None => {
                self.records.push(record);
                let slot = self.records.len() - 1;
                self.index.insert(test_id.clone(), slot);
                slot
            }
        };
        Ok(&self.records[slot])
    }

    /// Classify `event` and append it to the running record for `test_id`.
    pub fn record_event(
        &mut self,
        test_id: &TestId,
        event: LogEvent,
    ) -> Result<Verdict, RecordError> {
        let slot = *self
            .index
            .get(test_id)
            .ok_or_else(|| RecordError::UnknownTest(test_id.clone()))?;
        let record = &mut self.records[slot];
        if record.state.is_terminal() {
            return Err(RecordError::TerminalState {
                test_id: test_id.clone(),
                state: record.state,
            });
        }
        let verdict = classify(&event, &self.policy);
        record.events.push(RecordedEvent { event, verdict });
        Ok(verdict)
    }

    /// Move a running record to its terminal state.
    ///
    /// `Completed` yields `Failed` if any event failed, else `Passed`.
    /// `TimedOut` yields `TimedOut` regardless of the events seen.
    pub fn finalize(
        &mut self,
        test_id: &TestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<TestState, RecordError> {
        let slot = *self
            .index
            .get(test_id)
            .ok_or_else(|| RecordError::UnknownTest(test_id.clone()))?;
        let record = &mut self.records[slot];
        if record.state != TestState::Running {
            return Err(RecordError::InvalidState {
                test_id: test_id.clone(),
                state: record.state,
            });
        }
        record.state = match outcome {
            Outcome::Completed if record.has_failure() => TestState::Failed,
            Outcome::Completed => TestState::Passed,
            Outcome::TimedOut => TestState::TimedOut,
        };
        record.end_time = Some(now);
        Ok(record.state)
    }

    pub fn get(&self, test_id: &TestId) -> Option<&TestRunRecord> {
        self.index.get(test_id).map(|&slot| &self.records[slot])
    }

    pub fn contains(&self, test_id: &TestId) -> bool {
        self.index.contains_key(test_id)
    }

    /// Records in the order they were first started.
    pub fn iter(&self) -> impl Iterator<Item = &TestRunRecord> {
        self.records.iter()
    }

    pub fn all_terminal(&self) -> bool {
        self.records.iter().all(|record| record.state.is_terminal())
    }
}
