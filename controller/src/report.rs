//! Aggregate run report.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::record::{RecordedEvent, TestRunRecord};
use crate::core::types::{TestId, TestState, Verdict, WorkerId};
use crate::exit_codes;

/// Final outcome of a run: counts plus the event trace of every test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Tests still queued when the run ended.
    pub not_run: usize,
    /// The run was cancelled before every test could finish.
    pub aborted: bool,
    /// Stale or out-of-contract worker messages that were dropped.
    pub anomalies: u32,
    /// Workers disconnected during the run, distinct from test failures.
    pub infrastructure_failures: Vec<WorkerId>,
    pub tests: Vec<TestTrace>,
}

/// Event trace and final state of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestTrace {
    pub test_id: TestId,
    pub state: TestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub warnings: usize,
    pub events: Vec<RecordedEvent>,
}

impl TestTrace {
    pub fn from_record(record: &TestRunRecord) -> Self {
        Self {
            test_id: record.test_id.clone(),
            state: record.state,
            worker_id: Some(record.worker_id.clone()),
            start_time: Some(record.start_time),
            end_time: record.end_time,
            warnings: record.warning_count(),
            events: record.events.clone(),
        }
    }

    pub fn pending(test_id: &TestId) -> Self {
        Self {
            test_id: test_id.clone(),
            state: TestState::Pending,
            worker_id: None,
            start_time: None,
            end_time: None,
            warnings: 0,
            events: Vec::new(),
        }
    }
}

impl RunReport {
    pub fn new(
        tests: Vec<TestTrace>,
        infrastructure_failures: Vec<WorkerId>,
        anomalies: u32,
        aborted: bool,
    ) -> Self {
        let count = |state: TestState| tests.iter().filter(|test| test.state == state).count();
        Self {
            passed: count(TestState::Passed),
            failed: count(TestState::Failed),
            timed_out: count(TestState::TimedOut),
            not_run: count(TestState::Pending),
            aborted,
            anomalies,
            infrastructure_failures,
            tests,
        }
    }

    /// True when every test ran and passed.
    pub fn is_success(&self) -> bool {
        !self.aborted
            && self
                .tests
                .iter()
                .all(|test| test.state == TestState::Passed)
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            exit_codes::ABORTED
        } else if self.is_success() {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        }
    }

    /// Human-readable summary for the console.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for test in &self.tests {
            let _ = writeln!(
                out,
                "{:<9} {}{}",
                state_label(test.state),
                test.test_id,
                if test.warnings > 0 {
                    format!(" ({} warnings)", test.warnings)
                } else {
                    String::new()
                }
            );
            if test.state == TestState::Failed {
                for recorded in test
                    .events
                    .iter()
                    .filter(|recorded| recorded.verdict == Verdict::Fail)
                {
                    let _ = writeln!(out, "          {}", recorded.event.message);
                }
            }
        }
        let _ = writeln!(
            out,
            "summary: passed={} failed={} timed_out={} not_run={}",
            self.passed, self.failed, self.timed_out, self.not_run
        );
        if !self.infrastructure_failures.is_empty() {
            let workers: Vec<&str> = self
                .infrastructure_failures
                .iter()
                .map(WorkerId::as_str)
                .collect();
            let _ = writeln!(out, "disconnected workers: {}", workers.join(", "));
        }
        if self.anomalies > 0 {
            let _ = writeln!(out, "dropped worker messages: {}", self.anomalies);
        }
        if self.aborted {
            let _ = writeln!(out, "run aborted");
        }
        out
    }
}

fn state_label(state: TestState) -> &'static str {
    match state {
        TestState::Pending => "NOT RUN",
        TestState::Running => "RUNNING",
        TestState::Passed => "PASS",
        TestState::Failed => "FAIL",
        TestState::TimedOut => "TIMEOUT",
    }
}
