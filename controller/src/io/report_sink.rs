//! Persisting run reports for CI and other external consumers.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::config::write_atomic;
use crate::report::RunReport;

/// Atomically write `report` as pretty-printed JSON with trailing newline.
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    debug!(path = %path.display(), tests = report.tests.len(), "writing report");
    let mut payload = serde_json::to_string_pretty(report).context("serialize report")?;
    payload.push('\n');
    write_atomic(path, &payload).with_context(|| format!("write report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::TestRunRecord;
    use crate::core::types::{TestId, TestState, WorkerId};
    use crate::report::TestTrace;
    use crate::test_support::at;
    use serde_json::Value;
    use std::fs;

    #[test]
    fn writes_counts_and_traces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports").join("run.json");
        let record = TestRunRecord {
            test_id: TestId::new("t1"),
            state: TestState::Passed,
            worker_id: WorkerId::new("worker-1"),
            events: Vec::new(),
            start_time: at(0),
            end_time: Some(at(4)),
        };
        let report = RunReport::new(
            vec![
                TestTrace::from_record(&record),
                TestTrace::pending(&TestId::new("t2")),
            ],
            Vec::new(),
            0,
            false,
        );

        write_report(&path, &report).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.ends_with('\n'));
        let json: Value = serde_json::from_str(&contents).expect("json");
        assert_eq!(json["passed"], 1);
        assert_eq!(json["not_run"], 1);
        assert_eq!(json["tests"][0]["test_id"], "t1");
        assert_eq!(json["tests"][0]["worker_id"], "worker-1");
        assert_eq!(json["tests"][1]["state"], "pending");
        assert!(json["tests"][1].get("start_time").is_none());
    }
}
