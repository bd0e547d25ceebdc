//! Semantic invariants over sessions and records.

use std::collections::HashMap;

use crate::core::record::RecordBook;
use crate::core::session::WorkerSession;
use crate::core::types::{TestState, WorkerState};

/// Check invariants that the type system does not enforce:
/// - A test id is held by at most one session
/// - Busy sessions hold a test, other sessions hold none
/// - Held tests have a `Running` record, and every `Running` record is held
/// - `Failed` records contain a failing verdict, `Passed` records do not
pub fn validate_invariants<'a>(
    sessions: impl IntoIterator<Item = &'a WorkerSession>,
    records: &RecordBook,
) -> Vec<String> {
    let mut errors = Vec::new();
    let mut holders = HashMap::new();

    for session in sessions {
        let worker = session.worker_id();
        match (session.state(), session.current_test_id()) {
            (WorkerState::Busy, None) => {
                errors.push(format!("{worker}: busy without a test"));
            }
            (WorkerState::Busy, Some(test)) => {
                if let Some(other) = holders.insert(test.clone(), worker.clone()) {
                    errors.push(format!("{test}: assigned to both {other} and {worker}"));
                }
                match records.get(test) {
                    Some(record) if record.state == TestState::Running => {}
                    Some(record) => errors.push(format!(
                        "{worker}: holds {test} whose record is {:?}",
                        record.state
                    )),
                    None => errors.push(format!("{worker}: holds {test} without a record")),
                }
            }
            (state, Some(test)) => {
                errors.push(format!("{worker}: {state:?} but still holds {test}"));
            }
            (_, None) => {}
        }
    }

    for record in records.iter() {
        let test = &record.test_id;
        match record.state {
            TestState::Running if !holders.contains_key(test) => {
                errors.push(format!("{test}: running but no worker holds it"));
            }
            TestState::Failed if !record.has_failure() => {
                errors.push(format!("{test}: failed without a failing event"));
            }
            TestState::Passed if record.has_failure() => {
                errors.push(format!("{test}: passed despite a failing event"));
            }
            _ => {}
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Policy;
    use crate::core::types::{Outcome, TestId, WorkerId};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn consistent_state_has_no_errors() {
        let mut records = RecordBook::new(Policy::default());
        let mut session = WorkerSession::new(WorkerId::new("w1"), t0());
        let test = TestId::new("t1");
        records.start(&test, session.worker_id(), t0()).expect("start");
        session.assign(test.clone(), t0()).expect("assign");
        assert!(validate_invariants([&session], &records).is_empty());

        records.finalize(&test, Outcome::Completed, t0()).expect("finalize");
        session.release().expect("release");
        assert!(validate_invariants([&session], &records).is_empty());
    }

    #[test]
    fn reports_double_assignment_and_orphans() {
        let mut records = RecordBook::new(Policy::default());
        let test = TestId::new("t1");
        let orphan = TestId::new("t2");
        records.start(&test, &WorkerId::new("w1"), t0()).expect("start");
        records.start(&orphan, &WorkerId::new("w1"), t0()).expect("start");

        let mut first = WorkerSession::new(WorkerId::new("w1"), t0());
        let mut second = WorkerSession::new(WorkerId::new("w2"), t0());
        first.assign(test.clone(), t0()).expect("assign");
        second.assign(test, t0()).expect("assign");

        let errors = validate_invariants([&first, &second], &records);
        assert!(errors.iter().any(|err| err.contains("assigned to both")));
        assert!(errors.iter().any(|err| err.contains("t2: running")));
    }
}
