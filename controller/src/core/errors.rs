//! Local contract violations raised by records and sessions.
//!
//! None of these abort a run: the orchestrator logs them as anomalies.

use thiserror::Error;

use crate::core::types::{TestId, TestState, WorkerId, WorkerState};

/// Errors produced by [`RecordBook`](crate::core::record::RecordBook).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("test `{0}` already has a record in progress")]
    DuplicateTest(TestId),

    #[error("no record exists for test `{0}`")]
    UnknownTest(TestId),

    #[error("record for test `{test_id}` is final ({state:?})")]
    TerminalState { test_id: TestId, state: TestState },

    #[error("record for test `{test_id}` is {state:?}, expected running")]
    InvalidState { test_id: TestId, state: TestState },
}

/// Errors produced by [`WorkerSession`](crate::core::session::WorkerSession).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("worker `{worker_id}` cannot take a test while {state:?}")]
    WorkerBusy {
        worker_id: WorkerId,
        state: WorkerState,
    },

    #[error("worker `{worker_id}` cannot {action} while {state:?}")]
    InvalidTransition {
        worker_id: WorkerId,
        state: WorkerState,
        action: &'static str,
    },
}
