//! Test-only helpers: fixed timestamps, test specs and a scripted transport.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, mpsc};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::core::types::{LogEvent, Severity, TestId, TestSpec, WorkerId};
use crate::io::transport::{Transport, WorkerMessage};

/// Deterministic timestamp `secs` seconds after 2024-01-01T00:00:00Z.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid epoch")
        + Duration::seconds(secs)
}

/// A spec with a trivial command and no environment.
pub fn spec(id: &str) -> TestSpec {
    TestSpec {
        id: TestId::new(id),
        command: vec!["true".to_string()],
        env: BTreeMap::new(),
        working_dir: None,
    }
}

/// A log event with no category.
pub fn event(worker: &str, test: &str, severity: Severity, secs: i64) -> LogEvent {
    LogEvent {
        source_worker_id: WorkerId::new(worker),
        test_id: TestId::new(test),
        severity,
        category: None,
        message: format!("{severity:?} from {test}"),
        timestamp: at(secs),
    }
}

/// [`event`] wrapped as a worker message.
pub fn log(worker: &str, test: &str, severity: Severity, secs: i64) -> WorkerMessage {
    WorkerMessage::Log(event(worker, test, severity, secs))
}

/// How a [`ScriptedTransport`] worker behaves once a test is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Emit one event per severity, then report completion.
    Complete(Vec<Severity>),
    /// Emit nothing; the worker goes silent.
    Hang,
}

/// In-memory [`Transport`] that records every call.
///
/// With an outbox attached, each dispatch immediately answers with the
/// scripted [`Reply`] for that test (default: complete with no events).
#[derive(Default)]
pub struct ScriptedTransport {
    outbox: Option<Mutex<mpsc::Sender<WorkerMessage>>>,
    replies: HashMap<TestId, Reply>,
    failing_workers: Vec<WorkerId>,
    dispatched: Mutex<Vec<(WorkerId, TestId)>>,
    aborted: Mutex<Vec<(WorkerId, TestId)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outbox(outbox: mpsc::Sender<WorkerMessage>) -> Self {
        Self {
            outbox: Some(Mutex::new(outbox)),
            ..Self::default()
        }
    }

    pub fn reply(mut self, test_id: &str, reply: Reply) -> Self {
        self.replies.insert(TestId::new(test_id), reply);
        self
    }

    pub fn fail_dispatch_on(mut self, worker_id: &str) -> Self {
        self.failing_workers.push(WorkerId::new(worker_id));
        self
    }

    pub fn dispatched(&self) -> Vec<(WorkerId, TestId)> {
        self.dispatched.lock().expect("dispatched lock").clone()
    }

    pub fn aborted(&self) -> Vec<(WorkerId, TestId)> {
        self.aborted.lock().expect("aborted lock").clone()
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&self, worker_id: &WorkerId, test: &TestSpec) -> Result<()> {
        if self.failing_workers.contains(worker_id) {
            return Err(anyhow!("worker {worker_id} unreachable"));
        }
        self.dispatched
            .lock()
            .expect("dispatched lock")
            .push((worker_id.clone(), test.id.clone()));

        let Some(outbox) = &self.outbox else {
            return Ok(());
        };
        let outbox = outbox.lock().expect("outbox lock");
        let reply = self
            .replies
            .get(&test.id)
            .cloned()
            .unwrap_or(Reply::Complete(Vec::new()));
        if let Reply::Complete(severities) = reply {
            for severity in severities {
                let _ = outbox.send(WorkerMessage::Log(LogEvent {
                    source_worker_id: worker_id.clone(),
                    test_id: test.id.clone(),
                    severity,
                    category: None,
                    message: format!("{severity:?} from {}", test.id),
                    timestamp: Utc::now(),
                }));
            }
            let _ = outbox.send(WorkerMessage::Completed {
                worker_id: worker_id.clone(),
                test_id: test.id.clone(),
            });
        }
        Ok(())
    }

    fn abort(&self, worker_id: &WorkerId, test_id: &TestId) -> Result<()> {
        self.aborted
            .lock()
            .expect("aborted lock")
            .push((worker_id.clone(), test_id.clone()));
        Ok(())
    }
}
