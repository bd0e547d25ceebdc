//! Worker transport abstraction.
//!
//! The [`Transport`] trait is the outbound boundary between the orchestrator
//! and test-execution agents. Agents report back through [`WorkerMessage`]s
//! on a channel the run driver drains. Tests use a scripted transport that
//! records calls without spawning anything.

use std::collections::HashMap;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::log_line::parse_log_line;
use crate::core::types::{LogEvent, Severity, TestId, TestSpec, WorkerId};
use crate::io::process::run_command_streaming;

/// Log category used for events the controller synthesizes about a process.
pub const CONTROLLER_CATEGORY: &str = "AutomationController";

/// Signal sent from a worker to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Log(LogEvent),
    Heartbeat {
        worker_id: WorkerId,
    },
    Completed {
        worker_id: WorkerId,
        test_id: TestId,
    },
    /// The agent is gone for good (connection lost, process exited).
    Disconnected {
        worker_id: WorkerId,
    },
}

impl WorkerMessage {
    pub fn worker_id(&self) -> &WorkerId {
        match self {
            WorkerMessage::Log(event) => &event.source_worker_id,
            WorkerMessage::Heartbeat { worker_id }
            | WorkerMessage::Completed { worker_id, .. }
            | WorkerMessage::Disconnected { worker_id } => worker_id,
        }
    }
}

/// Outbound commands to test-execution agents. Must not block.
pub trait Transport {
    /// Start `test` on `worker_id`.
    fn dispatch(&self, worker_id: &WorkerId, test: &TestSpec) -> Result<()>;

    /// Stop whatever `worker_id` is running for `test_id`.
    fn abort(&self, worker_id: &WorkerId, test_id: &TestId) -> Result<()>;
}

type AbortFlags = Arc<Mutex<HashMap<WorkerId, Arc<AtomicBool>>>>;

/// Transport whose workers run each test as a local child process.
///
/// Every output line becomes a [`LogEvent`]. At most one heartbeat is sent per
/// `heartbeat_interval`, and only if the process printed something since the
/// previous one. On unix each test gets its own process group so a terminal
/// interrupt reaches the controller and not the tests.
pub struct ProcessTransport {
    outbox: mpsc::Sender<WorkerMessage>,
    heartbeat_interval: Duration,
    running: AbortFlags,
}

impl ProcessTransport {
    pub fn new(outbox: mpsc::Sender<WorkerMessage>, heartbeat_interval: Duration) -> Self {
        Self {
            outbox,
            heartbeat_interval,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Transport for ProcessTransport {
    #[instrument(skip_all, fields(worker_id = %worker_id, test_id = %test.id))]
    fn dispatch(&self, worker_id: &WorkerId, test: &TestSpec) -> Result<()> {
        let program = test
            .command
            .first()
            .ok_or_else(|| anyhow!("test {} has an empty command", test.id))?;
        let mut cmd = Command::new(program);
        cmd.args(&test.command[1..]).envs(&test.env);
        if let Some(dir) = &test.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let abort = Arc::new(AtomicBool::new(false));
        self.running
            .lock()
            .map_err(|_| anyhow!("worker table poisoned"))?
            .insert(worker_id.clone(), Arc::clone(&abort));

        let job = ProcessJob {
            worker_id: worker_id.clone(),
            test_id: test.id.clone(),
            outbox: self.outbox.clone(),
            heartbeat_interval: self.heartbeat_interval,
            abort,
            running: Arc::clone(&self.running),
        };
        thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || job.run(cmd))
            .context("spawn worker thread")?;
        info!("test dispatched");
        Ok(())
    }

    fn abort(&self, worker_id: &WorkerId, test_id: &TestId) -> Result<()> {
        let flag = self
            .running
            .lock()
            .map_err(|_| anyhow!("worker table poisoned"))?
            .remove(worker_id);
        match flag {
            Some(flag) => {
                debug!(worker_id = %worker_id, test_id = %test_id, "aborting test process");
                flag.store(true, Ordering::SeqCst);
            }
            None => debug!(worker_id = %worker_id, test_id = %test_id, "nothing to abort"),
        }
        Ok(())
    }
}

/// One test process owned by a worker thread.
struct ProcessJob {
    worker_id: WorkerId,
    test_id: TestId,
    outbox: mpsc::Sender<WorkerMessage>,
    heartbeat_interval: Duration,
    abort: Arc<AtomicBool>,
    running: AbortFlags,
}

impl ProcessJob {
    fn run(self, cmd: Command) {
        let line_outbox = self.outbox.clone();
        let line_worker = self.worker_id.clone();
        let line_test = self.test_id.clone();
        let progressed = Arc::new(AtomicBool::new(false));
        let line_progressed = Arc::clone(&progressed);
        let on_line = move |line: &str| {
            line_progressed.store(true, Ordering::SeqCst);
            let parsed = parse_log_line(line);
            let event = LogEvent {
                source_worker_id: line_worker.clone(),
                test_id: line_test.clone(),
                severity: parsed.severity,
                category: parsed.category,
                message: parsed.message,
                timestamp: Utc::now(),
            };
            // The receiver only goes away when the run is over.
            let _ = line_outbox.send(WorkerMessage::Log(event));
        };
        // Heartbeats only follow output: a silent process hits the liveness timeout.
        let on_poll = || {
            if progressed.swap(false, Ordering::SeqCst) {
                let _ = self.outbox.send(WorkerMessage::Heartbeat {
                    worker_id: self.worker_id.clone(),
                });
            }
        };

        let result =
            run_command_streaming(cmd, self.heartbeat_interval, &self.abort, on_line, on_poll);
        self.forget();

        match result {
            Ok(exit) if exit.aborted => {
                debug!(worker_id = %self.worker_id, test_id = %self.test_id, "test process aborted");
                return;
            }
            Ok(exit) if !exit.status.success() => {
                self.send_error(format!("test process exited with {}", exit.status));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(worker_id = %self.worker_id, test_id = %self.test_id, err = %err, "test process failed");
                self.send_error(format!("failed to run test process: {err:#}"));
            }
        }
        let _ = self.outbox.send(WorkerMessage::Completed {
            worker_id: self.worker_id.clone(),
            test_id: self.test_id.clone(),
        });
    }

    fn send_error(&self, message: String) {
        let _ = self.outbox.send(WorkerMessage::Log(LogEvent {
            source_worker_id: self.worker_id.clone(),
            test_id: self.test_id.clone(),
            severity: Severity::Error,
            category: Some(CONTROLLER_CATEGORY.to_string()),
            message,
            timestamp: Utc::now(),
        }));
    }

    /// Drop this job's abort flag unless a newer dispatch replaced it.
    fn forget(&self) {
        if let Ok(mut running) = self.running.lock()
            && running
                .get(&self.worker_id)
                .is_some_and(|flag| Arc::ptr_eq(flag, &self.abort))
        {
            running.remove(&self.worker_id);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn spec(id: &str, script: &str) -> TestSpec {
        TestSpec {
            id: TestId::new(id),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    fn drain_until_completed(rx: &mpsc::Receiver<WorkerMessage>) -> Vec<WorkerMessage> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut messages = Vec::new();
        while Instant::now() < deadline {
            let Ok(message) = rx.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            let done = matches!(message, WorkerMessage::Completed { .. });
            messages.push(message);
            if done {
                break;
            }
        }
        messages
    }

    fn logs(messages: &[WorkerMessage]) -> Vec<&LogEvent> {
        messages
            .iter()
            .filter_map(|message| match message {
                WorkerMessage::Log(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn streams_parsed_events_then_completes() {
        let (tx, rx) = mpsc::channel();
        let transport = ProcessTransport::new(tx, Duration::from_millis(50));
        let worker = WorkerId::new("w1");
        transport
            .dispatch(
                &worker,
                &spec("t1", "echo 'LogTemp: Warning: careful'; echo 'LogTemp: Error: broke'"),
            )
            .expect("dispatch");

        let messages = drain_until_completed(&rx);
        assert_eq!(
            messages.last(),
            Some(&WorkerMessage::Completed {
                worker_id: worker.clone(),
                test_id: TestId::new("t1"),
            })
        );
        let severities: Vec<Severity> = logs(&messages).iter().map(|e| e.severity).collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Error]);
    }

    #[test]
    fn nonzero_exit_adds_error_event() {
        let (tx, rx) = mpsc::channel();
        let transport = ProcessTransport::new(tx, Duration::from_millis(50));
        transport
            .dispatch(&WorkerId::new("w1"), &spec("t1", "exit 7"))
            .expect("dispatch");

        let messages = drain_until_completed(&rx);
        let events = logs(&messages);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(events[0].category.as_deref(), Some(CONTROLLER_CATEGORY));
    }

    fn heartbeats(messages: &[WorkerMessage]) -> usize {
        messages
            .iter()
            .filter(|message| matches!(message, WorkerMessage::Heartbeat { .. }))
            .count()
    }

    #[test]
    fn chatty_test_sends_heartbeats() {
        let (tx, rx) = mpsc::channel();
        let transport = ProcessTransport::new(tx, Duration::from_millis(20));
        transport
            .dispatch(
                &WorkerId::new("w1"),
                &spec("t1", "for i in 1 2 3 4 5; do echo tick $i; sleep 0.1; done"),
            )
            .expect("dispatch");

        let messages = drain_until_completed(&rx);
        assert!(heartbeats(&messages) > 0);
    }

    #[test]
    fn silent_test_sends_no_heartbeats() {
        let (tx, rx) = mpsc::channel();
        let transport = ProcessTransport::new(tx, Duration::from_millis(20));
        transport
            .dispatch(&WorkerId::new("w1"), &spec("t1", "sleep 0.3"))
            .expect("dispatch");

        let messages = drain_until_completed(&rx);
        assert!(matches!(
            messages.last(),
            Some(WorkerMessage::Completed { .. })
        ));
        assert_eq!(heartbeats(&messages), 0);
    }

    #[test]
    fn aborted_test_never_completes() {
        let (tx, rx) = mpsc::channel();
        let transport = ProcessTransport::new(tx, Duration::from_millis(20));
        let worker = WorkerId::new("w1");
        transport
            .dispatch(&worker, &spec("t1", "sleep 30"))
            .expect("dispatch");
        transport
            .abort(&worker, &TestId::new("t1"))
            .expect("abort");

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(message) = rx.recv_timeout(Duration::from_millis(100)) {
                assert!(!matches!(message, WorkerMessage::Completed { .. }));
            }
        }
    }
}
