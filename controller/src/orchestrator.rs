//! Scheduling state machine for one automation run.
//!
//! The [`Orchestrator`] owns the pending queue, the worker sessions and the
//! record book, and is the only writer to any of them. Callers drive it with
//! explicit timestamps: [`Orchestrator::tick`] for liveness and dispatch, and
//! [`Orchestrator::handle_message`] for every inbound worker signal. Contract
//! violations seen here are logged and counted, never propagated.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::errors::RecordError;
use crate::core::invariants::validate_invariants;
use crate::core::policy::Policy;
use crate::core::record::RecordBook;
use crate::core::session::WorkerSession;
use crate::core::types::{
    LogEvent, Outcome, TestId, TestSpec, TestState, Verdict, WorkerId, WorkerState,
};
use crate::io::config::SchedulerConfig;
use crate::io::transport::{Transport, WorkerMessage};
use crate::report::{RunReport, TestTrace};

#[derive(Debug)]
pub struct Orchestrator {
    scheduler: SchedulerConfig,
    queue: VecDeque<TestSpec>,
    sessions: BTreeMap<WorkerId, WorkerSession>,
    records: RecordBook,
    anomalies: u32,
    aborted: bool,
}

impl Orchestrator {
    pub fn new(policy: Policy, scheduler: SchedulerConfig) -> Self {
        Self {
            scheduler,
            queue: VecDeque::new(),
            sessions: BTreeMap::new(),
            records: RecordBook::new(policy),
            anomalies: 0,
            aborted: false,
        }
    }

    /// Register an idle worker. Returns `false` if the id is already known.
    pub fn add_worker(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> bool {
        if self.sessions.contains_key(&worker_id) {
            warn!(worker_id = %worker_id, "worker already registered");
            return false;
        }
        debug!(worker_id = %worker_id, "worker registered");
        self.sessions
            .insert(worker_id.clone(), WorkerSession::new(worker_id, now));
        true
    }

    /// Append a test to the back of the queue.
    pub fn enqueue(&mut self, spec: TestSpec) -> Result<(), RecordError> {
        if self.records.contains(&spec.id) || self.queue.iter().any(|queued| queued.id == spec.id) {
            return Err(RecordError::DuplicateTest(spec.id));
        }
        self.queue.push_back(spec);
        Ok(())
    }

    /// One scheduling pass: time out silent workers, then hand queued tests to
    /// idle workers in queue order.
    pub fn tick<T: Transport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &T) {
        if self.aborted {
            return;
        }
        self.reap_unresponsive(now, transport);
        self.dispatch_pending(now, transport);
    }

    /// Apply one inbound worker signal. Any signal counts as a heartbeat.
    pub fn handle_message(&mut self, message: WorkerMessage, now: DateTime<Utc>) {
        let Some(session) = self.sessions.get_mut(message.worker_id()) else {
            warn!(worker_id = %message.worker_id(), "message from unknown worker");
            self.anomalies += 1;
            return;
        };
        session.heartbeat(now);

        match message {
            WorkerMessage::Heartbeat { .. } => {}
            WorkerMessage::Log(event) => self.route_event(event),
            WorkerMessage::Completed { worker_id, test_id } => {
                self.complete(&worker_id, &test_id, now);
            }
            WorkerMessage::Disconnected { worker_id } => self.lose_worker(&worker_id, now),
        }
    }

    /// Cancel the run: running tests time out, busy workers are told to stop
    /// and released, queued tests are left unstarted.
    pub fn abort<T: Transport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &T) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        warn!(queued = self.queue.len(), "aborting run");

        for session in self.sessions.values_mut() {
            match session.state() {
                WorkerState::Busy => {
                    if let Some(test_id) = session.current_test_id()
                        && let Err(err) = transport.abort(session.worker_id(), test_id)
                    {
                        warn!(worker_id = %session.worker_id(), err = %err, "abort instruction failed");
                    }
                    if let Err(err) = session.release() {
                        warn!(err = %err, "release during abort failed");
                        self.anomalies += 1;
                    }
                }
                WorkerState::Unresponsive => {
                    if let Err(err) = session.recover(now) {
                        warn!(err = %err, "recover during abort failed");
                        self.anomalies += 1;
                    }
                }
                WorkerState::Idle | WorkerState::Disconnected => {}
            }
        }

        let unfinished: Vec<TestId> = self
            .records
            .iter()
            .filter(|record| !record.state.is_terminal())
            .map(|record| record.test_id.clone())
            .collect();
        for test_id in unfinished {
            self.finalize(&test_id, Outcome::TimedOut, now);
        }
    }

    /// True once nothing is queued or running.
    ///
    /// Queued tests no longer block completion after an abort or once every
    /// worker is disconnected.
    pub fn is_complete(&self) -> bool {
        let settled = self.sessions.values().all(|session| {
            matches!(
                session.state(),
                WorkerState::Idle | WorkerState::Disconnected
            )
        });
        let drained = self.queue.is_empty() || self.aborted || !self.has_live_worker();
        settled && drained && self.records.all_terminal()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn session(&self, worker_id: &WorkerId) -> Option<&WorkerSession> {
        self.sessions.get(worker_id)
    }

    pub fn records(&self) -> &RecordBook {
        &self.records
    }

    pub fn queued(&self) -> impl Iterator<Item = &TestId> {
        self.queue.iter().map(|spec| &spec.id)
    }

    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    /// Violations of the assignment and verdict invariants, if any.
    pub fn check_invariants(&self) -> Vec<String> {
        validate_invariants(self.sessions.values(), &self.records)
    }

    /// Aggregate counts and per-test traces: started tests in start order,
    /// then tests that never left the queue.
    pub fn report(&self) -> RunReport {
        let mut tests: Vec<TestTrace> = self.records.iter().map(TestTrace::from_record).collect();
        tests.extend(self.queue.iter().map(|spec| TestTrace::pending(&spec.id)));
        let infrastructure_failures = self
            .sessions
            .values()
            .filter(|session| session.state() == WorkerState::Disconnected)
            .map(|session| session.worker_id().clone())
            .collect();
        RunReport::new(tests, infrastructure_failures, self.anomalies, self.aborted)
    }

    fn has_live_worker(&self) -> bool {
        self.sessions
            .values()
            .any(|session| session.state() != WorkerState::Disconnected)
    }

    fn reap_unresponsive<T: Transport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &T) {
        let timeout = self.scheduler.heartbeat_timeout();
        let expired: Vec<WorkerId> = self
            .sessions
            .values()
            .filter(|session| {
                session.state() == WorkerState::Busy && session.is_heartbeat_expired(now, timeout)
            })
            .map(|session| session.worker_id().clone())
            .collect();
        for worker_id in expired {
            self.time_out_worker(&worker_id, now, transport);
        }
    }

    fn time_out_worker<T: Transport + ?Sized>(
        &mut self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
        transport: &T,
    ) {
        let Some(session) = self.sessions.get_mut(worker_id) else {
            return;
        };
        let silent_secs = now
            .signed_duration_since(session.last_heartbeat())
            .num_seconds();
        let test_id = match session.mark_unresponsive() {
            Ok(test_id) => test_id,
            Err(err) => {
                warn!(err = %err, "cannot mark worker unresponsive");
                self.anomalies += 1;
                return;
            }
        };
        warn!(
            worker_id = %worker_id,
            test_id = %test_id,
            silent_secs,
            timeouts = session.consecutive_timeouts(),
            "worker unresponsive, timing out test"
        );

        if session.consecutive_timeouts() >= self.scheduler.retry_budget {
            session.disconnect();
            warn!(
                worker_id = %worker_id,
                retry_budget = self.scheduler.retry_budget,
                "retry budget exhausted, worker disconnected"
            );
        } else if let Err(err) = session.recover(now) {
            warn!(err = %err, "cannot recover worker");
            self.anomalies += 1;
        }

        if let Err(err) = transport.abort(worker_id, &test_id) {
            warn!(worker_id = %worker_id, err = %err, "abort instruction failed");
        }
        self.finalize(&test_id, Outcome::TimedOut, now);
    }

    fn dispatch_pending<T: Transport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &T) {
        let idle: Vec<WorkerId> = self
            .sessions
            .values()
            .filter(|session| session.state() == WorkerState::Idle)
            .map(|session| session.worker_id().clone())
            .collect();
        for worker_id in idle {
            let Some(spec) = self.queue.pop_front() else {
                break;
            };
            self.start_on(&worker_id, spec, now, transport);
        }
    }

    fn start_on<T: Transport + ?Sized>(
        &mut self,
        worker_id: &WorkerId,
        spec: TestSpec,
        now: DateTime<Utc>,
        transport: &T,
    ) {
        if let Err(err) = self.records.start(&spec.id, worker_id, now) {
            warn!(err = %err, "cannot start test, dropping it");
            self.anomalies += 1;
            return;
        }
        let Some(session) = self.sessions.get_mut(worker_id) else {
            return;
        };
        if let Err(err) = session.assign(spec.id.clone(), now) {
            warn!(err = %err, "cannot assign test");
            self.anomalies += 1;
            self.finalize(&spec.id, Outcome::TimedOut, now);
            return;
        }

        match transport.dispatch(worker_id, &spec) {
            Ok(()) => {
                info!(worker_id = %worker_id, test_id = %spec.id, "test started");
            }
            Err(err) => {
                warn!(
                    worker_id = %worker_id,
                    test_id = %spec.id,
                    err = %format!("{err:#}"),
                    "dispatch failed, disconnecting worker"
                );
                session.disconnect();
                self.finalize(&spec.id, Outcome::TimedOut, now);
            }
        }
    }

    fn route_event(&mut self, event: LogEvent) {
        let held = self
            .sessions
            .get(&event.source_worker_id)
            .and_then(WorkerSession::current_test_id);
        if held != Some(&event.test_id) {
            warn!(
                worker_id = %event.source_worker_id,
                test_id = %event.test_id,
                record = ?self.records.get(&event.test_id).map(|record| record.state),
                "dropping log event for a test the worker does not hold"
            );
            self.anomalies += 1;
            return;
        }

        let test_id = event.test_id.clone();
        match self.records.record_event(&test_id, event) {
            Ok(Verdict::Fail) => debug!(test_id = %test_id, "failing event recorded"),
            Ok(_) => {}
            Err(err) => {
                warn!(err = %err, "dropping log event");
                self.anomalies += 1;
            }
        }
    }

    fn complete(&mut self, worker_id: &WorkerId, test_id: &TestId, now: DateTime<Utc>) {
        let held = self
            .sessions
            .get(worker_id)
            .and_then(WorkerSession::current_test_id);
        if held != Some(test_id) {
            warn!(
                worker_id = %worker_id,
                test_id = %test_id,
                "dropping completion for a test the worker does not hold"
            );
            self.anomalies += 1;
            return;
        }

        self.finalize(test_id, Outcome::Completed, now);
        if let Some(session) = self.sessions.get_mut(worker_id)
            && let Err(err) = session.release()
        {
            warn!(err = %err, "cannot release worker");
            self.anomalies += 1;
        }
    }

    fn lose_worker(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) {
        let Some(session) = self.sessions.get_mut(worker_id) else {
            return;
        };
        if session.state() == WorkerState::Disconnected {
            return;
        }
        let abandoned = session.disconnect();
        warn!(worker_id = %worker_id, test_id = ?abandoned, "worker disconnected");
        if let Some(test_id) = abandoned {
            self.finalize(&test_id, Outcome::TimedOut, now);
        }
    }

    fn finalize(&mut self, test_id: &TestId, outcome: Outcome, now: DateTime<Utc>) {
        match self.records.finalize(test_id, outcome, now) {
            Ok(state) => log_finished(test_id, state),
            Err(err) => {
                warn!(err = %err, "cannot finalize test");
                self.anomalies += 1;
            }
        }
    }
}

fn log_finished(test_id: &TestId, state: TestState) {
    match state {
        TestState::Passed => info!(test_id = %test_id, "test passed"),
        TestState::Failed => info!(test_id = %test_id, "test failed"),
        TestState::TimedOut => warn!(test_id = %test_id, "test timed out"),
        TestState::Pending | TestState::Running => {}
    }
}
