//! Worker session lifecycle.
//!
//! ```text
//! Idle --assign--> Busy --release--> Idle
//! Busy --mark_unresponsive--> Unresponsive --recover--> Idle
//! any --disconnect--> Disconnected (terminal)
//! ```
//!
//! Sessions hold no clock: callers pass `now` and poll
//! [`WorkerSession::is_heartbeat_expired`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::errors::SessionError;
use crate::core::types::{TestId, WorkerId, WorkerState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSession {
    worker_id: WorkerId,
    state: WorkerState,
    current_test_id: Option<TestId>,
    last_heartbeat: DateTime<Utc>,
    consecutive_timeouts: u32,
}

impl WorkerSession {
    pub fn new(worker_id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            state: WorkerState::Idle,
            current_test_id: None,
            last_heartbeat: now,
            consecutive_timeouts: 0,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_test_id(&self) -> Option<&TestId> {
        self.current_test_id.as_ref()
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Take `test_id`. Only valid while idle; restarts the liveness clock.
    pub fn assign(&mut self, test_id: TestId, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != WorkerState::Idle {
            return Err(SessionError::WorkerBusy {
                worker_id: self.worker_id.clone(),
                state: self.state,
            });
        }
        self.current_test_id = Some(test_id);
        self.state = WorkerState::Busy;
        self.last_heartbeat = now;
        Ok(())
    }

    /// Record a sign of life. Ignored once disconnected.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        if self.state == WorkerState::Disconnected {
            return;
        }
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    /// Finish the current test and return to idle.
    pub fn release(&mut self) -> Result<TestId, SessionError> {
        if self.state != WorkerState::Busy {
            return Err(self.invalid("release"));
        }
        self.state = WorkerState::Idle;
        self.consecutive_timeouts = 0;
        self.current_test_id
            .take()
            .ok_or_else(|| self.invalid("release"))
    }

    /// Busy worker stopped sending heartbeats. Returns the test it held.
    pub fn mark_unresponsive(&mut self) -> Result<TestId, SessionError> {
        if self.state != WorkerState::Busy {
            return Err(self.invalid("become unresponsive"));
        }
        let test_id = self
            .current_test_id
            .take()
            .ok_or_else(|| self.invalid("become unresponsive"))?;
        self.state = WorkerState::Unresponsive;
        self.consecutive_timeouts += 1;
        Ok(test_id)
    }

    /// Treat an unresponsive worker as fresh and make it schedulable again.
    pub fn recover(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != WorkerState::Unresponsive {
            return Err(self.invalid("recover"));
        }
        self.state = WorkerState::Idle;
        self.last_heartbeat = now;
        Ok(())
    }

    /// Permanently remove the worker. Returns the test it was holding, if any.
    pub fn disconnect(&mut self) -> Option<TestId> {
        self.state = WorkerState::Disconnected;
        self.current_test_id.take()
    }

    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let elapsed = now.signed_duration_since(self.last_heartbeat);
        match elapsed.to_std() {
            Ok(elapsed) => elapsed > timeout,
            // Heartbeat stamped in the future.
            Err(_) => false,
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            worker_id: self.worker_id.clone(),
            state: self.state,
            action,
        }
    }
}
