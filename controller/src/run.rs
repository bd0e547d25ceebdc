//! Scheduling loop for `automation run`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{remaining_budget, run_deadline};
use crate::core::types::{TestSpec, WorkerId};
use crate::io::config::ControllerConfig;
use crate::io::transport::{Transport, WorkerMessage};
use crate::orchestrator::Orchestrator;
use crate::report::RunReport;

/// Names of the local worker sessions for a config.
pub fn worker_ids(config: &ControllerConfig) -> Vec<WorkerId> {
    (1..=config.workers.count)
        .map(|n| WorkerId::new(format!("worker-{n}")))
        .collect()
}

/// Run `specs` to completion and return the report.
///
/// All state changes happen on this thread: each pass ticks the orchestrator,
/// then waits up to one tick interval for worker messages and applies every
/// message available. Raising `cancel` or exceeding `max_run_secs` aborts the
/// run; the report is still produced. Messages still queued when `cancel` is
/// observed are discarded.
#[instrument(skip_all, fields(tests = specs.len(), workers = config.workers.count))]
pub fn run_tests<T: Transport + ?Sized>(
    specs: Vec<TestSpec>,
    config: &ControllerConfig,
    transport: &T,
    inbox: &Receiver<WorkerMessage>,
    cancel: &AtomicBool,
) -> Result<RunReport> {
    let started = Utc::now();
    let deadline = run_deadline(started, config.scheduler.max_run());
    let tick_interval = config.scheduler.tick_interval();

    let mut orchestrator = Orchestrator::new(config.policy.clone(), config.scheduler.clone());
    for worker_id in worker_ids(config) {
        orchestrator.add_worker(worker_id, started);
    }
    for spec in specs {
        let id = spec.id.clone();
        orchestrator
            .enqueue(spec)
            .with_context(|| format!("enqueue test {id}"))?;
    }
    info!("run started");

    let mut inbox_closed = false;
    loop {
        let now = Utc::now();
        if cancel.load(Ordering::SeqCst) {
            info!("cancellation requested");
            orchestrator.abort(now, transport);
        } else if let Some(deadline) = deadline
            && remaining_budget(deadline, now).is_none()
        {
            warn!(max_run_secs = ?config.scheduler.max_run_secs, "run deadline exceeded");
            orchestrator.abort(now, transport);
        }

        orchestrator.tick(now, transport);
        for violation in orchestrator.check_invariants() {
            warn!(violation = %violation, "scheduler invariant violated");
        }
        if orchestrator.is_complete() {
            break;
        }

        let wait = deadline
            .and_then(|deadline| remaining_budget(deadline, now))
            .map_or(tick_interval, |remaining| remaining.min(tick_interval));
        if inbox_closed {
            thread::sleep(wait);
            continue;
        }
        match inbox.recv_timeout(wait) {
            Ok(message) => {
                let mut next = Some(message);
                while let Some(message) = next.take() {
                    // Results arriving after a cancel must not beat the abort.
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    orchestrator.handle_message(message, Utc::now());
                    next = inbox.try_recv().ok();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("all worker channels closed");
                inbox_closed = true;
            }
        }
    }

    let report = orchestrator.report();
    info!(
        passed = report.passed,
        failed = report.failed,
        timed_out = report.timed_out,
        not_run = report.not_run,
        aborted = report.aborted,
        "run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_are_numbered_from_one() {
        let mut config = ControllerConfig::default();
        config.workers.count = 3;
        let ids: Vec<String> = worker_ids(&config)
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["worker-1", "worker-2", "worker-3"]);
    }
}
