//! Test automation controller.
//!
//! Dispatches automated tests to worker sessions, classifies every log event
//! a worker streams back against a policy, and produces a per-test verdict
//! report. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, run records,
//!   worker sessions, invariants). Every operation takes `now` explicitly.
//! - **[`io`]**: Side effects (config and manifest files, child processes,
//!   the worker transport, report output).
//!
//! [`orchestrator`] owns all scheduling state and is driven by [`run`], which
//! pumps worker messages and timer ticks into it from a single thread.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
