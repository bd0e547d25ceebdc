//! Deterministic, pure logic shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures, take the current time as an argument, and return
//! deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod errors;
pub mod invariants;
pub mod log_line;
pub mod policy;
pub mod record;
pub mod session;
pub mod types;
