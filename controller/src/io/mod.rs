//! Side-effecting helpers: files, child processes and worker transport.

pub mod config;
pub mod manifest;
pub mod process;
pub mod report_sink;
pub mod transport;
