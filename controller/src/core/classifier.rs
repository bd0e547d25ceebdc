//! Deterministic classification of log events.

use crate::core::policy::Policy;
use crate::core::types::{LogEvent, Severity, Verdict};

/// Classify a log event into `Pass`, `Warn` or `Fail` under `policy`.
///
/// - Events from a suppressed category always pass.
/// - `Info` always passes.
/// - `Warning` fails only when warnings are treated as failures, else warns.
/// - `Error` fails when errors are treated as failures, else warns.
pub fn classify(event: &LogEvent, policy: &Policy) -> Verdict {
    if policy.is_suppressed(event.category.as_deref()) {
        return Verdict::Pass;
    }
    match event.severity {
        Severity::Info => Verdict::Pass,
        Severity::Warning => escalate(policy.treat_warnings_as_failures),
        Severity::Error => escalate(policy.treat_errors_as_failures),
    }
}

fn escalate(as_failure: bool) -> Verdict {
    if as_failure {
        Verdict::Fail
    } else {
        Verdict::Warn
    }
}
