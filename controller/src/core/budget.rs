//! Shared time budget helpers for deterministic orchestration.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Return the remaining time budget until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    deadline
        .signed_duration_since(now)
        .to_std()
        .ok()
        .filter(|remaining| !remaining.is_zero())
}

/// Deadline for a run started at `started` with an optional wall-clock cap.
pub fn run_deadline(started: DateTime<Utc>, max_run: Option<Duration>) -> Option<DateTime<Utc>> {
    let max_run = chrono::Duration::from_std(max_run?).ok()?;
    started.checked_add_signed(max_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn remaining_until_deadline() {
        let deadline = t0() + chrono::Duration::seconds(10);
        assert_eq!(
            remaining_budget(deadline, t0() + chrono::Duration::seconds(4)),
            Some(Duration::from_secs(6))
        );
        assert_eq!(remaining_budget(deadline, deadline), None);
        assert_eq!(
            remaining_budget(deadline, deadline + chrono::Duration::seconds(1)),
            None
        );
    }

    #[test]
    fn no_cap_means_no_deadline() {
        assert_eq!(run_deadline(t0(), None), None);
        assert_eq!(
            run_deadline(t0(), Some(Duration::from_secs(60))),
            Some(t0() + chrono::Duration::seconds(60))
        );
    }
}
