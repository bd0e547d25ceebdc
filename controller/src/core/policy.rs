//! Log classification policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Controls whether warnings and errors logged during a test count as failures.
///
/// Loaded once per run and passed by reference to every classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Policy {
    /// Error-tagged events fail the test.
    pub treat_errors_as_failures: bool,

    /// Warning-tagged events fail the test instead of only warning.
    pub treat_warnings_as_failures: bool,

    /// Events from these log categories never affect the verdict.
    pub suppressed_categories: BTreeSet<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            treat_errors_as_failures: true,
            treat_warnings_as_failures: false,
            suppressed_categories: BTreeSet::new(),
        }
    }
}

impl Policy {
    pub fn is_suppressed(&self, category: Option<&str>) -> bool {
        category.is_some_and(|category| self.suppressed_categories.contains(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_on_errors_only() {
        let policy = Policy::default();
        assert!(policy.treat_errors_as_failures);
        assert!(!policy.treat_warnings_as_failures);
        assert!(policy.suppressed_categories.is_empty());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let policy: Policy = toml::from_str("treat_warnings_as_failures = true").expect("parse");
        assert!(policy.treat_errors_as_failures);
        assert!(policy.treat_warnings_as_failures);
    }

    #[test]
    fn uncategorized_events_are_never_suppressed() {
        let policy = Policy {
            suppressed_categories: BTreeSet::from(["LogNet".to_string()]),
            ..Policy::default()
        };
        assert!(policy.is_suppressed(Some("LogNet")));
        assert!(!policy.is_suppressed(Some("LogTemp")));
        assert!(!policy.is_suppressed(None));
    }
}
