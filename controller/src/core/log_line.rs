//! Parsing of raw worker output lines into structured log fields.

use std::sync::LazyLock;

use crate::core::types::Severity;

/// Severity, category and message extracted from one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub severity: Severity,
    pub category: Option<String>,
    pub message: String,
}

/// Parse a line of the form `[time][frame]Category: Verbosity: message`.
///
/// Bracketed prefixes, the category and the verbosity are all optional. Lines
/// that do not match a known verbosity are `Info` and keep their text.
pub fn parse_log_line(line: &str) -> ParsedLine {
    static LINE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^(?:\[[^\]]*\])*\s*(?:(?P<first>[A-Za-z0-9_]+):\s+)?(?:(?P<second>[A-Za-z]+):\s*)?(?P<message>.*)$")
            .unwrap()
    });

    let line = line.trim_end_matches(['\r', '\n']);
    let Some(caps) = LINE_RE.captures(line) else {
        return info(None, line);
    };
    let first = caps.name("first").map(|m| m.as_str());
    let second = caps.name("second").map(|m| m.as_str());
    let message = caps.name("message").map_or("", |m| m.as_str());

    match (first, second) {
        (Some(first), Some(second)) => match (verbosity(first), verbosity(second)) {
            (Some(severity), _) => ParsedLine {
                severity,
                category: None,
                message: format!("{second}: {message}"),
            },
            (None, Some(severity)) => ParsedLine {
                severity,
                category: Some(first.to_string()),
                message: message.to_string(),
            },
            (None, None) => info(Some(first), &format!("{second}: {message}")),
        },
        (Some(first), None) => match verbosity(first) {
            Some(severity) => ParsedLine {
                severity,
                category: None,
                message: message.to_string(),
            },
            None => info(Some(first), message),
        },
        // `second` only matches after `first` unless the first token has no
        // trailing whitespace, e.g. `Error:message`.
        (None, Some(second)) => match verbosity(second) {
            Some(severity) => ParsedLine {
                severity,
                category: None,
                message: message.to_string(),
            },
            None => info(None, line),
        },
        (None, None) => info(None, message),
    }
}

fn info(category: Option<&str>, message: &str) -> ParsedLine {
    ParsedLine {
        severity: Severity::Info,
        category: category.map(str::to_string),
        message: message.to_string(),
    }
}

fn verbosity(token: &str) -> Option<Severity> {
    match token {
        "Fatal" | "Error" => Some(Severity::Error),
        "Warning" => Some(Severity::Warning),
        "Display" | "Log" | "Verbose" | "VeryVerbose" => Some(Severity::Info),
        _ => None,
    }
}
