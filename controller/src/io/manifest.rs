//! Test manifest parsing and validation.
//!
//! A manifest is a TOML file listing the tests of a run in execution order:
//!
//! ```toml
//! [[tests]]
//! id = "smoke.boot"
//! command = ["./game", "-ExecCmds=Automation RunTests Smoke.Boot"]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::core::types::TestSpec;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub tests: Vec<TestSpec>,
}

impl Manifest {
    /// Load and validate a manifest from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read manifest {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load manifest {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(contents).context("parse manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            bail!("tests must be a non-empty array");
        }
        let mut seen = HashSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            validate_test(test).with_context(|| format!("tests[{index}] invalid"))?;
            if !seen.insert(test.id.as_str()) {
                bail!("duplicate test id {}", test.id);
            }
        }
        Ok(())
    }
}

fn validate_test(test: &TestSpec) -> Result<()> {
    let id = test.id.as_str();
    if id.trim().is_empty() {
        bail!("id must be non-empty");
    }
    if id.chars().any(char::is_whitespace) {
        bail!("id must not contain whitespace");
    }
    if test.command.is_empty() || test.command[0].trim().is_empty() {
        bail!("command must be a non-empty array");
    }
    for key in test.env.keys() {
        if key.trim().is_empty() {
            bail!("env key must be non-empty");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_manifest_in_order() {
        let input = r#"
[[tests]]
id = "smoke.boot"
command = ["./game", "-ExecCmds=Automation RunTests Smoke.Boot"]

[[tests]]
id = "smoke.menu"
command = ["./game", "-map=Menu"]
working_dir = "build"

[tests.env]
UE_LOG_LEVEL = "Verbose"
"#;
        let manifest = Manifest::parse_str(input).expect("manifest parses");
        let ids: Vec<&str> = manifest.tests.iter().map(|test| test.id.as_str()).collect();
        assert_eq!(ids, vec!["smoke.boot", "smoke.menu"]);
        assert_eq!(
            manifest.tests[1].env.get("UE_LOG_LEVEL").map(String::as_str),
            Some("Verbose")
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let input = r#"
[[tests]]
id = "a"
command = ["true"]

[[tests]]
id = "a"
command = ["false"]
"#;
        let err = Manifest::parse_str(input).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate test id a"));
    }

    #[test]
    fn rejects_empty_command() {
        let input = r#"
[[tests]]
id = "a"
command = []
"#;
        let err = Manifest::parse_str(input).expect_err("empty command");
        assert!(format!("{err:#}").contains("command must be a non-empty array"));
    }

    #[test]
    fn rejects_whitespace_in_id() {
        let input = r#"
[[tests]]
id = "a b"
command = ["true"]
"#;
        let err = Manifest::parse_str(input).expect_err("invalid id");
        assert!(format!("{err:#}").contains("id must not contain whitespace"));
    }
}
