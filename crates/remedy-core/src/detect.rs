//! Violation detector contract
//!
//! Detection logic lives outside the fix pipeline. The pipeline only needs a
//! list of violations per file; where it comes from is up to the detector.

use crate::model::Violation;
use crate::parser::script::lex;
use crate::parser::Language;
use crate::registry::RuleRegistry;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    /// The detector cannot run at all. Fatal for the run.
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    /// The detector failed on one file.
    #[error("detector failed: {0}")]
    Failed(String),
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Checked once before any file is processed.
    fn probe(&self) -> Result<(), DetectorError> {
        Ok(())
    }

    /// Violations for one file, in detector order.
    fn detect(&self, path: &Path, content: &str) -> Result<Vec<Violation>, DetectorError>;
}

/// Runs the detection half of registered rules.
pub struct RuleDetector {
    registry: Arc<RuleRegistry>,
    only: Option<BTreeSet<String>>,
}

impl RuleDetector {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            only: None,
        }
    }

    /// Restrict detection to the given rule ids.
    pub fn limited_to(mut self, ids: BTreeSet<String>) -> Self {
        self.only = Some(ids);
        self
    }
}

impl Detector for RuleDetector {
    fn name(&self) -> &str {
        "builtin-rules"
    }

    fn detect(&self, path: &Path, content: &str) -> Result<Vec<Violation>, DetectorError> {
        // The built-in checks only understand PowerShell.
        if Language::from_path(path) != Language::PowerShell {
            return Ok(Vec::new());
        }
        let lexed = lex(content);
        let mut found = Vec::new();
        for entry in self.registry.in_chain_order() {
            if self.only.as_ref().is_some_and(|ids| !ids.contains(&entry.id)) {
                continue;
            }
            if let Some(check) = entry.check() {
                found.extend(check.check(content, &lexed));
            }
        }
        found.sort_by_key(|v| (v.location.line, v.location.column));
        Ok(found)
    }
}

/// A fixed list of violations applied to every file. Useful in tests and
/// when a caller already has detector output in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    violations: Vec<Violation>,
}

impl StaticDetector {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }
}

impl Detector for StaticDetector {
    fn name(&self) -> &str {
        "static"
    }

    fn detect(&self, _path: &Path, _content: &str) -> Result<Vec<Violation>, DetectorError> {
        Ok(self.violations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{builtin_registry, AVOID_ALIASES, AVOID_WRITE_HOST, TRAILING_WHITESPACE};

    fn detector() -> RuleDetector {
        RuleDetector::new(Arc::new(builtin_registry().unwrap()))
    }

    #[test]
    fn test_detects_builtin_violations_in_line_order() {
        let content = "Write-Host 'a'   \ngci\n";
        let found = detector().detect(Path::new("a.ps1"), content).unwrap();
        let ids: Vec<&str> = found.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec![AVOID_WRITE_HOST, TRAILING_WHITESPACE, AVOID_ALIASES]);
        assert_eq!(found[2].location.line, 2);
    }

    #[test]
    fn test_limited_detector() {
        let d = detector().limited_to([AVOID_ALIASES.to_string()].into_iter().collect());
        let found = d.detect(Path::new("a.ps1"), "Write-Host 'a'\ngci\n").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule_id, AVOID_ALIASES);
    }

    #[test]
    fn test_other_languages_have_no_builtin_checks() {
        let found = detector()
            .detect(Path::new("main.rs"), "fn main() {}   \n")
            .unwrap();
        assert!(found.is_empty());
    }
}
