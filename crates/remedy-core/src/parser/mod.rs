//! Source parser contract and the bundled parser implementations
//!
//! The validation gate only needs three facts about a piece of source text:
//! whether it parsed, how many errors the parser found, and how many
//! top-level declarations it contains.

pub mod grammar;
pub mod script;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use grammar::GrammarParser;
pub use script::ScriptParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    /// The parser cannot be used at all. Fatal for a run.
    #[error("parser unavailable: {0}")]
    Unavailable(String),
    /// The parser ran but produced nothing usable for this input.
    #[error("parse failed: {0}")]
    Failed(String),
}

/// What the parser reports about one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParseReport {
    pub success: bool,
    pub error_count: usize,
    pub top_level_declaration_count: usize,
    /// First few problems, for rejection messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    /// One location-free entry per error, so two reports can be compared
    /// even when edits moved lines around.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problem_kinds: Vec<String>,
}

impl ParseReport {
    /// Problems in `self` that `baseline` does not account for, compared as
    /// a multiset of kinds. Falls back to the bare error counts for parsers
    /// that report no kinds.
    pub fn new_problems_since(&self, baseline: &ParseReport) -> Vec<String> {
        if self.problem_kinds.len() != self.error_count
            || baseline.problem_kinds.len() != baseline.error_count
        {
            let extra = self.error_count.saturating_sub(baseline.error_count);
            return vec!["parse error".to_string(); extra];
        }
        let mut remaining: HashMap<&str, usize> = HashMap::new();
        for kind in &baseline.problem_kinds {
            *remaining.entry(kind.as_str()).or_default() += 1;
        }
        let mut introduced = Vec::new();
        for kind in &self.problem_kinds {
            match remaining.get_mut(kind.as_str()) {
                Some(n) if *n > 0 => *n -= 1,
                _ => introduced.push(kind.clone()),
            }
        }
        introduced
    }
}

pub trait SourceParser: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, content: &str) -> Result<ParseReport, ParserError>;

    /// Startup check used before any file is touched.
    fn probe(&self) -> Result<(), ParserError> {
        self.parse("").map(|_| ())
    }
}

/// Languages the pipeline knows how to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    PowerShell,
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "ps1" | "psm1" | "psd1" => Language::PowerShell,
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::PowerShell => "powershell",
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Python => "python",
            Language::Go => "go",
            Language::Unknown => "unknown",
        }
    }
}

/// Picks a parser per file. Cheap to clone and shareable across workers.
#[derive(Clone)]
pub struct ParserSet {
    script: Arc<dyn SourceParser>,
    /// Replaces every built-in parser when set. Used to plug in an external
    /// parser for the whole run.
    override_parser: Option<Arc<dyn SourceParser>>,
}

impl Default for ParserSet {
    fn default() -> Self {
        Self {
            script: Arc::new(ScriptParser),
            override_parser: None,
        }
    }
}

impl std::fmt::Debug for ParserSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserSet")
            .field("script", &self.script.name())
            .field(
                "override_parser",
                &self.override_parser.as_ref().map(|p| p.name().to_string()),
            )
            .finish()
    }
}

impl ParserSet {
    /// Use `parser` for every file regardless of language.
    pub fn with_override(parser: Arc<dyn SourceParser>) -> Self {
        Self {
            override_parser: Some(parser),
            ..Self::default()
        }
    }

    pub fn for_language(&self, language: Language) -> Result<Arc<dyn SourceParser>, ParserError> {
        if let Some(p) = &self.override_parser {
            return Ok(p.clone());
        }
        match language {
            Language::PowerShell => Ok(self.script.clone()),
            Language::Unknown => Err(ParserError::Unavailable(
                "no parser for unknown language".to_string(),
            )),
            other => GrammarParser::new(other)
                .map(|p| Arc::new(p) as Arc<dyn SourceParser>)
                .ok_or_else(|| ParserError::Unavailable(format!("no grammar for {}", other.name()))),
        }
    }

    pub fn for_path(&self, path: &Path) -> Result<Arc<dyn SourceParser>, ParserError> {
        self.for_language(Language::from_path(path))
    }

    /// Probe every parser the given languages would use.
    pub fn probe(&self, languages: &[Language]) -> Result<(), ParserError> {
        for language in languages {
            self.for_language(*language)?.probe()?;
        }
        Ok(())
    }
}
