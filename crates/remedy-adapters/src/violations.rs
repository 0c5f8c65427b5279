//! Pre-computed violation lists
//!
//! Reads analyzer output in the PSScriptAnalyzer JSON shape
//! (`Invoke-ScriptAnalyzer ... | ConvertTo-Json`): an array of records, or a
//! single record, each naming its script.

use remedy_core::detect::{Detector, DetectorError};
use remedy_core::{Location, Severity, Violation};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViolationFileError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Records {
    Many(Vec<RawRecord>),
    One(RawRecord),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawRecord {
    rule_name: String,
    #[serde(default)]
    severity: Option<RawSeverity>,
    line: usize,
    #[serde(default)]
    column: Option<usize>,
    script_path: PathBuf,
    #[serde(default)]
    message: String,
    #[serde(default)]
    extent: Option<RawExtent>,
}

/// Analyzers emit the severity either as a name or as its enum value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSeverity {
    Label(String),
    Level(u8),
}

impl RawSeverity {
    fn severity(&self) -> Severity {
        match self {
            RawSeverity::Label(label) => Severity::from_label(label),
            RawSeverity::Level(0) => Severity::Information,
            RawSeverity::Level(1) => Severity::Warning,
            RawSeverity::Level(_) => Severity::Error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawExtent {
    start_offset: usize,
    end_offset: usize,
}

/// Violations loaded from disk, served per file.
#[derive(Debug, Clone, Default)]
pub struct ViolationFile {
    by_path: HashMap<PathBuf, Vec<Violation>>,
}

impl ViolationFile {
    pub fn load(path: &Path) -> Result<Self, ViolationFileError> {
        let content = fs::read_to_string(path).map_err(|source| ViolationFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&content, base).map_err(|source| ViolationFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Relative script paths are resolved against `base`.
    pub fn from_json(content: &str, base: &Path) -> Result<Self, serde_json::Error> {
        let records = match serde_json::from_str::<Records>(content)? {
            Records::Many(records) => records,
            Records::One(record) => vec![record],
        };
        let mut by_path: HashMap<PathBuf, Vec<Violation>> = HashMap::new();
        for record in records {
            let script = if record.script_path.is_absolute() {
                record.script_path.clone()
            } else {
                base.join(&record.script_path)
            };
            let mut location = Location::at(record.line, record.column.unwrap_or(1));
            if let Some(extent) = &record.extent {
                if extent.start_offset <= extent.end_offset {
                    location = location.with_span(extent.start_offset..extent.end_offset);
                }
            }
            let severity = record
                .severity
                .as_ref()
                .map(RawSeverity::severity)
                .unwrap_or(Severity::Warning);
            by_path.entry(key_for(&script)).or_default().push(
                Violation::new(record.rule_name, severity, location).with_message(record.message),
            );
        }
        Ok(Self { by_path })
    }

    pub fn for_path(&self, path: &Path) -> &[Violation] {
        self.by_path
            .get(&key_for(path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn file_count(&self) -> usize {
        self.by_path.len()
    }

    pub fn violation_count(&self) -> usize {
        self.by_path.values().map(Vec::len).sum()
    }
}

fn key_for(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Detector for ViolationFile {
    fn name(&self) -> &str {
        "violation-file"
    }

    fn detect(&self, path: &Path, _content: &str) -> Result<Vec<Violation>, DetectorError> {
        Ok(self.for_path(path).to_vec())
    }
}
