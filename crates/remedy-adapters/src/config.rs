//! Configuration management for remedy
//!
//! Read from `remedy.toml` in the project root, falling back to
//! `~/.config/remedy/config.toml`. The first file found wins; files are not
//! merged. Command-line flags are layered on top by the binary.

use crate::atomic::write_atomic;
use crate::backup::{BackupLocation, BackupStore, DEFAULT_BACKUP_DIR};
use crate::discover::DiscoverOptions;
use anyhow::Context;
use remedy_core::registry::RuleRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PROJECT_CONFIG_FILE: &str = "remedy.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub fix: FixConfig,
    pub backup: BackupConfig,
    pub discover: DiscoverConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixConfig {
    /// Replaces the default rule set when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_rules: Option<Vec<String>>,
    pub disabled_rules: Vec<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_file_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    pub location: BackupLocation,
    pub dir_name: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            location: BackupLocation::default(),
            dir_name: DEFAULT_BACKUP_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverConfig {
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["ps1".into(), "psm1".into(), "psd1".into()],
            exclude_dirs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl Config {
    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remedy").join("config.toml"))
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.sanitize();
        Ok(config)
    }

    /// Find and load the config for `project_root`.
    ///
    /// An explicit path must exist. Otherwise the project file, then the
    /// user file, then defaults. Returns where the config came from.
    pub fn discover(
        project_root: &Path,
        explicit: Option<&Path>,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load_file(path)?, Some(path.to_path_buf())));
        }
        let candidates = std::iter::once(project_root.join(PROJECT_CONFIG_FILE))
            .chain(Self::user_config_path());
        for path in candidates {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config");
                return Ok((Self::load_file(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    fn sanitize(&mut self) {
        for ext in &mut self.discover.extensions {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }
        if self.backup.dir_name.trim().is_empty() {
            self.backup.dir_name = DEFAULT_BACKUP_DIR.to_string();
        }
        if self.fix.max_workers == Some(0) {
            self.fix.max_workers = None;
        }
    }

    /// Enabled rule ids after checking every configured id is registered.
    pub fn enabled_rules(&self, registry: &RuleRegistry) -> anyhow::Result<BTreeSet<String>> {
        registry
            .resolve_enabled(self.fix.enabled_rules.as_deref(), &self.fix.disabled_rules)
            .context("Invalid rule selection in config")
    }

    pub fn per_file_timeout(&self) -> Option<Duration> {
        self.fix
            .per_file_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn backup_store(&self) -> BackupStore {
        BackupStore::new(self.backup.location, self.backup.dir_name.clone())
    }

    pub fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            extensions: self.discover.extensions.clone(),
            exclude_dirs: self.discover.exclude_dirs.clone(),
            follow_symlinks: self.discover.follow_symlinks,
            backup_dir_name: self.backup.dir_name.clone(),
        }
    }
}
