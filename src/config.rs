//! Per-chapter replay configuration.
//!
//! One JSON file per chapter names the listing source, the sample project,
//! and the exceptions (skips, ignorable diff lines) that replay must honor.
//! Relative paths are resolved against the directory holding the config.
use crate::classify::ToolSpec;
use crate::replay::{NormalizerSpec, OutputMatcher, SkipDirective};
use crate::util::resolve_relative;
use crate::verify::IgnoreSet;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_FINAL_COMMIT_MESSAGE: &str = "final commit";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterConfig {
    pub schema_version: u32,
    /// Chapter label; also the default reference branch on `origin`.
    pub chapter: String,
    /// Label of the chapter whose final commit replay starts from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_chapter: Option<String>,
    /// Chapter source: `.json` block data or fenced chapter text.
    pub listings: PathBuf,
    /// Sample project path or URL.
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub skips: Vec<SkipDirective>,
    /// Substrings, or `re:` regexes, for diff lines allowed to differ.
    #[serde(default)]
    pub ignore_final_diff: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub output_normalizers: Vec<NormalizerSpec>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_commit_message: Option<String>,
}

impl ChapterConfig {
    /// Reference the final tree is compared with; defaults to the chapter's branch.
    pub fn reference(&self) -> String {
        self.reference
            .clone()
            .unwrap_or_else(|| format!("origin/{}", self.chapter))
    }

    pub fn final_commit_message(&self) -> &str {
        self.final_commit_message
            .as_deref()
            .unwrap_or(DEFAULT_FINAL_COMMIT_MESSAGE)
    }

    pub fn ignore_set(&self) -> Result<IgnoreSet> {
        IgnoreSet::parse(&self.ignore_final_diff)
    }

    pub fn output_matcher(&self) -> Result<OutputMatcher> {
        OutputMatcher::new(&self.output_normalizers)
    }
}

/// A config together with the directory its relative paths hang off.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ChapterConfig,
    pub base_dir: PathBuf,
}

impl LoadedConfig {
    pub fn listings_path(&self) -> PathBuf {
        resolve_relative(&self.base_dir, &self.config.listings)
    }

    /// URLs pass through; local paths resolve against the config directory.
    pub fn repo_location(&self) -> String {
        let repo = self.config.repo.as_str();
        if is_remote(repo) {
            return repo.to_string();
        }
        resolve_relative(&self.base_dir, Path::new(repo))
            .display()
            .to_string()
    }
}

fn is_remote(repo: &str) -> bool {
    repo.contains("://") || (repo.contains('@') && repo.contains(':'))
}

pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ChapterConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse chapter config {}", path.display()))?;
    validate_config(&config)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedConfig { config, base_dir })
}

#[cfg(test)]
pub(crate) fn write_config(path: &Path, config: &ChapterConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize chapter config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Checks that need no listings or sandbox.
pub fn validate_config(config: &ChapterConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported chapter config schema_version {}",
            config.schema_version
        ));
    }
    if config.chapter.trim().is_empty() {
        return Err(anyhow!("chapter must be non-empty"));
    }
    if config.repo.trim().is_empty() {
        return Err(anyhow!("repo must be non-empty"));
    }
    if config.listings.as_os_str().is_empty() {
        return Err(anyhow!("listings must be non-empty"));
    }

    let mut positions = BTreeSet::new();
    for skip in &config.skips {
        if !positions.insert(skip.position) {
            return Err(anyhow!("duplicate skip for listing {}", skip.position));
        }
        if skip.contains.is_empty() {
            return Err(anyhow!(
                "skip for listing {} has an empty contains string",
                skip.position
            ));
        }
    }

    for tool in &config.tools {
        if tool.name.trim().is_empty() {
            return Err(anyhow!("tool entries need a name"));
        }
        if tool.prefixes.iter().all(|prefix| prefix.trim().is_empty()) {
            return Err(anyhow!("tool {:?} has no command prefixes", tool.name));
        }
    }

    config.ignore_set().context("ignore_final_diff")?;
    config.output_matcher().context("output_normalizers")?;
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
