//! Configuration parsing and validation.
//!
//! Carryover is configured via a TOML file (default
//! `./config/carryover.toml`). Only `[db]` and `[source]` are required;
//! every other section has defaults matching the flashcard store layout.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/flashcards.sqlite3"
//!
//! [collections]
//! primary = "cards"
//! mirrors = ["cardbank"]
//!
//! [layout]
//! group_field = "topicId"
//! primary_field = "prompt"
//! secondary_field = "answer"
//!
//! [matching]
//! accept_threshold = 0.60
//! review_threshold = 0.75
//! force_leftovers = true
//!
//! [template]
//! require_existing = false
//!
//! [source]
//! path = "./rebuilt.json"
//!
//! [groups]
//! "Topic 1: Global Warming" = "9f2c0a1e-topic-global-warming"
//! ```

use anyhow::{bail, Context, Result};
use carryover_core::layout::RecordLayout;
use carryover_core::reconcile::MatchPolicy;
use carryover_core::similarity::EXACT_SCORE;
use carryover_core::template::MetadataTemplate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub layout: RecordLayout,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub template: TemplateConfig,
    pub source: SourceConfig,
    /// Source label → group key. Empty means labels are used as keys.
    #[serde(default)]
    pub groups: BTreeMap<String, String>,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_primary_collection")]
    pub primary: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_collection(),
            mirrors: Vec::new(),
        }
    }
}

fn default_primary_collection() -> String {
    "cards".to_string()
}

impl CollectionsConfig {
    /// Primary first, then mirrors.
    pub fn all(&self) -> Vec<String> {
        std::iter::once(self.primary.clone())
            .chain(self.mirrors.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    #[serde(default = "default_force_leftovers")]
    pub force_leftovers: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            review_threshold: default_review_threshold(),
            force_leftovers: default_force_leftovers(),
        }
    }
}

fn default_accept_threshold() -> f64 {
    0.60
}
fn default_review_threshold() -> f64 {
    0.75
}
fn default_force_leftovers() -> bool {
    true
}

impl MatchingConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            accept_threshold: self.accept_threshold,
            review_threshold: self.review_threshold,
            force_leftovers: self.force_leftovers,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TemplateConfig {
    /// Refuse to insert into a group with no entity to copy structure from.
    #[serde(default)]
    pub require_existing: bool,
    /// Replaces the built-in structural defaults when given.
    #[serde(default)]
    pub defaults: Option<Map<String, Value>>,
    /// Replaces the built-in reset fields when given.
    #[serde(default)]
    pub reset: Option<Map<String, Value>>,
}

impl TemplateConfig {
    pub fn template(&self) -> MetadataTemplate {
        let builtin = MetadataTemplate::builtin();
        MetadataTemplate {
            defaults: self.defaults.clone().unwrap_or(builtin.defaults),
            reset: self.reset.clone().unwrap_or(builtin.reset),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub path: PathBuf,
    /// Abort when a label listed in `[groups]` is absent from the source.
    #[serde(default = "default_require_all_groups")]
    pub require_all_groups: bool,
}

fn default_require_all_groups() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_backup_enabled")]
    pub enabled: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_backup_enabled(),
        }
    }
}

fn default_backup_enabled() -> bool {
    true
}

/// Read, parse, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate matching
    let m = &config.matching;
    if !(0.0..=EXACT_SCORE).contains(&m.accept_threshold) {
        bail!("matching.accept_threshold must be in [0.0, {}]", EXACT_SCORE);
    }
    if !(0.0..=EXACT_SCORE).contains(&m.review_threshold) {
        bail!("matching.review_threshold must be in [0.0, {}]", EXACT_SCORE);
    }

    // Validate layout
    config
        .layout
        .validate()
        .context("invalid [layout] section")?;

    // Validate collections
    if config.collections.primary.trim().is_empty() {
        bail!("collections.primary must not be empty");
    }
    let all = config.collections.all();
    for (i, c) in all.iter().enumerate() {
        if c.trim().is_empty() {
            bail!("collections.mirrors must not contain empty names");
        }
        if all[..i].contains(c) {
            bail!("collection '{}' is listed more than once", c);
        }
    }

    // Validate template
    let template = config.template.template();
    for key in template.keys() {
        if config.layout.fields().contains(&key.as_str()) {
            bail!(
                "template field '{}' collides with a [layout] field; content is never templated",
                key
            );
        }
    }

    // Validate groups
    for (label, key) in &config.groups {
        if key.trim().is_empty() {
            bail!("groups.\"{}\" maps to an empty group key", label);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "data/db.sqlite3"

[source]
path = "rebuilt.json"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.collections.all(), vec!["cards".to_string()]);
        assert_eq!(cfg.layout, RecordLayout::default());
        assert_eq!(cfg.matching.policy(), MatchPolicy::default());
        assert!(cfg.source.require_all_groups);
        assert!(cfg.backup.enabled);
        assert!(cfg.groups.is_empty());
        assert_eq!(cfg.template.template(), MetadataTemplate::builtin());
    }

    #[test]
    fn test_full_config() {
        let text = format!(
            "{}{}",
            MINIMAL,
            r#"
[collections]
primary = "cards"
mirrors = ["cardbank"]

[matching]
accept_threshold = 0.7
force_leftovers = false

[template]
require_existing = true
[template.defaults]
type = "qa"
options = []

[groups]
"Topic 1: Global Warming" = "t-1"
"#
        );
        let cfg = parse_config(&text).unwrap();
        assert_eq!(cfg.collections.all(), vec!["cards", "cardbank"]);
        assert_eq!(cfg.matching.accept_threshold, 0.7);
        assert_eq!(cfg.matching.review_threshold, 0.75);
        assert!(!cfg.matching.force_leftovers);
        assert!(cfg.template.require_existing);
        let t = cfg.template.template();
        assert_eq!(t.defaults.len(), 2);
        assert_eq!(t.reset, MetadataTemplate::builtin().reset);
        assert_eq!(cfg.groups["Topic 1: Global Warming"], "t-1");
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let text = format!("{}\n[matching]\naccept_threshold = 2.5\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_rejects_duplicate_collections() {
        let text = format!(
            "{}\n[collections]\nprimary = \"cards\"\nmirrors = [\"cards\"]\n",
            MINIMAL
        );
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_rejects_template_touching_content() {
        let text = format!("{}\n[template.reset]\nprompt = \"\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        assert!(parse_config("[db]\npath = \"x\"\n").is_err());
    }
}
