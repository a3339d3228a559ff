//! Runtime configuration.
//!
//! All tunables live in [`AssistantConfig`]. Values can be overridden from a
//! TOML file (`~/.config/askql/config.toml` or an explicit path); anything
//! absent falls back to the defaults below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AskqlError, AskqlResult};

/// Tunable parameters for the translation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Distinct sample values collected per column during introspection.
    pub sample_limit: u32,
    /// LIMIT appended to non-aggregate SELECTs that lack one.
    pub row_limit: i64,
    /// Default N for top-N style questions with no explicit number.
    pub default_top_k: i64,
    /// How many ranked templates to try before giving up.
    pub retry_budget: usize,
    /// Minimum cosine similarity for a candidate to be composed at all.
    pub min_similarity: f64,
    /// Fully-concrete templates (no slots) have nothing to bind, so the
    /// question must cover at least this fraction of the pattern's tokens
    /// before one is composed.
    pub concrete_coverage: f64,
    /// Weight given to static seed templates.
    pub seed_weight: f64,
    /// Weight given to schema-derived templates.
    pub schema_weight: f64,
    /// Initial weight for templates learned from feedback, kept below
    /// long-surviving seeds so a single correction cannot dominate ranking.
    pub learned_weight: f64,
    /// Reinforcement step: w += (1 - w) * reinforce_rate.
    pub reinforce_rate: f64,
    /// Penalty step: w *= 1 - penalty_rate.
    pub penalty_rate: f64,
    /// Fuzzy-similarity floor above which a question counts as already
    /// covered by the corpus (active-correction novelty check).
    pub novelty_fuzzy_threshold: f64,
    /// Cosine-similarity floor for the same novelty check.
    pub novelty_cosine_threshold: f64,
    /// Explicitly configured token -> table/column aliases, merged into the
    /// synonym map at catalog build time.
    pub aliases: HashMap<String, String>,
    /// Rows generated for the demo policies table.
    pub demo_policies: u32,
    /// Rows generated for the demo claims table.
    pub demo_claims: u32,
    /// Seed for the demo data generator.
    pub demo_seed: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            sample_limit: 40,
            row_limit: 200,
            default_top_k: 10,
            retry_budget: 8,
            min_similarity: 0.05,
            concrete_coverage: 0.8,
            seed_weight: 0.7,
            schema_weight: 0.6,
            learned_weight: 0.5,
            reinforce_rate: 0.2,
            penalty_rate: 0.3,
            novelty_fuzzy_threshold: 0.75,
            novelty_cosine_threshold: 0.55,
            aliases: HashMap::new(),
            demo_policies: 2000,
            demo_claims: 5000,
            demo_seed: 7,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    pub fn load() -> AskqlResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit TOML file.
    pub fn from_path(path: &Path) -> AskqlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AskqlError::Config(e.to_string()))
    }

    /// `~/.config/askql/config.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("askql").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let cfg = AssistantConfig::default();
        assert!(cfg.reinforce_rate > 0.0 && cfg.reinforce_rate < 1.0);
        assert!(cfg.penalty_rate > 0.0 && cfg.penalty_rate < 1.0);
        assert!(cfg.learned_weight < cfg.seed_weight);
        assert!(cfg.retry_budget >= 1);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg: AssistantConfig = toml::from_str("row_limit = 50\nretry_budget = 5").unwrap();
        assert_eq!(cfg.row_limit, 50);
        assert_eq!(cfg.retry_budget, 5);
        // untouched fields keep their defaults
        assert_eq!(cfg.sample_limit, 40);
    }
}
