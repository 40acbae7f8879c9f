use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// How the chain builder decides whether two consecutive plays are linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionGapPolicy {
    /// The later play must start within the gap after the earlier one
    #[default]
    Forward,
    /// Subtract in the reverse direction, which links nearly every pair
    Permissive,
}

/// Settings for one playlist generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub length: usize, // number of songs including the seed
    pub max_consecutive_by_same_artist: usize, // values below 2 disable the check
    pub max_attempts_per_position: usize,
    pub max_repairs: usize, // repeated-subsequence deletions allowed per run
    pub session_gap_minutes: i64,
    pub session_gap: SessionGapPolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            length: 20,
            max_consecutive_by_same_artist: 3,
            max_attempts_per_position: 10,
            max_repairs: 200,
            session_gap_minutes: 60,
            session_gap: SessionGapPolicy::Forward,
        }
    }
}

impl GeneratorConfig {
    /// Load a generator configuration from a JSON file. Missing fields keep their defaults.
    pub fn load_from_file(path: &str) -> Result<GeneratorConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read generator config '{path}'"))?;
        let config: GeneratorConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse generator config '{path}'"))?;
        Ok(config)
    }

    pub fn session_gap(&self) -> TimeDelta {
        TimeDelta::minutes(self.session_gap_minutes.max(0))
    }
}
