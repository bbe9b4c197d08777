use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Sequencer tunables. Every field has a default, so a config file only
/// needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Target keyword that addresses the level itself in assign/invoke.
    pub level_target: String,
    /// Upper bound on loop-while iterations within one tick.
    pub max_loop_iterations: u32,
    /// Seed for `random()`, `chance()` and `randint()`.
    pub seed: u64,
    /// Directory timelines are read from, if any.
    pub timelines_dir: Option<String>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            level_target: "__level__".to_string(),
            max_loop_iterations: 1000,
            seed: 0,
            timelines_dir: None,
        }
    }
}

impl SequencerConfig {
    pub fn load_from_ron(path: &Path) -> Result<SequencerConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<SequencerConfig, ConfigError> {
        Ok(ron::from_str(input)?)
    }
}
