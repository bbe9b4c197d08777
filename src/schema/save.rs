use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::watched::WatchedSet;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    Serialize(#[from] ron::Error),
}

/// The part of a save slot owned by the sequencer.
///
/// Other save state (map progress, inventory) is the game's business;
/// unknown fields in a slot file are ignored on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveSlot {
    #[serde(default)]
    pub watched_timelines: WatchedSet,
}

impl SaveSlot {
    /// Capture the current session state. The slot keeps its own copy, so
    /// later marks do not leak into it.
    pub fn capture(watched: &WatchedSet) -> Self {
        Self {
            watched_timelines: watched.snapshot(),
        }
    }

    pub fn parse_ron(input: &str) -> Result<SaveSlot, SaveError> {
        Ok(ron::from_str(input)?)
    }

    pub fn to_ron(&self) -> Result<String, SaveError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn load_from_ron(path: &Path) -> Result<SaveSlot, SaveError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn save_to_ron(&self, path: &Path) -> Result<(), SaveError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
