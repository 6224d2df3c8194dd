use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level Questline configuration, matching `.questline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub graph: GraphSection,
    #[serde(default)]
    pub progress: ProgressSection,
}

impl QuestConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.position_limit <= 0 {
            return Err(ConfigError::Invalid(format!(
                "graph.position_limit must be positive, got {}",
                self.graph.position_limit
            )));
        }
        if self.progress.max_note_chars == 0 {
            return Err(ConfigError::Invalid(
                "progress.max_note_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".questline/questline.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSection {
    /// Reject link sets containing a directed cycle.
    pub reject_cycles: bool,
    /// Editor coordinates are clamped to `[-limit, limit]`.
    pub position_limit: i32,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            reject_cycles: true,
            position_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSection {
    pub max_note_chars: usize,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self { max_note_chars: 500 }
    }
}
