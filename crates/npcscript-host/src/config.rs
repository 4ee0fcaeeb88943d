use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Strip debug info (line numbers, local names) from dumped bytecode
    #[serde(default = "default_strip_debug_info")]
    pub strip_debug_info: bool,

    /// Allocation cap in bytes for every Lua state (unlimited when unset)
    #[serde(default)]
    pub memory_limit: Option<usize>,
}

fn default_strip_debug_info() -> bool {
    true
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            strip_debug_info: true,
            memory_limit: None,
        }
    }
}

impl ScriptingConfig {
    /// Load the config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(target: "scripting", "Loaded scripting config from {}", path.display());
        Ok(config)
    }

    /// Parse the config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the configured limits to a freshly created Lua state
    pub(crate) fn apply(&self, lua: &mlua::Lua) -> mlua::Result<()> {
        if let Some(limit) = self.memory_limit {
            lua.set_memory_limit(limit)?;
        }
        Ok(())
    }
}
