//! Registry configuration.

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Tunables for one [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How many times waiters may be carried across `Join::Replace`
    /// hand-offs before the next replacement rejects them instead.
    pub max_replace_chain: u32,
    /// Poll period of [`Registry::wait`](crate::Registry::wait) in milliseconds.
    pub wait_poll_interval_ms: u64,
    /// Delay before an animation-frame callback runs, in milliseconds.
    pub frame_interval_ms: u64,
    /// Delay before an idle callback runs, in milliseconds.
    pub idle_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_replace_chain: 25,
            wait_poll_interval_ms: 15,
            frame_interval_ms: 16,
            idle_delay_ms: 50,
        }
    }
}

impl RegistryConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] when a period or the replace chain
    /// bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_replace_chain == 0 {
            return Err(RegistryError::Config(
                "max_replace_chain must be greater than 0".into(),
            ));
        }
        if self.wait_poll_interval_ms == 0 {
            return Err(RegistryError::Config(
                "wait_poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.frame_interval_ms == 0 {
            return Err(RegistryError::Config(
                "frame_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if the document does not parse or
    /// fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RegistryError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if the file cannot be read, parsed
    /// or validated.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}
