//! Bridge settings loaded from an optional YAML file.
//!
//! A missing or empty file yields the defaults. The file path comes from the
//! command line or from `DOM_BRIDGE_CONFIG`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ProxyRegistry;

/// Names the config file when no path is given explicitly.
pub const CONFIG_ENV: &str = "DOM_BRIDGE_CONFIG";

const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("WebKitAnimationEvent", "AnimationEvent"),
    ("WebKitTransitionEvent", "TransitionEvent"),
    ("MSPointerEvent", "PointerEvent"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Bridge settings. Every field is optional in the file; a present
/// `aliases` map replaces the defaults rather than extending them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Emit an `info` event whenever a constructor resolves through an
    /// ancestor.
    pub log_fallbacks: bool,
    /// Sweep dead wrapper and callback slots once a table grows past this
    /// many entries. The limit rises with the number of live entries.
    pub prune_threshold: usize,
    /// Vendor constructor name to registered interface name.
    pub aliases: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_fallbacks: true,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(native, interface)| (native.to_string(), interface.to_string()))
                .collect(),
        }
    }
}

impl BridgeConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Loads from the file named by [`CONFIG_ENV`], or defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    /// The built-in DOM registry with this config's aliases applied.
    pub fn build_registry(&self) -> ProxyRegistry {
        let mut registry = ProxyRegistry::dom();
        for (native, interface) in &self.aliases {
            registry.alias(native.clone(), interface.clone());
        }
        registry
    }
}
