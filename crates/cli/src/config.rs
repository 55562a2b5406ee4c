//! Configuration loading from rowgate.toml.

use policy::{Manifest, Principal};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Row store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Defaults applied to commands.
    #[serde(default)]
    pub defaults: Defaults,

    /// Tables and policies (`[[table]]`, `[[policy]]`).
    #[serde(flatten)]
    pub manifest: Manifest,
}

/// Row store configuration.
#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database path. Defaults to the user data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Principal used when `--as` is not given.
    #[serde(default = "default_principal")]
    pub principal: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            principal: default_principal(),
        }
    }
}

fn default_principal() -> String {
    Principal::ANON.to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The provisioned deployment, used when no config file exists.
    pub fn default_config() -> Self {
        Self {
            store: StoreConfig::default(),
            defaults: Defaults::default(),
            manifest: Manifest::provisioned(),
        }
    }

    /// Render a starter config file for `rowgate init`.
    pub fn starter() -> Result<String, ConfigError> {
        let manifest = Manifest::provisioned()
            .to_toml()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(format!(
            "# rowgate configuration\n\
             #\n\
             # The anon policies below are permissive placeholders. Tighten them to\n\
             # per-user ownership, e.g. using = \"user_id = auth.uid()\".\n\n\
             [defaults]\n\
             principal = \"{}\"\n\n\
             {manifest}",
            Principal::ANON
        ))
    }

    pub fn default_principal(&self) -> Principal {
        Principal::new(self.defaults.principal.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[store]
path = "/tmp/rows.db"

[defaults]
principal = "service"

[[table]]
name = "authentication"
rls = true

[[policy]]
name = "service_select_authentication"
table = "authentication"
operation = "select"
to = ["service"]
using = "true"
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/rows.db")));
        assert_eq!(config.default_principal(), Principal::new("service"));
        assert_eq!(config.manifest.tables.len(), 1);
        assert_eq!(config.manifest.policies.len(), 1);
    }

    #[test]
    fn test_empty_config_has_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.default_principal(), Principal::anon());
        assert!(config.store.path.is_none());
        assert!(config.manifest.policies.is_empty());
    }

    #[test]
    fn test_starter_config_parses() {
        let config = Config::parse(&Config::starter().unwrap()).unwrap();
        assert_eq!(config.manifest, Manifest::provisioned());
    }
}
