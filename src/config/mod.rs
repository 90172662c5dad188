mod basic;
mod metadata;

pub use basic::BasicConfig;
pub use metadata::MetadataConfig;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Database and logging settings (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Schema synchronization settings (see `metadata` table in config.toml).
    #[serde(default)]
    pub metadata: MetadataConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(cfg.basic.database_url, "sqlite://metarepo.db");
        assert_eq!(cfg.basic.loglevel, "info");
        assert_eq!(cfg.metadata.default_backend, "sqlite");
        assert!(cfg.metadata.reset_on_empty_attributes);
        assert!(cfg.metadata.declarations.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = r#"
            [basic]
            loglevel = "debug"

            [metadata]
            reset_on_empty_attributes = false
            declarations = "system.json"
        "#;
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(cfg.basic.loglevel, "debug");
        assert_eq!(cfg.basic.database_url, "sqlite://metarepo.db");
        assert!(!cfg.metadata.reset_on_empty_attributes);
        assert_eq!(
            cfg.metadata.declarations.as_deref(),
            Some(std::path::Path::new("system.json"))
        );
    }
}
