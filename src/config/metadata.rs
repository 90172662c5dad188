use metarepo_model::entity_type::DEFAULT_BACKEND;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Schema synchronization settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    /// Backend tag used for entity types declared without one.
    /// TOML: `metadata.default_backend`. Default: `sqlite`.
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Drop and recreate the metadata tables when the Attribute table is
    /// empty on startup.
    /// TOML: `metadata.reset_on_empty_attributes`. Default: `true`.
    #[serde(default = "default_reset_on_empty_attributes")]
    pub reset_on_empty_attributes: bool,

    /// JSON file with additional system declarations (`packages`, `entityTypes`).
    /// TOML: `metadata.declarations`. Default: none.
    #[serde(default)]
    pub declarations: Option<PathBuf>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            reset_on_empty_attributes: default_reset_on_empty_attributes(),
            declarations: None,
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_reset_on_empty_attributes() -> bool {
    true
}
