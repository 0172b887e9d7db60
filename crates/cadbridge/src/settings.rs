//! Settings persistence for the bridge
//!
//! Settings are stored as `cadbridge.toml`. They capture the server address, where the mirror
//! lives in the host scene, and the facet parameters used for refacet requests. Missing
//! sections fall back to defaults.

use crate::handler::{SceneConfig, DEFAULT_BRIDGE_CONTAINER};
use crate::refacet::FacetSettings;
use cadbridge_network::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Filename used for settings
pub const SETTINGS_FILENAME: &str = "cadbridge.toml";

pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:8980";

/// Server connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// `host:port` of the CAD server
    pub address: String,
    /// Largest frame accepted from the server, in bytes
    pub max_message_size: u32,
    pub connect_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_owned(),
            max_message_size: u32::MAX,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Scene placement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// Name of the top-level container holding mirrored files
    pub bridge_container: String,
    /// Uniform scale applied to newly created objects
    pub unit_scale: f32,
    /// Refresh with list-visible instead of list-all
    pub list_only_visible: bool,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            bridge_container: DEFAULT_BRIDGE_CONTAINER.to_owned(),
            unit_scale: 1.0,
            list_only_visible: false,
        }
    }
}

/// Top-level settings struct, serialized as cadbridge.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub scene: SceneSettings,
    #[serde(default)]
    pub facet: FacetSettings,
}

impl Settings {
    /// Load settings from a cadbridge.toml file in the given directory.
    /// Returns Ok(None) if the file doesn't exist.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, SettingsError> {
        Self::load_from_file(&dir.join(SETTINGS_FILENAME))
    }

    /// Load settings from an explicit file path.
    /// Returns Ok(None) if the file doesn't exist.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>, SettingsError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|e| SettingsError::ParseToml {
                path: path.to_path_buf(),
                source: e,
            })?;
        settings.validate()?;
        info!("Loaded settings from {:?}", path);
        Ok(Some(settings))
    }

    /// Save settings to cadbridge.toml in the given directory.
    pub fn save_to_dir(&self, dir: &Path) -> Result<(), SettingsError> {
        self.save_to_file(&dir.join(SETTINGS_FILENAME))
    }

    /// Save settings to a file.
    /// Merges with existing file if present (preserves unknown keys).
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let serialize_error = |e: toml::ser::Error| SettingsError::SerializeToml {
            path: path.to_path_buf(),
            source: e,
        };

        // If a file already exists, load it as a raw TOML table so we can merge
        let merged = if path.exists() {
            let existing_contents =
                std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            let mut existing_table: toml::Table =
                toml::from_str(&existing_contents).unwrap_or_default();

            let our_toml_str = toml::to_string_pretty(self).map_err(serialize_error)?;
            let our_table: toml::Table = toml::from_str(&our_toml_str).unwrap_or_default();

            for (key, value) in our_table {
                // Keep unknown keys inside known sections too
                let merged_value = match (existing_table.remove(&key), value) {
                    (Some(toml::Value::Table(mut existing)), toml::Value::Table(ours)) => {
                        for (inner_key, inner_value) in ours {
                            existing.insert(inner_key, inner_value);
                        }
                        toml::Value::Table(existing)
                    }
                    (_, value) => value,
                };
                existing_table.insert(key, merged_value);
            }

            toml::to_string_pretty(&existing_table).map_err(serialize_error)?
        } else {
            toml::to_string_pretty(self).map_err(serialize_error)?
        };

        std::fs::write(path, merged).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject values the bridge cannot work with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.address.trim().is_empty() {
            return Err(SettingsError::Invalid("server.address is empty".into()));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::Invalid(
                "server.max_message_size must be positive".into(),
            ));
        }
        if !self.scene.unit_scale.is_finite() || self.scene.unit_scale <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "scene.unit_scale must be positive, got {}",
                self.scene.unit_scale
            )));
        }
        if self.scene.bridge_container.is_empty() {
            return Err(SettingsError::Invalid(
                "scene.bridge_container is empty".into(),
            ));
        }
        self.facet.validate().map_err(SettingsError::Invalid)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_message_size: self.server.max_message_size as usize,
            connect_timeout: Some(Duration::from_millis(self.server.connect_timeout_ms)),
            ..Default::default()
        }
    }

    pub fn scene_config(&self) -> SceneConfig {
        SceneConfig {
            bridge_container: self.scene.bridge_container.clone(),
            unit_scale: self.scene.unit_scale,
        }
    }
}

/// Errors that can occur during settings operations
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize TOML for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid settings: {0}")]
    Invalid(String),
}
