//! Settings file handling.
//!
//! The controller fleet is described in a JSON file loaded once at
//! startup. Loading validates eagerly: duplicate names and invalid
//! register maps abort startup instead of surfacing as runtime faults.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fornax_core::{ControllerId, ControllerKind, CoreError};

use crate::connection::{ControllerEndpoint, DEFAULT_PORT};
use crate::engine::ControllerConfig;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_unit() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

/// One controller entry in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    pub name: String,
    pub kind: ControllerKind,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit")]
    pub unit: u8,
    /// Index into the controller's register block table; furnace tubes
    /// share one map at stride offsets.
    #[serde(default)]
    pub device_index: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub controllers: Vec<ControllerSettings>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate controller name {0:?}")]
    Duplicate(String),

    #[error("controller {name:?} has an invalid register map: {source}")]
    Map {
        name: String,
        #[source]
        source: CoreError,
    },

    #[error(
        "controller {name:?}: device_index {device_index} exceeds the addressable maximum {max}"
    )]
    DeviceIndex {
        name: String,
        device_index: u16,
        max: u16,
    },
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let mut names = HashSet::new();
        for controller in &self.controllers {
            if !names.insert(controller.name.as_str()) {
                return Err(SettingsError::Duplicate(controller.name.clone()));
            }
            let map = controller
                .kind
                .register_map()
                .map_err(|source| SettingsError::Map {
                    name: controller.name.clone(),
                    source,
                })?;
            // An index past the map's range would wrap around the 16-bit
            // address space mid-poll; reject it here instead.
            let max = map.max_device_index();
            if controller.device_index > max {
                return Err(SettingsError::DeviceIndex {
                    name: controller.name.clone(),
                    device_index: controller.device_index,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Materialize the engine configs, assigning controller ids by file
    /// order.
    pub fn controller_configs(&self) -> Vec<ControllerConfig> {
        self.controllers
            .iter()
            .enumerate()
            .map(|(index, controller)| ControllerConfig {
                id: ControllerId(index as u8),
                name: controller.name.clone(),
                kind: controller.kind,
                device_index: controller.device_index,
                endpoint: ControllerEndpoint {
                    host: controller.host.clone(),
                    port: controller.port,
                    unit: controller.unit,
                    connect_timeout: Duration::from_millis(controller.connect_timeout_ms),
                    receive_timeout: Duration::from_millis(controller.receive_timeout_ms),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_line() {
        let file = write_settings(
            r#"{
                "controllers": [
                    { "name": "motion", "kind": "motion", "host": "192.168.0.10" },
                    { "name": "furnace-a", "kind": "furnace", "host": "192.168.0.11", "device_index": 0 },
                    { "name": "furnace-b", "kind": "furnace", "host": "192.168.0.11", "device_index": 1, "port": 1502 }
                ]
            }"#,
        );

        let settings = Settings::load(file.path()).unwrap();
        let configs = settings.controller_configs();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].id, ControllerId(0));
        assert_eq!(configs[0].kind, ControllerKind::Motion);
        assert_eq!(configs[0].endpoint.port, 502);
        assert_eq!(
            configs[0].endpoint.connect_timeout,
            Duration::from_millis(2000)
        );
        assert_eq!(configs[2].endpoint.port, 1502);
        assert_eq!(configs[2].device_index, 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let file = write_settings(
            r#"{
                "controllers": [
                    { "name": "furnace", "kind": "furnace", "host": "10.0.0.1" },
                    { "name": "furnace", "kind": "furnace", "host": "10.0.0.2" }
                ]
            }"#,
        );

        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::Duplicate(_))
        ));
    }

    #[test]
    fn test_device_index_past_address_space_rejected() {
        let file = write_settings(
            r#"{
                "controllers": [
                    { "name": "furnace", "kind": "furnace", "host": "10.0.0.1", "device_index": 700 }
                ]
            }"#,
        );

        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::DeviceIndex {
                device_index: 700,
                max: 654,
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let file = write_settings("{ \"controllers\": [");
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            Settings::load("/nonexistent/fornax.json"),
            Err(SettingsError::Io(_))
        ));
    }
}
