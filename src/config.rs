//! Camera system configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML or YAML file (chosen by extension)
//! 2. environment variables prefixed with `FLICAMERA_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! FLICAMERA_POLL_INTERVAL_MS=250
//! FLICAMERA_INTERFACE=serial
//! FLICAMERA_CAMERAS__GFA1__SERIAL=ML0042
//! ```
//!
//! # Example
//!
//! ```no_run
//! use flicamera::config::SystemConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SystemConfig::load_from("flicamera.yaml")?;
//!     println!("Poll interval: {:?}", config.poll_interval());
//!     println!("Cameras: {}", config.cameras.len());
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hardware::{Domain, Interface};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or parsed.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// Values were read but are inconsistent.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// What happens to registry entries when cameras are disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Keep the camera registered so a later add returns the same instance.
    #[default]
    Retain,
    /// Drop the registry entry on disconnect.
    Remove,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Interface searched during enumeration
    #[serde(default)]
    pub interface: Interface,
    /// Upper bound on the wait between exposure status queries
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lower bound on the wait between exposure status queries
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    /// Run hardware calls on the blocking thread pool
    #[serde(default = "default_offload_blocking")]
    pub offload_blocking: bool,
    /// Registry policy on disconnect
    #[serde(default)]
    pub teardown: TeardownPolicy,
    /// Refuse cameras whose serial is not listed under `cameras`
    #[serde(default)]
    pub require_configured: bool,
    /// Known cameras by logical name
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraDefinition>,
}

/// Expected identity of a known camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDefinition {
    /// Vendor serial number (e.g., "ML0000")
    pub serial: String,
    /// Expected model string, checked when the camera is added
    #[serde(default)]
    pub model: Option<String>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_min_poll_interval_ms() -> u64 {
    10
}

fn default_offload_blocking() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            interface: Interface::default(),
            poll_interval_ms: default_poll_interval_ms(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            offload_blocking: default_offload_blocking(),
            teardown: TeardownPolicy::default(),
            require_configured: false,
            cameras: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SystemConfig {
    /// Load configuration from a specific file path
    ///
    /// `.yaml`/`.yml` files are read as YAML, everything else as TOML.
    /// Environment variables (`FLICAMERA_` prefix) take precedence over the
    /// file. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let figment = Figment::from(Serialized::defaults(SystemConfig::default()));
        let figment = if is_yaml {
            figment.merge(Yaml::file(path))
        } else {
            figment.merge(Toml::file(path))
        };

        Self::extract(figment.merge(Env::prefixed("FLICAMERA_").split("__")))
    }

    /// Parse TOML text, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(SystemConfig::default())).merge(Toml::string(toml)),
        )
    }

    /// Parse YAML text, without environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(SystemConfig::default())).merge(Yaml::string(yaml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Poll interval is non-zero and not below the minimum interval
    /// - Camera serials are non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.min_poll_interval_ms > self.poll_interval_ms {
            return Err(ConfigError::Validation(format!(
                "min_poll_interval_ms ({}) exceeds poll_interval_ms ({})",
                self.min_poll_interval_ms, self.poll_interval_ms
            )));
        }

        let mut serials = HashSet::new();
        for (name, camera) in &self.cameras {
            if camera.serial.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Camera '{}': 'serial' cannot be empty",
                    name
                )));
            }
            if !serials.insert(camera.serial.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate camera serial '{}' (camera '{}')",
                    camera.serial, name
                )));
            }
        }

        Ok(())
    }

    /// Enumeration domain for the configured interface.
    pub fn domain(&self) -> Domain {
        Domain::camera(self.interface)
    }

    /// Upper bound on the polling wait.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lower bound on the polling wait.
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    /// Map a logical name or serial to a serial.
    ///
    /// Logical names win; anything else is taken to be a serial.
    pub fn resolve_serial<'a>(&'a self, id: &'a str) -> &'a str {
        self.cameras
            .get(id)
            .map(|camera| camera.serial.as_str())
            .unwrap_or(id)
    }

    /// Configured expectations for `serial`, with the logical name.
    pub fn definition_for_serial(&self, serial: &str) -> Option<(&str, &CameraDefinition)> {
        self.cameras
            .iter()
            .find(|(_, camera)| camera.serial == serial)
            .map(|(name, camera)| (name.as_str(), camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
poll_interval_ms: 100
cameras:
  gfa1:
    serial: ML0000
    model: MicroLine ML50100
  gfa2:
    serial: ML0001
"#;

    #[test]
    fn test_defaults() {
        let config = SystemConfig::from_toml_str("").unwrap();
        assert_eq!(config.interface, Interface::Usb);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.min_poll_interval(), Duration::from_millis(10));
        assert!(config.offload_blocking);
        assert_eq!(config.teardown, TeardownPolicy::Retain);
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn test_yaml_cameras() {
        let config = SystemConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.resolve_serial("gfa1"), "ML0000");
        assert_eq!(config.resolve_serial("ML0001"), "ML0001");

        let (name, def) = config.definition_for_serial("ML0000").unwrap();
        assert_eq!(name, "gfa1");
        assert_eq!(def.model.as_deref(), Some("MicroLine ML50100"));
        assert!(config.definition_for_serial("ML0001").unwrap().1.model.is_none());
    }

    #[test]
    fn test_toml_interface_and_teardown() {
        let config = SystemConfig::from_toml_str(
            r#"
interface = "serial"
teardown = "remove"
offload_blocking = false
"#,
        )
        .unwrap();
        assert_eq!(config.interface, Interface::Serial);
        assert_eq!(config.teardown, TeardownPolicy::Remove);
        assert!(!config.offload_blocking);
        assert_eq!(config.domain(), Domain(0x103));
    }

    #[test]
    fn test_duplicate_serial_rejected() {
        let err = SystemConfig::from_yaml_str(
            r#"
cameras:
  a: { serial: ML0000 }
  b: { serial: ML0000 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = SystemConfig::from_toml_str("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_min_interval_above_interval_rejected() {
        let err = SystemConfig::from_toml_str(
            "poll_interval_ms = 50\nmin_poll_interval_ms = 100",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = SystemConfig::load_from(file.path()).unwrap();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras["gfa2"].serial, "ML0001");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        // Figment treats a missing file as an empty source.
        let config = SystemConfig::load_from("does/not/exist.toml").unwrap();
        assert!(config.cameras.is_empty());
    }
}
