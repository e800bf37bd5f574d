//! Configuration loaded with figment.
//!
//! Settings come from a TOML file, overridden by environment variables with
//! the `DUALCAM_` prefix. Nested keys are separated by a double underscore:
//!
//! ```text
//! DUALCAM_TIMEOUT_MS=500
//! DUALCAM_GAIN__LEFT=12
//! DUALCAM_V4L2__BUFFER_COUNT=8
//! ```
//!
//! A complete file:
//!
//! ```toml
//! port_left = 1
//! port_right = 3
//! timeout_ms = 1000
//! frame_id = "stereo_camera"
//!
//! [gain]
//! enabled = true
//! left = 8
//! right = 8
//!
//! [exposure]
//! enabled = true
//! left = 12.5
//! right = 12.5
//!
//! [v4l2]
//! buffer_count = 4
//! sensors = [
//!     { port = 1, path = "/dev/video0" },
//!     { port = 3, path = "/dev/video2" },
//! ]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::properties::PropertyRequest;
use crate::traits::{PropertyId, PropertyValue, SensorPort};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/dual_cam.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DUALCAM_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values were read but are inconsistent.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Per-side value of a sensor property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySetting<T> {
    /// Whether to write the property at all.
    #[serde(default)]
    pub enabled: bool,
    /// Value for the left sensor.
    pub left: T,
    /// Value for the right sensor.
    pub right: T,
}

/// V4L2 node backing one sensor port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDevice {
    /// Sensor port number.
    pub port: u32,
    /// Device node, e.g. `/dev/video0`.
    pub path: PathBuf,
}

/// V4L2 backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V4l2Settings {
    /// Number of mmap buffers per stream.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    /// Device node per sensor port.
    #[serde(default)]
    pub sensors: Vec<SensorDevice>,
}

impl Default for V4l2Settings {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            sensors: Vec::new(),
        }
    }
}

/// Top-level camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Port of the left sensor.
    #[serde(default = "default_port_left")]
    pub port_left: u32,
    /// Port of the right sensor.
    #[serde(default = "default_port_right")]
    pub port_right: u32,
    /// Frame lock timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Identifier stamped on every output image.
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    /// Turn on driver call logging.
    #[serde(default)]
    pub enable_logging: bool,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Analog gain.
    #[serde(default)]
    pub gain: PropertySetting<i32>,
    /// Exposure time in milliseconds.
    #[serde(default)]
    pub exposure: PropertySetting<f32>,
    /// Automatic gain control.
    #[serde(default)]
    pub auto_gain: PropertySetting<bool>,
    /// V4L2 backend settings.
    #[serde(default)]
    pub v4l2: V4l2Settings,
}

const fn default_port_left() -> u32 {
    1
}

const fn default_port_right() -> u32 {
    2
}

const fn default_timeout_ms() -> u64 {
    1000
}

fn default_frame_id() -> String {
    "stereo_camera".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_buffer_count() -> u32 {
    4
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            port_left: default_port_left(),
            port_right: default_port_right(),
            timeout_ms: default_timeout_ms(),
            frame_id: default_frame_id(),
            enable_logging: false,
            log_level: default_log_level(),
            gain: PropertySetting::default(),
            exposure: PropertySetting::default(),
            auto_gain: PropertySetting::default(),
            v4l2: V4l2Settings::default(),
        }
    }
}

impl CameraConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialization cannot.
    ///
    /// Checks:
    /// - Both ports are in 1..=4 and differ
    /// - Timeout is positive
    /// - Frame id is not empty
    /// - Log level is valid
    /// - V4L2 buffer count is positive and no port has two nodes
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (side, port) in [("port_left", self.port_left), ("port_right", self.port_right)] {
            if SensorPort::new(port).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {side} {port}. Must be 1-4"
                )));
            }
        }
        if self.port_left == self.port_right {
            return Err(ConfigError::ValidationError(format!(
                "port_left and port_right are both {}",
                self.port_left
            )));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_ms must be greater than 0".to_owned(),
            ));
        }

        if self.frame_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "frame_id must not be empty".to_owned(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.v4l2.buffer_count == 0 {
            return Err(ConfigError::ValidationError(
                "v4l2.buffer_count must be greater than 0".to_owned(),
            ));
        }

        let mut ports = HashSet::new();
        for sensor in &self.v4l2.sensors {
            if SensorPort::new(sensor.port).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid port {} for {}. Must be 1-4",
                    sensor.port,
                    sensor.path.display()
                )));
            }
            if !ports.insert(sensor.port) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate V4L2 node for port {}",
                    sensor.port
                )));
            }
        }

        Ok(())
    }

    /// Frame lock timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Port of the left sensor.
    pub fn left_port(&self) -> Result<SensorPort> {
        SensorPort::new(self.port_left)
    }

    /// Port of the right sensor.
    pub fn right_port(&self) -> Result<SensorPort> {
        SensorPort::new(self.port_right)
    }

    /// Requests for every enabled property, gain first, left before right.
    pub fn property_requests(&self) -> Result<Vec<PropertyRequest>> {
        let left = self.left_port()?;
        let right = self.right_port()?;
        let mut requests = Vec::new();

        let mut push = |enabled: bool, stem: &str, property, values: [PropertyValue; 2]| {
            if !enabled {
                return;
            }
            let [left_value, right_value] = values;
            requests.push(PropertyRequest::new(
                format!("{stem}Left"),
                left,
                property,
                left_value,
            ));
            requests.push(PropertyRequest::new(
                format!("{stem}Right"),
                right,
                property,
                right_value,
            ));
        };

        push(
            self.gain.enabled,
            "gain",
            PropertyId::Gain,
            [self.gain.left.into(), self.gain.right.into()],
        );
        push(
            self.exposure.enabled,
            "exposure",
            PropertyId::ExposureTime,
            [self.exposure.left.into(), self.exposure.right.into()],
        );
        push(
            self.auto_gain.enabled,
            "autoGain",
            PropertyId::AutoGain,
            [self.auto_gain.left.into(), self.auto_gain.right.into()],
        );

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CameraConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.timeout(), Duration::from_millis(1000));
        assert!(config.property_requests().expect("requests").is_empty());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            port_left = 1
            port_right = 3
            timeout_ms = 250
            frame_id = "rig_front"

            [gain]
            enabled = true
            left = 8
            right = 10

            [exposure]
            left = 12.5
            right = 12.5

            [v4l2]
            buffer_count = 6
            sensors = [
                { port = 1, path = "/dev/video0" },
                { port = 3, path = "/dev/video2" },
            ]
            "#,
        );

        let config = CameraConfig::load_from(file.path()).expect("config should load");

        assert_eq!(config.port_right, 3);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.frame_id, "rig_front");
        assert!(config.gain.enabled);
        assert!(!config.exposure.enabled);
        assert_eq!(config.v4l2.buffer_count, 6);
        assert_eq!(config.v4l2.sensors[1].path, PathBuf::from("/dev/video2"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("timeout_ms = 250\n[gain]\nleft = 1\nright = 2\n");
        std::env::set_var("DUALCAM_TIMEOUT_MS", "40");
        std::env::set_var("DUALCAM_GAIN__LEFT", "7");

        let result = CameraConfig::load_from(file.path());
        std::env::remove_var("DUALCAM_TIMEOUT_MS");
        std::env::remove_var("DUALCAM_GAIN__LEFT");

        let config = result.expect("config should load");
        assert_eq!(config.timeout_ms, 40);
        assert_eq!(config.gain.left, 7);
        assert_eq!(config.gain.right, 2);
    }

    #[test]
    #[serial]
    fn test_rejects_same_ports() {
        let file = write_config("port_left = 2\nport_right = 2\n");
        let result = CameraConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_rejects_port_out_of_range() {
        let config = CameraConfig {
            port_right: 5,
            ..CameraConfig::default()
        };
        let err = config.validate().expect_err("port 5 is invalid");
        assert!(err.to_string().contains("port_right"));
    }

    #[test]
    fn test_rejects_zero_timeout_and_bad_level() {
        let zero = CameraConfig {
            timeout_ms: 0,
            ..CameraConfig::default()
        };
        assert!(zero.validate().is_err());

        let level = CameraConfig {
            log_level: "verbose".to_owned(),
            ..CameraConfig::default()
        };
        assert!(level.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_sensor_nodes() {
        let mut config = CameraConfig::default();
        config.v4l2.sensors = vec![
            SensorDevice {
                port: 1,
                path: PathBuf::from("/dev/video0"),
            },
            SensorDevice {
                port: 1,
                path: PathBuf::from("/dev/video1"),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_load_error() {
        let file = write_config("timeout_ms = \"soon\"\n");
        let result = CameraConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_property_requests_order() {
        let config = CameraConfig {
            port_left: 1,
            port_right: 3,
            gain: PropertySetting {
                enabled: true,
                left: 8,
                right: 9,
            },
            exposure: PropertySetting {
                enabled: true,
                left: 2.5,
                right: 3.5,
            },
            auto_gain: PropertySetting {
                enabled: false,
                left: true,
                right: true,
            },
            ..CameraConfig::default()
        };

        let requests = config.property_requests().expect("requests");
        let names: Vec<_> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["gainLeft", "gainRight", "exposureLeft", "exposureRight"]);
        assert_eq!(requests[1].port.number(), 3);
        assert_eq!(requests[1].value, PropertyValue::Int(9));
        assert_eq!(requests[2].value, PropertyValue::Float(2.5));
    }
}
