use crate::fleet::{CameraId, CameraSettings, FleetDefaults};
use crate::frame::{ColorPalette, FrameFormat, ShutterMode};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FleetConfig {
    /// Palette for cameras without a `color_palette` override
    #[serde(default = "default_color_palette")]
    pub default_color_palette: ColorPalette,

    /// Shutter mode for cameras without a `shutter_mode` override
    #[serde(default = "default_shutter_mode")]
    pub default_shutter_mode: ShutterMode,

    /// Frame format for cameras without a `format` override
    #[serde(default = "default_frame_format")]
    pub default_frame_format: FrameFormat,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Configured cameras
    #[serde(default)]
    pub camera_array: Vec<CameraEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraEntry {
    /// Vendor chip id of the sensor
    pub cid: CameraId,

    /// v4l2loopback device receiving the frames
    pub device_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FrameFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_palette: Option<ColorPalette>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_mode: Option<ShutterMode>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchdogConfig {
    /// Interval after which a silent sensor counts one timeout
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Consecutive timeouts before the session is restarted
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
}

impl WatchdogConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: default_frame_timeout_ms(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
        }
    }
}

impl CameraEntry {
    /// Apply `defaults` where this entry has no override
    pub fn resolve(&self, defaults: &FleetDefaults) -> CameraSettings {
        CameraSettings {
            device_path: self.device_path.clone(),
            format: self.format.unwrap_or(defaults.frame_format),
            color_palette: self.color_palette.unwrap_or(defaults.color_palette),
            shutter_mode: self.shutter_mode.unwrap_or(defaults.shutter_mode),
        }
    }
}

impl FleetConfig {
    /// Load configuration from a JSON or TOML file, with `THERMCAM_` environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let settings = Config::builder()
            .set_default(
                "default_color_palette",
                enum_name(&default_color_palette())?,
            )?
            .set_default("default_shutter_mode", enum_name(&default_shutter_mode())?)?
            .set_default("default_frame_format", enum_name(&default_frame_format())?)?
            .set_default(
                "watchdog.frame_timeout_ms",
                default_frame_timeout_ms() as i64,
            )?
            .set_default(
                "watchdog.max_consecutive_timeouts",
                default_max_consecutive_timeouts() as i64,
            )?
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("THERMCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: FleetConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded with {} camera(s)",
            config.camera_array.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog.frame_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Watchdog frame_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.watchdog.max_consecutive_timeouts == 0 {
            return Err(ConfigError::Message(
                "Watchdog max_consecutive_timeouts must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.camera_array {
            if entry.cid.as_str().is_empty() {
                return Err(ConfigError::Message(
                    "Camera cid must not be empty".to_string(),
                ));
            }
            if entry.device_path.as_os_str().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Camera {} has an empty device_path",
                    entry.cid
                )));
            }
            if !seen.insert(&entry.cid) {
                return Err(ConfigError::Message(format!(
                    "Camera {} is configured more than once",
                    entry.cid
                )));
            }
        }

        Ok(())
    }

    pub fn defaults(&self) -> FleetDefaults {
        FleetDefaults {
            color_palette: self.default_color_palette,
            shutter_mode: self.default_shutter_mode,
            frame_format: self.default_frame_format,
        }
    }

    /// Sample configuration printed by `--print-config`
    pub fn example() -> Self {
        Self {
            camera_array: vec![
                CameraEntry {
                    cid: CameraId::from("E452AFB41114"),
                    device_path: PathBuf::from("/dev/video10"),
                    format: None,
                    color_palette: None,
                    shutter_mode: None,
                },
                CameraEntry {
                    cid: CameraId::from("F1C3E0A29B07"),
                    device_path: PathBuf::from("/dev/video11"),
                    format: Some(FrameFormat::ColorYuy2),
                    color_palette: Some(ColorPalette::Iron),
                    shutter_mode: Some(ShutterMode::Manual),
                },
            ],
            ..Self::default()
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            default_color_palette: default_color_palette(),
            default_shutter_mode: default_shutter_mode(),
            default_frame_format: default_frame_format(),
            watchdog: WatchdogConfig::default(),
            camera_array: Vec::new(),
        }
    }
}

fn enum_name<T: Serialize>(value: &T) -> Result<String, ConfigError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        _ => Err(ConfigError::Message(
            "default value is not a named variant".to_string(),
        )),
    }
}

// Default value functions
fn default_color_palette() -> ColorPalette {
    ColorPalette::Spectra
}
fn default_shutter_mode() -> ShutterMode {
    ShutterMode::Auto
}
fn default_frame_format() -> FrameFormat {
    FrameFormat::ColorYuy2
}
fn default_frame_timeout_ms() -> u64 {
    1000
}
fn default_max_consecutive_timeouts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(extension: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_color_palette, ColorPalette::Spectra);
        assert_eq!(config.default_shutter_mode, ShutterMode::Auto);
        assert!(config.camera_array.is_empty());
    }

    #[test]
    fn test_load_json_with_overrides() {
        let json = serde_json::json!({
            "default_color_palette": "white_hot",
            "default_shutter_mode": "manual",
            "default_frame_format": "color_yuy2",
            "camera_array": [
                { "cid": "E452AFB41114", "device_path": "/dev/video10" },
                {
                    "cid": "F1C3E0A29B07",
                    "device_path": "/dev/video11",
                    "format": "grayscale",
                    "color_palette": "iron",
                    "shutter_mode": "auto"
                }
            ]
        });
        let file = write_config(".json", &json.to_string());

        let config = FleetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera_array.len(), 2);
        assert_eq!(config.watchdog, WatchdogConfig::default());

        let defaults = config.defaults();
        let plain = config.camera_array[0].resolve(&defaults);
        assert_eq!(plain.color_palette, ColorPalette::WhiteHot);
        assert_eq!(plain.shutter_mode, ShutterMode::Manual);
        assert_eq!(plain.format, FrameFormat::ColorYuy2);

        let custom = config.camera_array[1].resolve(&defaults);
        assert_eq!(custom.device_path, PathBuf::from("/dev/video11"));
        assert_eq!(custom.color_palette, ColorPalette::Iron);
        assert_eq!(custom.shutter_mode, ShutterMode::Auto);
        assert_eq!(custom.format, FrameFormat::Grayscale);
    }

    #[test]
    fn test_load_json_with_vendor_codes() {
        let json = serde_json::json!({
            "default_color_palette": 2,
            "default_shutter_mode": 0,
            "default_frame_format": 1024,
            "camera_array": [
                { "cid": "E452AFB41114", "device_path": "/dev/video10", "format": 1024 },
                {
                    "cid": "F1C3E0A29B07",
                    "device_path": "/dev/video11",
                    "format": 64,
                    "color_palette": 5,
                    "shutter_mode": 1
                }
            ]
        });
        let file = write_config(".json", &json.to_string());

        let config = FleetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.default_color_palette, ColorPalette::Spectra);
        assert_eq!(config.default_shutter_mode, ShutterMode::Auto);
        assert_eq!(config.default_frame_format, FrameFormat::ColorYuy2);

        let defaults = config.defaults();
        let plain = config.camera_array[0].resolve(&defaults);
        assert_eq!(plain.format, FrameFormat::ColorYuy2);
        assert_eq!(plain.color_palette, ColorPalette::Spectra);

        let custom = config.camera_array[1].resolve(&defaults);
        assert_eq!(custom.format, FrameFormat::Grayscale);
        assert_eq!(custom.color_palette, ColorPalette::Iron);
        assert_eq!(custom.shutter_mode, ShutterMode::Manual);
    }

    #[test]
    fn test_unknown_vendor_code_is_an_error() {
        let json = serde_json::json!({
            "default_color_palette": 99,
            "camera_array": []
        });
        let file = write_config(".json", &json.to_string());
        assert!(FleetConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_defaults_fall_back_to_spectra_auto() {
        let json = serde_json::json!({
            "camera_array": [{ "cid": "E452AFB41114", "device_path": "/dev/video10" }]
        });
        let file = write_config(".json", &json.to_string());

        let config = FleetConfig::load_from_file(file.path()).unwrap();
        let settings = config.camera_array[0].resolve(&config.defaults());
        assert_eq!(settings.color_palette, ColorPalette::Spectra);
        assert_eq!(settings.shutter_mode, ShutterMode::Auto);
        assert_eq!(settings.format, FrameFormat::ColorYuy2);
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
default_color_palette = "amber"

[watchdog]
frame_timeout_ms = 250

[[camera_array]]
cid = "E452AFB41114"
device_path = "/dev/video10"
shutter_mode = "manual"
"#,
        );

        let config = FleetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.default_color_palette, ColorPalette::Amber);
        assert_eq!(config.watchdog.frame_timeout(), Duration::from_millis(250));
        assert_eq!(config.watchdog.max_consecutive_timeouts, 5);
        assert_eq!(config.camera_array[0].shutter_mode, Some(ShutterMode::Manual));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = FleetConfig::load_from_file("/nonexistent/thermcam.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_config(".json", "{ \"camera_array\": [ { \"cid\": ");
        assert!(FleetConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = FleetConfig::example();
        assert!(config.validate().is_ok());

        // Duplicate identity
        config.camera_array[1].cid = config.camera_array[0].cid.clone();
        assert!(config.validate().is_err());

        config = FleetConfig::example();
        config.camera_array[0].device_path = PathBuf::new();
        assert!(config.validate().is_err());

        config = FleetConfig::example();
        config.watchdog.max_consecutive_timeouts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips_through_toml() {
        let example = FleetConfig::example();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: FleetConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, example);
    }
}
