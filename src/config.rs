use crate::camera::DriverKind;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FotoboxConfig {
    pub camera: CameraConfig,
    pub system: SystemConfig,
}

/// Per-init camera configuration: driver selection plus driver options
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Driver name, one of the registered drivers ("demo", "sony")
    #[serde(default = "default_camera_driver")]
    pub driver: String,

    /// Directory pictures are written to
    #[serde(default = "default_photo_directory")]
    pub photo_directory: String,

    /// Frames queued per live view subscriber before the oldest are dropped
    #[serde(default = "default_live_view_buffer")]
    pub live_view_buffer: usize,

    /// Picture references queued per picture subscriber
    #[serde(default = "default_picture_buffer")]
    pub picture_buffer: usize,

    #[serde(default)]
    pub sony: SonyConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SonyConfig {
    /// SSDP search target advertised by the camera
    #[serde(default = "default_search_target")]
    pub search_target: String,

    /// Address the SSDP M-SEARCH request is sent to
    #[serde(default = "default_ssdp_address")]
    pub ssdp_address: String,

    /// Interval between SSDP searches in milliseconds
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    /// Timeout for a single remote API call, must exceed the device long-poll
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay after entering rec mode before the shoot mode is checked
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause between successful status polls
    #[serde(default = "default_poll_pacing_ms")]
    pub poll_pacing_ms: u64,

    /// Live view size requested from the camera
    #[serde(default = "default_liveview_size")]
    pub liveview_size: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DemoConfig {
    /// Interval between live view image toggles in milliseconds
    #[serde(default = "default_toggle_interval_ms")]
    pub toggle_interval_ms: u64,

    /// Two JPEG files to alternate between; built-in images when empty
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Directory for the log file, console only when unset
    #[serde(default)]
    pub log_directory: Option<String>,

    /// Re-initialize the camera after a fatal session error
    #[serde(default = "default_reinit_on_failure")]
    pub reinit_on_failure: bool,

    /// Delay before a re-initialization attempt in milliseconds
    #[serde(default = "default_reinit_delay_ms")]
    pub reinit_delay_ms: u64,

    /// Re-initialization attempts before giving up
    #[serde(default = "default_max_reinit_attempts")]
    pub max_reinit_attempts: u32,
}

impl FotoboxConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("fotobox.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.driver", default_camera_driver())?
            .set_default("camera.photo_directory", default_photo_directory())?
            .set_default("camera.live_view_buffer", default_live_view_buffer() as i64)?
            .set_default("camera.picture_buffer", default_picture_buffer() as i64)?
            .set_default("camera.sony.search_target", default_search_target())?
            .set_default("camera.sony.ssdp_address", default_ssdp_address())?
            .set_default(
                "camera.sony.discovery_interval_ms",
                default_discovery_interval_ms(),
            )?
            .set_default(
                "camera.sony.request_timeout_secs",
                default_request_timeout_secs(),
            )?
            .set_default("camera.sony.settle_delay_ms", default_settle_delay_ms())?
            .set_default("camera.sony.poll_pacing_ms", default_poll_pacing_ms())?
            .set_default("camera.sony.liveview_size", default_liveview_size())?
            .set_default(
                "camera.demo.toggle_interval_ms",
                default_toggle_interval_ms(),
            )?
            .set_default("camera.demo.images", Vec::<String>::new())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.reinit_on_failure", default_reinit_on_failure())?
            .set_default("system.reinit_delay_ms", default_reinit_delay_ms())?
            .set_default("system.max_reinit_attempts", default_max_reinit_attempts())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // FOTOBOX_CAMERA__DRIVER=sony, FOTOBOX_CAMERA__SONY__POLL_PACING_MS=100
            .add_source(
                Environment::with_prefix("FOTOBOX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FotoboxConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl CameraConfig {
    /// Validate driver selection and driver options
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.driver
            .parse::<DriverKind>()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        if self.live_view_buffer == 0 || self.picture_buffer == 0 {
            return Err(ConfigError::Message(
                "Camera stream buffers must be greater than 0".to_string(),
            ));
        }

        if self.sony.discovery_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Sony discovery_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.sony.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Sony request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.demo.toggle_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Demo toggle_interval_ms must be greater than 0".to_string(),
            ));
        }

        if !self.demo.images.is_empty() && self.demo.images.len() != 2 {
            return Err(ConfigError::Message(format!(
                "Demo driver needs exactly two images, got {}",
                self.demo.images.len()
            )));
        }

        Ok(())
    }

    pub fn photo_directory(&self) -> PathBuf {
        PathBuf::from(&self.photo_directory)
    }
}

impl SonyConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_pacing(&self) -> Duration {
        Duration::from_millis(self.poll_pacing_ms)
    }
}

impl DemoConfig {
    pub fn toggle_interval(&self) -> Duration {
        Duration::from_millis(self.toggle_interval_ms)
    }
}

impl SystemConfig {
    pub fn reinit_delay(&self) -> Duration {
        Duration::from_millis(self.reinit_delay_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driver: default_camera_driver(),
            photo_directory: default_photo_directory(),
            live_view_buffer: default_live_view_buffer(),
            picture_buffer: default_picture_buffer(),
            sony: SonyConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Default for SonyConfig {
    fn default() -> Self {
        Self {
            search_target: default_search_target(),
            ssdp_address: default_ssdp_address(),
            discovery_interval_ms: default_discovery_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_pacing_ms: default_poll_pacing_ms(),
            liveview_size: default_liveview_size(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            toggle_interval_ms: default_toggle_interval_ms(),
            images: Vec::new(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            log_directory: None,
            reinit_on_failure: default_reinit_on_failure(),
            reinit_delay_ms: default_reinit_delay_ms(),
            max_reinit_attempts: default_max_reinit_attempts(),
        }
    }
}

// Default value functions
fn default_camera_driver() -> String {
    "demo".to_string()
}
fn default_photo_directory() -> String {
    "./photos".to_string()
}
fn default_live_view_buffer() -> usize {
    16
}
fn default_picture_buffer() -> usize {
    32
}

fn default_search_target() -> String {
    "urn:schemas-sony-com:service:ScalarWebAPI:1".to_string()
}
fn default_ssdp_address() -> String {
    "239.255.255.250:1900".to_string()
}
fn default_discovery_interval_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    70
} // getEvent long-polls for up to a minute
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_poll_pacing_ms() -> u64 {
    200
}
fn default_liveview_size() -> String {
    "L".to_string()
}

fn default_toggle_interval_ms() -> u64 {
    2000
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_reinit_on_failure() -> bool {
    true
}
fn default_reinit_delay_ms() -> u64 {
    5000
}
fn default_max_reinit_attempts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FotoboxConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.camera.driver, "demo");
        assert_eq!(config.camera.sony.discovery_interval(), Duration::from_secs(1));
        assert_eq!(config.camera.sony.poll_pacing(), Duration::from_millis(200));
        assert_eq!(config.camera.demo.toggle_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
driver = "sony"
photo_directory = "/tmp/fotobox-photos"

[camera.sony]
settle_delay_ms = 250

[system]
event_bus_capacity = 42
"#
        )
        .unwrap();

        let config = FotoboxConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.driver, "sony");
        assert_eq!(config.camera.photo_directory, "/tmp/fotobox-photos");
        assert_eq!(config.camera.sony.settle_delay_ms, 250);
        // untouched keys keep their defaults
        assert_eq!(config.camera.sony.discovery_interval_ms, 1000);
        assert_eq!(config.camera.demo.toggle_interval_ms, 2000);
        assert_eq!(config.system.event_bus_capacity, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FotoboxConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.camera.live_view_buffer, 16);
        assert_eq!(config.system.max_reinit_attempts, 5);
        assert!(config.system.log_directory.is_none());
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("FOTOBOX_CAMERA__SONY__LIVEVIEW_SIZE", "M");

        let dir = tempfile::tempdir().unwrap();
        let config = FotoboxConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.camera.sony.liveview_size, "M");

        env::remove_var("FOTOBOX_CAMERA__SONY__LIVEVIEW_SIZE");
    }

    #[test]
    fn test_config_validation() {
        let mut config = FotoboxConfig::default();

        config.camera.driver = "canon".to_string();
        assert!(config.validate().is_err());

        config.camera.driver = "sony".to_string();
        assert!(config.validate().is_ok());

        config.camera.demo.images = vec!["only-one.jpg".to_string()];
        assert!(config.validate().is_err());

        config.camera.demo.images.push("second.jpg".to_string());
        assert!(config.validate().is_ok());

        config.system.event_bus_capacity = 0;
        assert!(config.validate().is_err());
    }
}
