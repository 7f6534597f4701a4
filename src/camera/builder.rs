use super::demo::DemoCamera;
use super::interface::CameraDriver;
use super::sony::SonyCamera;
use crate::config::CameraConfig;
use crate::error::{CameraError, FotoboxError, Result};
use crate::events::EventBus;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Closed set of camera drivers, keyed by their configuration name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Demo,
    Sony,
}

impl DriverKind {
    pub const ALL: [DriverKind; 2] = [DriverKind::Demo, DriverKind::Sony];

    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Demo => "demo",
            DriverKind::Sony => "sony",
        }
    }

    /// Construct a fresh driver instance
    pub fn create(&self, config: &CameraConfig, error_sink: Arc<EventBus>) -> Arc<dyn CameraDriver> {
        match self {
            DriverKind::Demo => Arc::new(DemoCamera::new(
                config.live_view_buffer,
                config.picture_buffer,
            )),
            DriverKind::Sony => Arc::new(SonyCamera::new(
                config.live_view_buffer,
                config.picture_buffer,
                error_sink,
            )),
        }
    }
}

impl FromStr for DriverKind {
    type Err = CameraError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        DriverKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| CameraError::UnknownDriver {
                driver: name.to_string(),
                available: driver_names(),
            })
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names of all registered drivers, independent of any live instance
pub fn driver_names() -> Vec<&'static str> {
    DriverKind::ALL.iter().map(DriverKind::name).collect()
}

/// Builder resolving a configured driver name into a driver instance
pub struct CameraDriverBuilder {
    config: Option<CameraConfig>,
    error_sink: Option<Arc<EventBus>>,
}

impl CameraDriverBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            error_sink: None,
        }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sink for errors the driver reports outside of a call
    pub fn error_sink(mut self, error_sink: Arc<EventBus>) -> Self {
        self.error_sink = Some(error_sink);
        self
    }

    pub fn build(self) -> Result<Arc<dyn CameraDriver>> {
        let config = self
            .config
            .ok_or_else(|| FotoboxError::system("Camera configuration must be specified"))?;
        let error_sink = self
            .error_sink
            .ok_or_else(|| FotoboxError::system("Camera error sink must be specified"))?;

        let kind: DriverKind = config.driver.parse()?;
        Ok(kind.create(&config, error_sink))
    }
}

impl Default for CameraDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
