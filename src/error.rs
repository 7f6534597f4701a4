use thiserror::Error;

#[derive(Error, Debug)]
pub enum FotoboxError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FotoboxError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

impl From<RpcError> for FotoboxError {
    fn from(error: RpcError) -> Self {
        Self::Camera(CameraError::Rpc(error))
    }
}

/// Errors raised by camera drivers and the provider
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Driver '{driver}' not available. Available are: {available:?}")]
    UnknownDriver {
        driver: String,
        available: Vec<&'static str>,
    },

    #[error("Camera discovery failed: {details}")]
    DiscoveryFailed { details: String },

    #[error("Camera initialization aborted")]
    InitAborted,

    #[error("No camera connected")]
    NotConnected,

    #[error("Camera status polling failed: {details}")]
    PollingFailure { details: String },

    #[error("Live view error: {details}")]
    LiveView { details: String },

    #[error("Remote API error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Camera IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single remote procedure call against the camera
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("service '{service}' not found. Available are: {available:?}")]
    ServiceNotFound {
        service: String,
        available: Vec<String>,
    },

    #[error("request to '{url}' failed (method: {method}, params: {params}): {source}")]
    Transport {
        url: String,
        method: String,
        params: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Timed out waiting for '{url}' (method: {method})")]
    Timeout { url: String, method: String },

    #[error("Error occured while requesting '{url}' - method: {method} - params: {params}: {payload}")]
    Protocol {
        url: String,
        method: String,
        params: String,
        payload: String,
    },

    #[error("malformed response from '{url}' (method: {method}): {details}")]
    MalformedResponse {
        url: String,
        method: String,
        details: String,
    },
}

impl RpcError {
    /// Long-poll timeouts are expected and retried by the caller
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FotoboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_driver_lists_available() {
        let error = CameraError::UnknownDriver {
            driver: "canon".to_string(),
            available: vec!["demo", "sony"],
        };
        let message = error.to_string();
        assert!(message.contains("canon"));
        assert!(message.contains("demo"));
        assert!(message.contains("sony"));
    }

    #[test]
    fn test_rpc_error_converts_into_camera_error() {
        let error: FotoboxError = RpcError::Timeout {
            url: "http://camera/sony/camera".to_string(),
            method: "getEvent".to_string(),
        }
        .into();

        match error {
            FotoboxError::Camera(CameraError::Rpc(rpc)) => assert!(rpc.is_timeout()),
            other => panic!("unexpected error: {}", other),
        }
    }
}
