use serde::Serialize;

/// Lifecycle phase of a driver's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Discovering,
    Connecting,
    Active,
    Polling,
}

impl SessionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Polling)
    }
}

/// Camera status as reported to configuration and UI callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub driver: String,
    pub phase: SessionPhase,
    pub available: bool,
}

impl CameraStatus {
    pub fn not_initialized() -> Self {
        Self {
            driver: "none".to_string(),
            phase: SessionPhase::Idle,
            available: false,
        }
    }
}
