use super::state::ComponentStates;
use super::types::ShutdownReason;
use crate::camera::{CameraProvider, ProviderExternals};
use crate::config::FotoboxConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main application coordinator: owns the event bus, the camera provider and
/// the optional keyboard trigger
pub struct FotoboxApp {
    pub(super) config: FotoboxConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) provider: Arc<CameraProvider>,

    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,

    // Lifecycle management
    pub(super) component_states: ComponentStates,
    pub(super) reinit_attempts: Arc<AtomicU32>,
    pub(super) background_tasks: Vec<JoinHandle<()>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FotoboxApp {
    /// Create a new application with the given configuration
    pub fn new(config: FotoboxConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let keyboard_handler = Some(KeyboardInputHandler::new(Arc::clone(&event_bus)));

        Ok(Self {
            config,
            event_bus,
            provider: Arc::new(CameraProvider::new()),
            keyboard_handler,
            keyboard_enabled: false,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            reinit_attempts: Arc::new(AtomicU32::new(0)),
            background_tasks: Vec::new(),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable the keyboard trigger
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn provider(&self) -> Arc<CameraProvider> {
        Arc::clone(&self.provider)
    }

    pub fn config(&self) -> &FotoboxConfig {
        &self.config
    }

    /// Camera re-initializations attempted after failures
    pub fn reinit_attempts(&self) -> u32 {
        self.reinit_attempts.load(Ordering::SeqCst)
    }

    pub(super) fn externals(&self) -> ProviderExternals {
        ProviderExternals {
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}
