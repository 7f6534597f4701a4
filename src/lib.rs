pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;

pub use app::{ComponentState, FotoboxApp, ShutdownReason};
pub use camera::{
    CameraDriver, CameraProvider, CameraStatus, DriverKind, LiveViewSubscription,
    PictureSubscription, ProviderExternals, SessionPhase,
};
pub use config::{CameraConfig, FotoboxConfig};
pub use error::{CameraError, FotoboxError, Result, RpcError};
pub use events::{EventBus, EventFilter, EventReceiver, FotoboxEvent};
pub use frame::LiveFrame;
pub use keyboard_input::KeyboardInputHandler;
