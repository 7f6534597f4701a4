mod builder;
mod demo;
mod interface;
mod provider;
pub mod sony;
mod status;
#[cfg(test)]
mod tests;

pub use builder::{driver_names, CameraDriverBuilder, DriverKind};
pub use demo::DemoCamera;
pub use interface::{CameraDriver, LiveViewEvent, LiveViewSubscription, PictureSubscription};
pub use provider::{CameraProvider, ProviderExternals};
pub use sony::SonyCamera;
pub use status::{CameraStatus, SessionPhase};
