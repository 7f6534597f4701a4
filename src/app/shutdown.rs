use super::{ComponentState, FotoboxApp};
use crate::error::{FotoboxError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const KEYBOARD_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const CAMERA_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl FotoboxApp {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();
        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        let mut exit_code = 0;

        if self.keyboard_enabled {
            if let Err(e) = self.stop_component("keyboard").await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        if let Err(e) = self.stop_component("camera").await {
            error!("Error stopping camera: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component
    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = match component {
            "camera" => stop_within(component, CAMERA_STOP_TIMEOUT, self.provider.deinit()).await,
            "keyboard" => match &self.keyboard_handler {
                Some(handler) => stop_within(component, KEYBOARD_STOP_TIMEOUT, handler.stop()).await,
                None => Ok(()),
            },
            _ => Err(FotoboxError::system(format!("Unknown component: {}", component))),
        };

        let state = if result.is_ok() {
            info!("{} component stopped", component);
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.set_component_state(component, state).await;
        result
    }
}

async fn stop_within<F>(component: &str, limit: Duration, stop: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match timeout(limit, stop).await {
        Ok(result) => result,
        Err(_) => {
            error!("{} component stop timeout", component);
            Err(FotoboxError::component(
                component.to_string(),
                format!("stop timed out after {:?}", limit),
            ))
        }
    }
}
