use super::state::{record_state, ComponentStates};
use super::{ComponentState, FotoboxApp};
use crate::camera::{CameraProvider, ProviderExternals};
use crate::config::FotoboxConfig;
use crate::error::{CameraError, FotoboxError, Result};
use crate::events::{EventFilter, FotoboxEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FRAME_STATS_INTERVAL: Duration = Duration::from_secs(10);

impl FotoboxApp {
    /// Register the application components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Fotobox components");

        let mut states = self.component_states.lock().await;
        states.insert("camera".to_string(), ComponentState::Stopped);
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start all components. Camera init runs in the background since
    /// discovering a network camera can take arbitrarily long.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting Fotobox with camera driver '{}'",
            self.config.camera.driver
        );

        self.background_tasks.push(self.spawn_live_view_monitor());
        self.background_tasks.push(self.spawn_reinit_supervisor());

        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let externals = self.externals();
        let states = Arc::clone(&self.component_states);
        self.background_tasks.push(tokio::spawn(async move {
            init_camera(&provider, &config, externals, &states).await;
        }));

        if self.keyboard_enabled {
            if let Some(handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;
                handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard input handler: {}", e);
                    e
                })?;
                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        info!("Fotobox started");
        Ok(())
    }

    /// Re-initialize the camera when it reports a failure, up to the
    /// configured number of attempts
    fn spawn_reinit_supervisor(&self) -> tokio::task::JoinHandle<()> {
        let mut errors = self.event_bus.subscribe_filtered(
            EventFilter::Components(vec!["camera".to_string()]),
            "app.reinit",
        );
        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let externals = self.externals();
        let states = Arc::clone(&self.component_states);
        let attempts = Arc::clone(&self.reinit_attempts);
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = errors.recv() => event,
                };
                let Ok(FotoboxEvent::SystemError { component, error }) = event else {
                    continue;
                };

                record_state(&states, "camera", ComponentState::Failed).await;
                if !config.system.reinit_on_failure {
                    warn!("Camera failure in {}: {}", component, error);
                    continue;
                }

                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > config.system.max_reinit_attempts {
                    error!(
                        "Camera failure in {} after {} re-initializations, giving up: {}",
                        component, config.system.max_reinit_attempts, error
                    );
                    continue;
                }
                warn!(
                    "Camera failure in {}: {}. Re-initializing (attempt {}/{})",
                    component, error, attempt, config.system.max_reinit_attempts
                );

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.system.reinit_delay()) => {}
                }
                init_camera(&provider, &config, externals.clone(), &states).await;
            }
            debug!("Camera supervisor stopped");
        })
    }

    /// Log live view throughput and photo counts
    fn spawn_live_view_monitor(&self) -> tokio::task::JoinHandle<()> {
        let mut frame_rx = self.event_bus.subscribe_live_view("app.monitor.frames");
        let mut photo_rx = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["photo"]),
            "app.monitor.photos",
        );
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            let mut frames = 0u64;
            let mut bytes = 0usize;
            let mut photos = 0u64;
            let mut window = Instant::now();

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = frame_rx.recv() => event,
                    event = photo_rx.recv() => event,
                };

                match event {
                    Ok(FotoboxEvent::LiveViewData { frame }) => {
                        frames += 1;
                        bytes += frame.len();
                    }
                    Ok(FotoboxEvent::Photo { .. }) => photos += 1,
                    Ok(_) => {}
                    Err(_) => break,
                }

                if window.elapsed() >= FRAME_STATS_INTERVAL {
                    debug!(
                        "Live view: {} frames ({} bytes), {} photos in the last {:?}",
                        frames,
                        bytes,
                        photos,
                        window.elapsed()
                    );
                    frames = 0;
                    photos = 0;
                    bytes = 0;
                    window = Instant::now();
                }
            }
        })
    }
}

/// Initialize the camera provider and track the outcome in the component
/// states. Failures are published so the supervisor can retry.
async fn init_camera(
    provider: &CameraProvider,
    config: &FotoboxConfig,
    externals: ProviderExternals,
    states: &ComponentStates,
) {
    record_state(states, "camera", ComponentState::Starting).await;
    let event_bus = Arc::clone(&externals.event_bus);

    match provider.init(&config.camera, externals).await {
        Ok(()) => {
            record_state(states, "camera", ComponentState::Running).await;
            info!("Camera started successfully");
        }
        Err(FotoboxError::Camera(CameraError::InitAborted)) => {
            info!("Camera initialization aborted");
        }
        Err(e) => {
            error!("Failed to start camera: {}", e);
            record_state(states, "camera", ComponentState::Failed).await;
            let _ = event_bus.publish_now(FotoboxEvent::SystemError {
                component: "camera".to_string(),
                error: e.to_string(),
            });
        }
    }
}
