use super::builder::{driver_names, CameraDriverBuilder};
use super::interface::CameraDriver;
use super::status::CameraStatus;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::events::{EventBus, EventFilter, FotoboxEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const FORWARDER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Collaborators the provider talks to
#[derive(Clone)]
pub struct ProviderExternals {
    /// Outbound sink for live view data and photos, inbound take-picture
    /// trigger and error sink
    pub event_bus: Arc<EventBus>,
}

struct Forwarders {
    cancel: CancellationToken,
    trigger: Option<JoinHandle<()>>,
    pictures: Option<JoinHandle<()>>,
    live_view: Option<JoinHandle<()>>,
}

impl Forwarders {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            trigger: None,
            pictures: None,
            live_view: None,
        }
    }

    fn take_handles(&mut self) -> Vec<JoinHandle<()>> {
        [self.trigger.take(), self.pictures.take(), self.live_view.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Owns the selected camera driver and wires its streams to the event bus
pub struct CameraProvider {
    driver: Mutex<Option<Arc<dyn CameraDriver>>>,
    externals: Mutex<Option<ProviderExternals>>,
    forwarders: Mutex<Forwarders>,
    generation: AtomicU64,
}

impl CameraProvider {
    pub fn new() -> Self {
        Self {
            driver: Mutex::new(None),
            externals: Mutex::new(None),
            forwarders: Mutex::new(Forwarders::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Names of the registered drivers
    pub fn driver_names() -> Vec<&'static str> {
        driver_names()
    }

    /// Select the configured driver, initialize it and start forwarding its
    /// live view and pictures to the event bus
    pub async fn init(&self, config: &CameraConfig, externals: ProviderExternals) -> Result<()> {
        let initialized = self.driver.lock().is_some();
        if initialized {
            info!("Camera provider already initialized, re-initializing");
            if let Err(e) = self.deinit().await {
                warn!("Previous camera did not shut down cleanly: {}", e);
            }
        }

        let driver = CameraDriverBuilder::new()
            .config(config.clone())
            .error_sink(Arc::clone(&externals.event_bus))
            .build()?;
        info!("Initializing camera driver '{}'", driver.name());

        // stored before init so a concurrent deinit can abort discovery
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.driver.lock() = Some(Arc::clone(&driver));
        *self.externals.lock() = Some(externals.clone());
        let cancel = {
            let mut forwarders = self.forwarders.lock();
            *forwarders = Forwarders::new();
            forwarders.cancel.clone()
        };

        if let Err(e) = driver.init(config).await {
            self.discard_driver(generation, &driver).await;
            return Err(e);
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(CameraError::InitAborted.into());
        }

        self.register_trigger(&driver, &externals, cancel.clone());
        self.start_live_view().await;

        let mut pictures = driver.observe_pictures()?;
        let event_bus = Arc::clone(&externals.event_bus);
        let forwarder_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let reference = tokio::select! {
                    _ = forwarder_cancel.cancelled() => break,
                    reference = pictures.recv() => reference,
                };
                let Some(reference) = reference else { break };

                if let Err(e) = event_bus.publish_now(FotoboxEvent::Photo {
                    reference,
                    timestamp: SystemTime::now(),
                }) {
                    debug!("Photo not forwarded: {}", e);
                }
            }
            debug!("Picture forwarding stopped");
        });
        self.forwarders.lock().pictures = Some(handle);

        self.publish_status(&externals.event_bus, driver.name(), true);
        info!("Camera provider initialized with driver '{}'", driver.name());
        Ok(())
    }

    /// Forward live view frames to the event bus. Started once per init; a
    /// second call while forwarding is a no-op.
    pub async fn start_live_view(&self) {
        let running = self
            .forwarders
            .lock()
            .live_view
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if running {
            warn!("Live view observing started twice. Ignoring the last call");
            return;
        }

        let (Some(driver), Some(externals)) =
            (self.driver.lock().clone(), self.externals.lock().clone())
        else {
            warn!("Can't start live view. No camera initialized");
            return;
        };
        let cancel = self.forwarders.lock().cancel.clone();

        let mut subscription = match driver.observe_live_view().await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to start live view: {}", e);
                return;
            }
        };

        let handle = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.recv() => next,
                };

                match next {
                    Some(Ok(frame)) => {
                        if let Err(e) = externals
                            .event_bus
                            .publish_now(FotoboxEvent::LiveViewData { frame })
                        {
                            trace!("Live view frame not forwarded: {}", e);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Live view stream failed: {}", e);
                        break;
                    }
                    None => {
                        info!("Live view stream ended");
                        break;
                    }
                }
            }
        });
        self.forwarders.lock().live_view = Some(handle);
    }

    /// Stop forwarding, release the trigger and deinitialize the driver.
    /// Teardown always runs to completion; a driver error is returned after.
    pub async fn deinit(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let handles = {
            let mut forwarders = self.forwarders.lock();
            forwarders.cancel.cancel();
            forwarders.take_handles()
        };
        for mut handle in handles {
            if timeout(FORWARDER_STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("Camera forwarder did not stop in time, aborting it");
                handle.abort();
            }
        }

        let driver = self.driver.lock().take();
        let externals = self.externals.lock().take();

        let Some(driver) = driver else {
            return Ok(());
        };

        let result = driver.deinit().await;
        if let Err(e) = &result {
            error!("Camera driver '{}' failed to deinitialize: {}", driver.name(), e);
        }

        if let Some(externals) = externals {
            self.publish_status(&externals.event_bus, driver.name(), false);
        }
        info!("Camera provider deinitialized");
        result
    }

    /// External take-picture trigger
    pub fn take_picture(&self) {
        match self.driver.lock().clone() {
            Some(driver) => driver.take_picture(),
            None => warn!("Can't take a picture. No camera initialized"),
        }
    }

    pub fn status(&self) -> CameraStatus {
        match self.driver.lock().as_ref() {
            Some(driver) => {
                let phase = driver.phase();
                CameraStatus {
                    driver: driver.name().to_string(),
                    phase,
                    available: phase.is_connected(),
                }
            }
            None => CameraStatus::not_initialized(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.driver.lock().is_some()
    }

    fn register_trigger(
        &self,
        driver: &Arc<dyn CameraDriver>,
        externals: &ProviderExternals,
        cancel: CancellationToken,
    ) {
        let mut requests = externals.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["take_picture_requested"]),
            "camera.trigger",
        );
        let driver = Arc::clone(driver);

        let handle = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = requests.recv() => request,
                };

                match request {
                    Ok(FotoboxEvent::TakePictureRequested { source, .. }) => {
                        info!("Take picture requested by {}", source);
                        driver.take_picture();
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            debug!("Take picture trigger unregistered");
        });
        self.forwarders.lock().trigger = Some(handle);
    }

    /// Undo a failed init unless a newer init or deinit took over
    async fn discard_driver(&self, generation: u64, driver: &Arc<dyn CameraDriver>) {
        let owned = self.generation.load(Ordering::SeqCst) == generation;
        if owned {
            self.driver.lock().take();
            self.externals.lock().take();
        }
        if let Err(e) = driver.deinit().await {
            debug!("Cleanup after failed init: {}", e);
        }
    }

    fn publish_status(&self, event_bus: &EventBus, driver: &str, connected: bool) {
        let event = FotoboxEvent::CameraStatusChanged {
            driver: driver.to_string(),
            connected,
            timestamp: SystemTime::now(),
        };
        if let Err(e) = event_bus.publish_now(event) {
            debug!("Camera status not published: {}", e);
        }
    }
}

impl Default for CameraProvider {
    fn default() -> Self {
        Self::new()
    }
}
