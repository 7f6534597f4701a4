//! Driver for Sony cameras controlled through the Camera Remote API
//!
//! The camera is found with an SSDP search, its description document yields
//! the service endpoints and a [`DeviceSession`] runs the JSON-RPC control
//! session on top of them.

mod description;
mod discovery;
mod liveview;
mod rpc;
mod session;
mod status;


pub use description::DeviceDescription;
pub use discovery::{parse_search_response, DiscoveryState, SsdpSearch};
pub use liveview::LiveViewDecoder;
pub use rpc::{next_request_id, CameraProxy, ServiceDescriptor, ServiceDirectory, DEFAULT_VERSION};
pub use session::{active_session_count, DeviceSession, LiveViewStream, SessionSettings};
pub use status::{flatten_status, picture_urls, DeviceStatus};

use super::interface::{CameraDriver, LiveViewEvent, LiveViewSubscription, PictureSubscription};
use super::status::SessionPhase;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::events::EventBus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LIVE_VIEW_STOP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SonyCamera {
    error_sink: Arc<EventBus>,
    picture_tx: broadcast::Sender<String>,
    live_view_tx: broadcast::Sender<LiveViewEvent>,
    session: Mutex<Option<Arc<DeviceSession>>>,
    device: Mutex<Option<DeviceDescription>>,
    discovery: Mutex<Option<SsdpSearch>>,
    abort: Mutex<CancellationToken>,
    phase: Mutex<SessionPhase>,
    live_view: tokio::sync::Mutex<Option<LiveViewStream>>,
}

impl SonyCamera {
    pub fn new(live_view_buffer: usize, picture_buffer: usize, error_sink: Arc<EventBus>) -> Self {
        let (live_view_tx, _) = broadcast::channel(live_view_buffer.max(1));
        let (picture_tx, _) = broadcast::channel(picture_buffer.max(1));

        Self {
            error_sink,
            picture_tx,
            live_view_tx,
            session: Mutex::new(None),
            device: Mutex::new(None),
            discovery: Mutex::new(None),
            abort: Mutex::new(CancellationToken::new()),
            phase: Mutex::new(SessionPhase::Idle),
            live_view: tokio::sync::Mutex::new(None),
        }
    }

    /// Description of the connected camera
    pub fn device(&self) -> Option<DeviceDescription> {
        self.device.lock().clone()
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
            .lock()
            .as_ref()
            .map(SsdpSearch::state)
            .unwrap_or(DiscoveryState::Idle)
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock() = phase;
    }

    fn current_session(&self) -> Option<Arc<DeviceSession>> {
        self.session.lock().clone()
    }

    async fn connect(
        &self,
        config: &CameraConfig,
        abort: &CancellationToken,
    ) -> std::result::Result<Arc<DeviceSession>, CameraError> {
        let search = SsdpSearch::from_config(&config.sony);
        *self.discovery.lock() = Some(search.clone());
        let location = search.find_camera(abort).await?;

        self.set_phase(SessionPhase::Connecting);
        let rpc_client = reqwest::Client::builder()
            .timeout(config.sony.request_timeout())
            .build()
            .map_err(|e| CameraError::DiscoveryFailed {
                details: format!("failed to create HTTP client: {}", e),
            })?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.sony.request_timeout())
            .build()
            .map_err(|e| CameraError::DiscoveryFailed {
                details: format!("failed to create HTTP client: {}", e),
            })?;

        let description = tokio::select! {
            _ = abort.cancelled() => return Err(CameraError::InitAborted),
            description = DeviceDescription::fetch(&rpc_client, &location) => description?,
        };
        let proxy = CameraProxy::new(rpc_client, description.directory());
        *self.device.lock() = Some(description);

        let session = Arc::new(DeviceSession::new(
            proxy,
            stream_client,
            SessionSettings::from(&config.sony),
            Arc::clone(&self.error_sink),
            self.picture_tx.clone(),
            self.live_view_tx.clone(),
        ));
        session.init().await?;
        search.set_state(DiscoveryState::Connected);

        Ok(session)
    }
}

#[async_trait]
impl CameraDriver for SonyCamera {
    fn name(&self) -> &'static str {
        "sony"
    }

    async fn init(&self, config: &CameraConfig) -> Result<()> {
        let initialized = self.session.lock().is_some();
        if initialized {
            info!("Camera already initialized, tearing down the previous session");
            self.deinit().await?;
        }

        let abort = CancellationToken::new();
        *self.abort.lock() = abort.clone();
        self.set_phase(SessionPhase::Discovering);

        let session = match self.connect(config, &abort).await {
            Ok(session) => session,
            Err(e) => {
                self.set_phase(SessionPhase::Idle);
                *self.device.lock() = None;
                return Err(e.into());
            }
        };

        // a deinit racing with the handshake wins
        let orphan = {
            let mut slot = self.session.lock();
            if abort.is_cancelled() {
                Some(Arc::clone(&session))
            } else {
                *slot = Some(Arc::clone(&session));
                None
            }
        };
        if let Some(orphan) = orphan {
            orphan.deinit().await;
            self.set_phase(SessionPhase::Idle);
            return Err(CameraError::InitAborted.into());
        }

        self.set_phase(SessionPhase::Active);
        info!("Sony camera initialized");
        Ok(())
    }

    async fn deinit(&self) -> Result<()> {
        self.abort.lock().cancel();
        self.stop_live_view().await;

        let session = self.session.lock().take();
        if let Some(session) = session {
            info!("Destroy camera");
            session.deinit().await;
        }

        *self.device.lock() = None;
        if let Some(search) = self.discovery.lock().take() {
            search.set_state(DiscoveryState::Idle);
        }
        self.set_phase(SessionPhase::Idle);
        Ok(())
    }

    fn take_picture(&self) {
        match self.current_session() {
            Some(session) => session.take_picture(),
            None => error!("Can't take a picture. No camera connected"),
        }
    }

    async fn observe_live_view(&self) -> Result<LiveViewSubscription> {
        let Some(session) = self.current_session() else {
            error!("Can't observe live view. No camera connected");
            return Err(CameraError::NotConnected.into());
        };

        let mut stream = self.live_view.lock().await;
        // subscribed before the check so a running stream's end marker is seen
        let subscription = LiveViewSubscription::new(self.live_view_tx.subscribe());
        if stream.as_ref().is_some_and(LiveViewStream::is_running) {
            warn!("Live view already running, sharing the existing stream");
            return Ok(subscription);
        }
        drop(subscription);

        if let Some(stale) = stream.take() {
            stale.join(LIVE_VIEW_STOP_TIMEOUT).await;
        }
        let subscription = LiveViewSubscription::new(self.live_view_tx.subscribe());
        *stream = Some(session.open_live_view().await?);
        Ok(subscription)
    }

    async fn stop_live_view(&self) {
        if let Some(session) = self.current_session() {
            session.stop_live_view_observing();
        }

        // joined under the lock so the end marker precedes any new subscription
        let mut stream = self.live_view.lock().await;
        if let Some(open) = stream.take() {
            open.join(LIVE_VIEW_STOP_TIMEOUT).await;
            debug!("Live view stopped");
        }
    }

    fn observe_pictures(&self) -> Result<PictureSubscription> {
        if self.session.lock().is_none() {
            error!("Can't observe pictures. No camera connected");
            return Err(CameraError::NotConnected.into());
        }
        info!("Observe pictures");
        Ok(PictureSubscription::new(self.picture_tx.subscribe()))
    }

    fn phase(&self) -> SessionPhase {
        match self.current_session() {
            Some(session) => session.phase(),
            None => *self.phase.lock(),
        }
    }
}
