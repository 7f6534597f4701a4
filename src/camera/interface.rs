use super::status::SessionPhase;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::frame::LiveFrame;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// Uniform capability surface implemented by every camera driver.
///
/// Drivers are shared behind an `Arc`, so every operation takes `&self` and a
/// concurrent `deinit` can abort an `init` that is still discovering.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Registry name of the driver
    fn name(&self) -> &'static str;

    /// Reach a usable state. Callable again after `deinit`; calling it while
    /// initialized tears the previous session down first.
    async fn init(&self, config: &CameraConfig) -> Result<()>;

    /// Release sockets, timers and subscriptions. A no-op when not initialized.
    async fn deinit(&self) -> Result<()>;

    /// Fire-and-forget capture; the result arrives on the picture stream.
    /// Logs and does nothing when no session is active.
    fn take_picture(&self);

    /// Subscribe to live view frames, starting the stream if it is not
    /// running. A second call while running shares the existing stream.
    async fn observe_live_view(&self) -> Result<LiveViewSubscription>;

    /// Stop the live view stream if one is open
    async fn stop_live_view(&self);

    /// Subscribe to picture references (file path or URL)
    fn observe_pictures(&self) -> Result<PictureSubscription>;

    /// Current lifecycle phase
    fn phase(&self) -> SessionPhase;
}

/// Messages carried on a driver's live view channel
#[derive(Debug, Clone)]
pub enum LiveViewEvent {
    Frame(LiveFrame),
    /// The stream completed (stopped or disconnected)
    Ended,
    /// The stream failed; no further frames follow
    Failed(String),
}

/// One subscriber's view of the live view stream.
///
/// Each subscriber has a bounded queue; when it falls behind, the oldest
/// frames are dropped and a warning is logged.
pub struct LiveViewSubscription {
    receiver: broadcast::Receiver<LiveViewEvent>,
    finished: bool,
}

impl LiveViewSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<LiveViewEvent>) -> Self {
        Self {
            receiver,
            finished: false,
        }
    }

    /// Next frame; `None` once the stream has ended, `Some(Err)` once if it failed
    pub async fn recv(&mut self) -> Option<std::result::Result<LiveFrame, CameraError>> {
        if self.finished {
            return None;
        }

        loop {
            match self.receiver.recv().await {
                Ok(LiveViewEvent::Frame(frame)) => return Some(Ok(frame)),
                Ok(LiveViewEvent::Ended) => {
                    self.finished = true;
                    return None;
                }
                Ok(LiveViewEvent::Failed(details)) => {
                    self.finished = true;
                    return Some(Err(CameraError::LiveView { details }));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Live view subscriber too slow, dropped {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// One subscriber's view of the picture stream
pub struct PictureSubscription {
    receiver: broadcast::Receiver<String>,
}

impl PictureSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Next picture reference; `None` when the driver is gone
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(reference) => return Some(reference),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Picture subscriber too slow, dropped {} pictures", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
