use super::liveview::LiveViewDecoder;
use super::rpc::{CameraProxy, DEFAULT_VERSION};
use super::status::picture_urls;
use crate::camera::interface::LiveViewEvent;
use crate::camera::status::SessionPhase;
use crate::config::SonyConfig;
use crate::error::{CameraError, RpcError};
use crate::events::{EventBus, FotoboxEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const SERVICE: &str = "camera";
const EVENT_VERSION: &str = "1.3";
const ERROR_COMPONENT: &str = "camera.sony";
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(3);

static ACTIVE_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of device sessions alive in this process
pub fn active_session_count() -> usize {
    ACTIVE_SESSIONS.load(Ordering::SeqCst)
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub settle_delay: Duration,
    pub poll_pacing: Duration,
    pub liveview_size: String,
}

impl From<&SonyConfig> for SessionSettings {
    fn from(config: &SonyConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            poll_pacing: config.poll_pacing(),
            liveview_size: config.liveview_size.clone(),
        }
    }
}

/// Control session with one discovered camera.
///
/// Owns the status polling loop and the live view connection. Picture
/// references and live view events are published on channels owned by the
/// driver so subscriptions outlive a single session.
pub struct DeviceSession {
    proxy: CameraProxy,
    stream_client: reqwest::Client,
    settings: SessionSettings,
    error_sink: Arc<EventBus>,
    picture_tx: broadcast::Sender<String>,
    live_view_tx: broadcast::Sender<LiveViewEvent>,
    cancel: CancellationToken,
    live_view_cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    polling: Arc<AtomicBool>,
    torn_down: AtomicBool,
}

impl DeviceSession {
    pub fn new(
        proxy: CameraProxy,
        stream_client: reqwest::Client,
        settings: SessionSettings,
        error_sink: Arc<EventBus>,
        picture_tx: broadcast::Sender<String>,
        live_view_tx: broadcast::Sender<LiveViewEvent>,
    ) -> Self {
        ACTIVE_SESSIONS.fetch_add(1, Ordering::SeqCst);

        Self {
            proxy,
            stream_client,
            settings,
            error_sink,
            picture_tx,
            live_view_tx,
            cancel: CancellationToken::new(),
            live_view_cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            polling: Arc::new(AtomicBool::new(false)),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.polling.load(Ordering::SeqCst) {
            SessionPhase::Polling
        } else {
            SessionPhase::Active
        }
    }

    /// Enter remote control mode, start status polling and schedule the
    /// switch to still picture mode
    pub async fn init(&self) -> Result<(), CameraError> {
        self.proxy
            .call(SERVICE, "startRecMode", vec![], DEFAULT_VERSION)
            .await?;
        info!("Camera switched to rec mode");

        self.polling.store(true, Ordering::SeqCst);
        self.track(tokio::spawn(status_loop(
            self.proxy.clone(),
            self.picture_tx.clone(),
            Arc::clone(&self.error_sink),
            self.cancel.clone(),
            self.settings.poll_pacing,
            Arc::clone(&self.polling),
        )));

        self.track(tokio::spawn(ensure_still_mode(
            self.proxy.clone(),
            self.cancel.clone(),
            self.settings.settle_delay,
        )));

        Ok(())
    }

    /// Capture a still picture; the reference is published on the picture channel
    pub fn take_picture(&self) {
        if self.cancel.is_cancelled() {
            warn!("Can't take a picture. Camera session closed");
            return;
        }

        let proxy = self.proxy.clone();
        let picture_tx = self.picture_tx.clone();
        let cancel = self.cancel.clone();
        self.track(tokio::spawn(async move {
            let result = proxy
                .call(SERVICE, "actTakePicture", vec![], DEFAULT_VERSION)
                .await;
            if cancel.is_cancelled() {
                debug!("Discarding picture result of a closed session");
                return;
            }

            match result {
                Ok(result) => match first_picture_url(&result) {
                    Some(url) => {
                        info!("Took picture: {}", url);
                        let _ = picture_tx.send(url);
                    }
                    None => error!("actTakePicture returned no picture url: {:?}", result),
                },
                Err(e) => error!("Failed to take picture: {}", e),
            }
        }));
    }

    /// Start live view on the device and stream its frames onto the live view
    /// channel. Every call opens a new connection and closes the previous one.
    pub async fn open_live_view(&self) -> Result<LiveViewStream, CameraError> {
        info!("Observe live view");
        let result = self
            .proxy
            .call(
                SERVICE,
                "startLiveviewWithSize",
                vec![json!(self.settings.liveview_size)],
                DEFAULT_VERSION,
            )
            .await?;

        let url = result
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CameraError::LiveView {
                details: format!("startLiveviewWithSize returned no url: {:?}", result),
            })?
            .to_string();

        let token = self.cancel.child_token();
        if let Some(previous) = self.live_view_cancel.lock().replace(token.clone()) {
            previous.cancel();
        }

        let handle = tokio::spawn(stream_live_view(
            self.stream_client.clone(),
            url,
            self.live_view_tx.clone(),
            token.clone(),
        ));
        Ok(LiveViewStream {
            handle,
            done: token,
        })
    }

    /// Abort the open live view connection, if any
    pub fn stop_live_view_observing(&self) {
        if let Some(token) = self.live_view_cancel.lock().take() {
            debug!("Stop live view observing");
            token.cancel();
        }
    }

    /// Stop polling and live view, then leave rec mode. Never fails; a second
    /// call is a no-op.
    pub async fn deinit(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // no RPC is issued by the loops once this is set
        self.cancel.cancel();
        self.stop_live_view_observing();

        if let Err(e) = self
            .proxy
            .call(SERVICE, "stopRecMode", vec![], DEFAULT_VERSION)
            .await
        {
            error!("Can't stopRecMode on camera: {}", e);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut handle in tasks {
            if timeout(TASK_STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("Camera session task did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.polling.store(false, Ordering::SeqCst);
        info!("Camera session closed");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        ACTIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `actTakePicture` answers `[[url, ...]]`
fn first_picture_url(result: &[Value]) -> Option<String> {
    result
        .first()?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

async fn status_loop(
    proxy: CameraProxy,
    picture_tx: broadcast::Sender<String>,
    error_sink: Arc<EventBus>,
    cancel: CancellationToken,
    pacing: Duration,
    polling: Arc<AtomicBool>,
) {
    debug!("Status polling started");
    let mut long_poll = false;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = proxy
            .call(SERVICE, "getEvent", vec![json!(long_poll)], EVENT_VERSION)
            .await;
        if cancel.is_cancelled() {
            debug!("Discarding status of a closed session");
            break;
        }

        match result {
            Ok(result) => {
                long_poll = true;
                for url in picture_urls(&result) {
                    info!("Got new picture url: {}", url);
                    let _ = picture_tx.send(url);
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(pacing) => {}
                }
            }
            Err(e) if e.is_timeout() => {
                // expected when nothing changed during the long-poll
                trace!("getEvent timed out, polling again");
            }
            Err(e) => {
                report_polling_failure(&error_sink, e);
                break;
            }
        }
    }

    polling.store(false, Ordering::SeqCst);
    debug!("Status polling stopped");
}

fn report_polling_failure(error_sink: &EventBus, e: RpcError) {
    error!("An error occured while getEvent request to camera: {}", e);
    let failure = CameraError::PollingFailure {
        details: e.to_string(),
    };
    if let Err(publish_error) = error_sink.publish_now(FotoboxEvent::SystemError {
        component: ERROR_COMPONENT.to_string(),
        error: failure.to_string(),
    }) {
        warn!("Polling failure not delivered: {}", publish_error);
    }
}

async fn ensure_still_mode(proxy: CameraProxy, cancel: CancellationToken, settle_delay: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(settle_delay) => {}
    }

    let result = async {
        let shoot_mode = proxy
            .call(SERVICE, "getShootMode", vec![], DEFAULT_VERSION)
            .await?;
        if shoot_mode.first().and_then(Value::as_str) != Some("still") {
            info!("Switching shoot mode from {:?} to still", shoot_mode.first());
            proxy
                .call(SERVICE, "setShootMode", vec![json!("still")], DEFAULT_VERSION)
                .await?;
        }
        Ok::<_, RpcError>(())
    }
    .await;

    if let Err(e) = result {
        if !cancel.is_cancelled() {
            error!("Failed to set shoot mode to 'still': {}", e);
        }
    }
}

/// Handle to one open live view connection
pub struct LiveViewStream {
    handle: JoinHandle<()>,
    done: CancellationToken,
}

impl LiveViewStream {
    /// False once the stream is stopping. The end marker is only published
    /// after this turns false.
    pub fn is_running(&self) -> bool {
        !self.done.is_cancelled()
    }

    /// Wait for the stream task to publish its end marker, aborting it after `limit`
    pub async fn join(mut self, limit: Duration) {
        if timeout(limit, &mut self.handle).await.is_err() {
            warn!("Live view task did not stop in time, aborting it");
            self.handle.abort();
        }
    }
}

enum StreamOutcome {
    Ended,
    Aborted,
    Failed(String),
}

async fn stream_live_view(
    client: reqwest::Client,
    url: String,
    live_view_tx: broadcast::Sender<LiveViewEvent>,
    cancel: CancellationToken,
) {
    let outcome = run_live_view(&client, &url, &live_view_tx, &cancel).await;
    cancel.cancel();

    let event = match outcome {
        StreamOutcome::Ended => {
            info!("Live view stream ended");
            LiveViewEvent::Ended
        }
        StreamOutcome::Aborted => {
            debug!("Live view stream aborted");
            LiveViewEvent::Ended
        }
        StreamOutcome::Failed(details) => {
            warn!("Live view stream failed: {}", details);
            LiveViewEvent::Failed(details)
        }
    };
    let _ = live_view_tx.send(event);
}

async fn run_live_view(
    client: &reqwest::Client,
    url: &str,
    live_view_tx: &broadcast::Sender<LiveViewEvent>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    debug!("Opening live view stream {}", url);
    let response = tokio::select! {
        _ = cancel.cancelled() => return StreamOutcome::Aborted,
        response = client.get(url).send() => response,
    };
    let response = match response.and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(e) => return StreamOutcome::Failed(e.to_string()),
    };

    let mut body = response.bytes_stream();
    let mut decoder = LiveViewDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Aborted,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                decoder.push(&bytes);
                while let Some(frame) = decoder.next_frame() {
                    let _ = live_view_tx.send(LiveViewEvent::Frame(frame));
                }
            }
            Some(Err(e)) => return StreamOutcome::Failed(e.to_string()),
            None => {
                decoder.finish();
                debug!("Live view delivered {} frames", decoder.frames_decoded());
                return StreamOutcome::Ended;
            }
        }
    }
}
