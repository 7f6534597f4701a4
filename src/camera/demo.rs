use super::interface::{CameraDriver, LiveViewEvent, LiveViewSubscription, PictureSubscription};
use super::status::SessionPhase;
use crate::config::CameraConfig;
use crate::error::{CameraError, FotoboxError, Result};
use crate::frame::LiveFrame;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Local;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stub driver alternating between two still images, for running without hardware
pub struct DemoCamera {
    state: Arc<DemoState>,
    live_view_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    picture_tx: broadcast::Sender<String>,
}

struct DemoState {
    session: Mutex<Option<DemoSession>>,
    current: AtomicUsize,
    sequence: AtomicU64,
    live_view_tx: broadcast::Sender<LiveViewEvent>,
}

#[derive(Clone)]
struct DemoSession {
    images: [Bytes; 2],
    toggle_interval: Duration,
    photo_directory: PathBuf,
}

impl DemoState {
    fn current_image(&self) -> Option<Bytes> {
        let session = self.session.lock();
        session
            .as_ref()
            .map(|s| s.images[self.current.load(Ordering::SeqCst) % 2].clone())
    }

    fn emit_current(&self) {
        if let Some(image) = self.current_image() {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            let _ = self
                .live_view_tx
                .send(LiveViewEvent::Frame(LiveFrame::new(sequence, 0, image)));
        }
    }

    fn toggle(&self) {
        self.current.fetch_xor(1, Ordering::SeqCst);
    }
}

impl DemoCamera {
    pub fn new(live_view_buffer: usize, picture_buffer: usize) -> Self {
        let (live_view_tx, _) = broadcast::channel(live_view_buffer.max(1));
        let (picture_tx, _) = broadcast::channel(picture_buffer.max(1));

        Self {
            state: Arc::new(DemoState {
                session: Mutex::new(None),
                current: AtomicUsize::new(0),
                sequence: AtomicU64::new(0),
                live_view_tx,
            }),
            live_view_task: tokio::sync::Mutex::new(None),
            picture_tx,
        }
    }

    async fn load_images(config: &CameraConfig) -> Result<[Bytes; 2]> {
        match config.demo.images.as_slice() {
            [] => Ok(builtin_images()),
            [first, second] => Ok([
                Bytes::from(tokio::fs::read(first).await?),
                Bytes::from(tokio::fs::read(second).await?),
            ]),
            other => Err(FotoboxError::Component {
                component: "camera.demo".to_string(),
                message: format!("demo driver needs two images, got {}", other.len()),
            }),
        }
    }

    async fn store_picture(session: &DemoSession, image: &Bytes) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&session.photo_directory).await?;
        let file_name = format!(
            "demo_{}_{}.jpg",
            Local::now().format("%Y%m%d_%H%M%S"),
            Uuid::new_v4()
        );
        let path = session.photo_directory.join(file_name);
        tokio::fs::write(&path, image).await?;
        Ok(path)
    }
}

#[async_trait]
impl CameraDriver for DemoCamera {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn init(&self, config: &CameraConfig) -> Result<()> {
        let initialized = self.state.session.lock().is_some();
        if initialized {
            self.deinit().await?;
        }

        let images = Self::load_images(config).await?;
        *self.state.session.lock() = Some(DemoSession {
            images,
            toggle_interval: config.demo.toggle_interval(),
            photo_directory: config.photo_directory(),
        });
        self.state.current.store(0, Ordering::SeqCst);

        info!(
            "Demo camera initialized (toggle every {:?})",
            config.demo.toggle_interval()
        );
        Ok(())
    }

    async fn deinit(&self) -> Result<()> {
        self.stop_live_view().await;
        if self.state.session.lock().take().is_some() {
            info!("Demo camera deinitialized");
        }
        Ok(())
    }

    fn take_picture(&self) {
        let session = self.state.session.lock().clone();
        let (Some(session), Some(image)) = (session, self.state.current_image()) else {
            warn!("Can't take a picture. Demo camera not initialized");
            return;
        };

        info!("Take picture and send to client");
        let picture_tx = self.picture_tx.clone();
        // the reference is sent only once the file is written
        tokio::spawn(async move {
            match Self::store_picture(&session, &image).await {
                Ok(path) => {
                    let reference = path.to_string_lossy().into_owned();
                    if picture_tx.send(reference).is_err() {
                        debug!("No picture subscribers");
                    }
                }
                Err(e) => error!("Failed to store demo picture: {}", e),
            }
        });
    }

    async fn observe_live_view(&self) -> Result<LiveViewSubscription> {
        let toggle_interval = match self.state.session.lock().as_ref() {
            Some(session) => session.toggle_interval,
            None => return Err(CameraError::NotConnected.into()),
        };

        // end markers are sent under this lock, so none can reach the new subscriber
        let mut task = self.live_view_task.lock().await;
        let subscription = LiveViewSubscription::new(self.state.live_view_tx.subscribe());

        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Live view already running, sharing the existing stream");
            return Ok(subscription);
        }

        info!("Observe live view");
        let state = Arc::clone(&self.state);
        *task = Some(tokio::spawn(async move {
            state.emit_current();

            let mut ticker = interval_at(Instant::now() + toggle_interval, toggle_interval);
            loop {
                ticker.tick().await;
                state.toggle();
                state.emit_current();
            }
        }));

        Ok(subscription)
    }

    async fn stop_live_view(&self) {
        let mut task = self.live_view_task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            let _ = handle.await;
            let _ = self.state.live_view_tx.send(LiveViewEvent::Ended);
            debug!("Demo live view stopped");
        }
    }

    fn observe_pictures(&self) -> Result<PictureSubscription> {
        if self.state.session.lock().is_none() {
            return Err(CameraError::NotConnected.into());
        }
        info!("Observe pictures");
        Ok(PictureSubscription::new(self.picture_tx.subscribe()))
    }

    fn phase(&self) -> SessionPhase {
        if self.state.session.lock().is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        }
    }
}

/// Two small placeholder JPEGs differing in their scan data
fn builtin_images() -> [Bytes; 2] {
    [placeholder_jpeg(0x20), placeholder_jpeg(0xC0)]
}

fn placeholder_jpeg(shade: u8) -> Bytes {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    data.extend_from_slice(b"JFIF\0");
    data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
    data.extend((0..64u8).map(|i| shade.wrapping_add(i)));
    data.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout_at;

    fn demo_config(photo_directory: &std::path::Path) -> CameraConfig {
        CameraConfig {
            photo_directory: photo_directory.to_string_lossy().into_owned(),
            ..CameraConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_view_alternates_two_images() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DemoCamera::new(16, 16);
        camera.init(&demo_config(dir.path())).await.unwrap();

        let mut subscription = camera.observe_live_view().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = timeout_at(deadline, subscription.recv()).await {
            frames.push(frame.unwrap());
        }

        // immediate emission plus one per toggle at 2s and 4s
        assert!(frames.len() >= 3, "got {} frames", frames.len());
        let [first, second] = builtin_images();
        for (i, frame) in frames.iter().enumerate() {
            let expected = if i % 2 == 0 { &first } else { &second };
            assert_eq!(&frame.data, expected);
            assert!(frame.is_jpeg());
        }

        camera.deinit().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_observe_shares_stream() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DemoCamera::new(16, 16);
        camera.init(&demo_config(dir.path())).await.unwrap();

        let mut first = camera.observe_live_view().await.unwrap();
        let mut second = camera.observe_live_view().await.unwrap();

        let a = first.recv().await.unwrap().unwrap();
        let b = second.recv().await.unwrap().unwrap();
        assert_eq!(a.sequence, b.sequence);

        camera.stop_live_view().await;
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_take_picture_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DemoCamera::new(16, 16);
        camera.init(&demo_config(dir.path())).await.unwrap();

        let mut pictures = camera.observe_pictures().unwrap();
        camera.take_picture();

        let reference = pictures.recv().await.unwrap();
        let path = PathBuf::from(&reference);
        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("demo_") && name.ends_with(".jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), builtin_images()[0].to_vec());
    }

    #[tokio::test]
    async fn test_failed_picture_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_directory");
        std::fs::write(&blocker, b"file").unwrap();

        let camera = DemoCamera::new(16, 16);
        camera.init(&demo_config(&blocker)).await.unwrap();
        let mut pictures = camera.observe_pictures().unwrap();
        camera.take_picture();

        let outcome = tokio::time::timeout(Duration::from_millis(200), pictures.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_after_stop_gets_fresh_stream() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DemoCamera::new(16, 16);
        camera.init(&demo_config(dir.path())).await.unwrap();

        let mut first = camera.observe_live_view().await.unwrap();
        first.recv().await.unwrap().unwrap();
        camera.stop_live_view().await;

        let mut second = camera.observe_live_view().await.unwrap();
        assert!(second.recv().await.unwrap().is_ok());

        camera.deinit().await.unwrap();
    }

    #[tokio::test]
    async fn test_uninitialized_camera() {
        let camera = DemoCamera::new(16, 16);

        // no-op, must not panic
        camera.take_picture();
        assert!(matches!(
            camera.observe_live_view().await,
            Err(FotoboxError::Camera(CameraError::NotConnected))
        ));
        assert!(camera.observe_pictures().is_err());
        assert_eq!(camera.phase(), SessionPhase::Idle);

        camera.deinit().await.unwrap();
        camera.deinit().await.unwrap();
    }

    #[tokio::test]
    async fn test_configured_images() {
        let dir = tempfile::tempdir().unwrap();
        let giraffe = dir.path().join("giraffe.jpg");
        let rabbit = dir.path().join("rabbit.jpg");
        std::fs::write(&giraffe, b"giraffe").unwrap();
        std::fs::write(&rabbit, b"rabbit").unwrap();

        let mut config = demo_config(dir.path());
        config.demo.images = vec![
            giraffe.to_string_lossy().into_owned(),
            rabbit.to_string_lossy().into_owned(),
        ];

        let camera = DemoCamera::new(16, 16);
        camera.init(&config).await.unwrap();
        assert_eq!(camera.phase(), SessionPhase::Active);

        let mut subscription = camera.observe_live_view().await.unwrap();
        let frame = subscription.recv().await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"giraffe");

        camera.deinit().await.unwrap();
        assert_eq!(camera.phase(), SessionPhase::Idle);
    }
}
