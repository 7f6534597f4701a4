use super::*;
use crate::config::CameraConfig;
use crate::error::{CameraError, FotoboxError};
use crate::events::{EventBus, EventFilter, FotoboxEvent};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;

fn demo_config(photo_directory: &std::path::Path) -> CameraConfig {
    let mut config = CameraConfig {
        photo_directory: photo_directory.to_string_lossy().into_owned(),
        ..CameraConfig::default()
    };
    config.demo.toggle_interval_ms = 50;
    config
}

fn externals() -> ProviderExternals {
    ProviderExternals {
        event_bus: Arc::new(EventBus::new(64)),
    }
}

#[test]
fn test_driver_names() {
    assert_eq!(driver_names(), vec!["demo", "sony"]);
    assert_eq!(CameraProvider::driver_names(), vec!["demo", "sony"]);
    assert_eq!("sony".parse::<DriverKind>().unwrap(), DriverKind::Sony);
    assert_eq!(DriverKind::Demo.to_string(), "demo");
}

#[test]
fn test_unknown_driver() {
    match "canon".parse::<DriverKind>() {
        Err(CameraError::UnknownDriver { driver, available }) => {
            assert_eq!(driver, "canon");
            assert_eq!(available, vec!["demo", "sony"]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_builder_validation() {
    let result = CameraDriverBuilder::new().build();
    if let Err(FotoboxError::System { message }) = result {
        assert!(message.contains("Camera configuration must be specified"));
    } else {
        panic!("Expected system error for missing configuration");
    }

    let driver = CameraDriverBuilder::new()
        .config(CameraConfig::default())
        .error_sink(Arc::new(EventBus::new(4)))
        .build()
        .unwrap();
    assert_eq!(driver.name(), "demo");
    assert_eq!(driver.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_provider_rejects_unknown_driver() {
    let provider = CameraProvider::new();
    let config = CameraConfig {
        driver: "canon".to_string(),
        ..CameraConfig::default()
    };

    let result = provider.init(&config, externals()).await;
    assert!(matches!(
        result,
        Err(FotoboxError::Camera(CameraError::UnknownDriver { .. }))
    ));
    assert!(!provider.is_initialized());
    assert_eq!(provider.status(), CameraStatus::not_initialized());
}

#[tokio::test]
async fn test_provider_forwards_live_view_and_photos() {
    let dir = tempfile::tempdir().unwrap();
    let externals = externals();
    let mut frames = externals.event_bus.subscribe_live_view("test.frames");
    let mut photos = externals
        .event_bus
        .subscribe_filtered(EventFilter::EventTypes(vec!["photo"]), "test.photos");

    let provider = CameraProvider::new();
    provider
        .init(&demo_config(dir.path()), externals.clone())
        .await
        .unwrap();

    let status = provider.status();
    assert_eq!(status.driver, "demo");
    assert!(status.available);

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, FotoboxEvent::LiveViewData { .. }));
    }

    // the external trigger goes through the event bus
    externals
        .event_bus
        .publish(FotoboxEvent::TakePictureRequested {
            source: "test".to_string(),
            timestamp: SystemTime::now(),
        })
        .await
        .unwrap();

    match timeout(Duration::from_secs(2), photos.recv())
        .await
        .unwrap()
        .unwrap()
    {
        FotoboxEvent::Photo { reference, .. } => {
            assert!(std::path::Path::new(&reference).starts_with(dir.path()));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    provider.deinit().await.unwrap();
}

#[tokio::test]
async fn test_live_view_forwarding_starts_once() {
    let dir = tempfile::tempdir().unwrap();
    let externals = externals();
    let mut frames = externals.event_bus.subscribe_live_view("test.frames");

    let provider = CameraProvider::new();
    provider
        .init(&demo_config(dir.path()), externals.clone())
        .await
        .unwrap();
    provider.start_live_view().await;

    // a duplicated forwarder would deliver every frame twice
    let mut sequences = Vec::new();
    for _ in 0..4 {
        match timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap()
        {
            FotoboxEvent::LiveViewData { frame } => sequences.push(frame.sequence),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));

    provider.deinit().await.unwrap();
}

#[tokio::test]
async fn test_provider_deinit_is_idempotent() {
    let provider = CameraProvider::new();
    provider.deinit().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let externals = externals();
    let mut statuses = externals.event_bus.subscribe_filtered(
        EventFilter::EventTypes(vec!["camera_status_changed"]),
        "test.status",
    );

    provider
        .init(&demo_config(dir.path()), externals.clone())
        .await
        .unwrap();
    // re-init tears the previous driver down first
    provider
        .init(&demo_config(dir.path()), externals.clone())
        .await
        .unwrap();
    provider.deinit().await.unwrap();
    provider.deinit().await.unwrap();

    assert!(!provider.is_initialized());
    assert_eq!(provider.status().phase, SessionPhase::Idle);

    let mut connected = Vec::new();
    while let Ok(Some(FotoboxEvent::CameraStatusChanged { connected: c, .. })) =
        statuses.try_recv()
    {
        connected.push(c);
    }
    assert_eq!(connected, vec![true, false, true, false]);

    // triggers after deinit reach no driver
    provider.take_picture();
}
