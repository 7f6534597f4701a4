use crate::error::EventBusError;
use crate::frame::LiveFrame;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events exchanged between the camera core and the outer application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FotoboxEvent {
    /// One decoded live view frame ("live-view data" channel)
    LiveViewData { frame: LiveFrame },
    /// A picture was taken ("photo" channel)
    Photo {
        reference: String,
        timestamp: SystemTime,
    },
    /// External trigger (button, keyboard, UI) asks for a picture
    TakePictureRequested {
        source: String,
        timestamp: SystemTime,
    },
    /// A component hit a fatal error
    SystemError { component: String, error: String },
    /// Camera connection status changed
    CameraStatusChanged {
        driver: String,
        connected: bool,
        timestamp: SystemTime,
    },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl FotoboxEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FotoboxEvent::LiveViewData { frame } => {
                format!("Live view frame {} ({} bytes)", frame.sequence, frame.len())
            }
            FotoboxEvent::Photo { reference, .. } => format!("Photo taken: {}", reference),
            FotoboxEvent::TakePictureRequested { source, .. } => {
                format!("Take picture requested by {}", source)
            }
            FotoboxEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            FotoboxEvent::CameraStatusChanged {
                driver, connected, ..
            } => {
                format!(
                    "Camera '{}' {}",
                    driver,
                    if *connected {
                        "connected"
                    } else {
                        "disconnected"
                    }
                )
            }
            FotoboxEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FotoboxEvent::LiveViewData { .. } => "live_view_data",
            FotoboxEvent::Photo { .. } => "photo",
            FotoboxEvent::TakePictureRequested { .. } => "take_picture_requested",
            FotoboxEvent::SystemError { .. } => "system_error",
            FotoboxEvent::CameraStatusChanged { .. } => "camera_status_changed",
            FotoboxEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels.
/// Live view frames travel on their own channel so a frame flood can only
/// push out older frames, never photos, triggers or errors.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FotoboxEvent>,
    live_view: broadcast::Sender<FotoboxEvent>,
}

impl EventBus {
    /// Create a new event bus; both channels get the given capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (live_view, _) = broadcast::channel(capacity);
        Self { sender, live_view }
    }

    /// Subscribe to control events (everything except live view frames)
    pub fn subscribe(&self) -> broadcast::Receiver<FotoboxEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to control events with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Subscribe to live view frames. Slow receivers skip to the newest frames.
    pub fn subscribe_live_view(&self, name: &str) -> EventReceiver {
        EventReceiver::new(self.live_view.subscribe(), EventFilter::All, name.to_string())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: FotoboxEvent) -> Result<usize, EventBusError> {
        self.publish_now(event)
    }

    /// Publish from synchronous contexts
    pub fn publish_now(&self, event: FotoboxEvent) -> Result<usize, EventBusError> {
        match &event {
            FotoboxEvent::Photo { reference, .. } => {
                info!("Photo taken: {}", reference);
            }
            FotoboxEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            FotoboxEvent::CameraStatusChanged {
                driver, connected, ..
            } => {
                if *connected {
                    info!("Camera '{}' connected", driver);
                } else {
                    warn!("Camera '{}' disconnected", driver);
                }
            }
            FotoboxEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            FotoboxEvent::LiveViewData { .. } => {
                // one per frame, keep it out of debug output
                trace!("Event: {}", event.description());
            }
            FotoboxEvent::TakePictureRequested { .. } => {
                debug!("Event: {}", event.description());
            }
        }

        let channel = match &event {
            FotoboxEvent::LiveViewData { .. } => &self.live_view,
            _ => &self.sender,
        };
        channel.send(event).map_err(|e| EventBusError::PublishFailed {
            details: e.to_string(),
        })
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept errors from specific components
    Components(Vec<String>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &FotoboxEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => {
                if let FotoboxEvent::SystemError { component, .. } = event {
                    components.iter().any(|c| component.starts_with(c.as_str()))
                } else {
                    false
                }
            }
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<FotoboxEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<FotoboxEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event, skipping ahead when lagging
    pub async fn recv(&mut self) -> Result<FotoboxEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        trace!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<FotoboxEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = FotoboxEvent::Photo {
            reference: "/photos/a.jpg".to_string(),
            timestamp: SystemTime::now(),
        };

        let subscriber_count = event_bus.publish(event).await.unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            FotoboxEvent::Photo { reference, .. } => assert_eq!(reference, "/photos/a.jpg"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);

        let result = event_bus
            .publish(FotoboxEvent::SystemError {
                component: "test".to_string(),
                error: "nobody listens".to_string(),
            })
            .await;

        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["take_picture_requested"]),
            "trigger",
        );

        event_bus
            .publish(FotoboxEvent::Photo {
                reference: "/photos/a.jpg".to_string(),
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        event_bus
            .publish(FotoboxEvent::TakePictureRequested {
                source: "test".to_string(),
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "take_picture_requested");
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_component_filter_matches_prefix() {
        let filter = EventFilter::Components(vec!["camera".to_string()]);

        assert!(filter.matches(&FotoboxEvent::SystemError {
            component: "camera.sony".to_string(),
            error: "boom".to_string(),
        }));
        assert!(!filter.matches(&FotoboxEvent::SystemError {
            component: "keyboard".to_string(),
            error: "boom".to_string(),
        }));
        assert!(!filter.matches(&FotoboxEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: "test".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips_ahead() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "slow");

        for i in 0..5 {
            event_bus
                .publish(FotoboxEvent::Photo {
                    reference: format!("{}", i),
                    timestamp: SystemTime::now(),
                })
                .await
                .unwrap();
        }

        // oldest events are dropped, newest survive
        match receiver.recv().await.unwrap() {
            FotoboxEvent::Photo { reference, .. } => assert_eq!(reference, "3"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_live_view_flood_keeps_photos() {
        let event_bus = EventBus::new(8);
        let mut photos =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["photo"]), "photos");
        let mut frames = event_bus.subscribe_live_view("frames");

        event_bus
            .publish(FotoboxEvent::Photo {
                reference: "/photos/a.jpg".to_string(),
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        for sequence in 0..20 {
            event_bus
                .publish(FotoboxEvent::LiveViewData {
                    frame: LiveFrame::new(sequence, 0, Bytes::from_static(b"jpeg")),
                })
                .await
                .unwrap();
        }

        match timeout(Duration::from_secs(1), photos.recv())
            .await
            .unwrap()
            .unwrap()
        {
            FotoboxEvent::Photo { reference, .. } => assert_eq!(reference, "/photos/a.jpg"),
            other => panic!("unexpected event: {:?}", other),
        }

        // the frame receiver lagged and resumes with the newest frames
        match frames.recv().await.unwrap() {
            FotoboxEvent::LiveViewData { frame } => assert_eq!(frame.sequence, 12),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(photos.try_recv().unwrap().is_none());
    }
}
