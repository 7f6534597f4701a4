use crate::error::Result;
use crate::events::{EventBus, FotoboxEvent};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal trigger: SPACE or ENTER takes a picture, q or ESC quits
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

/// Event a key press translates to, if any
pub fn event_for_key(code: KeyCode) -> Option<FotoboxEvent> {
    match code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(FotoboxEvent::TakePictureRequested {
            source: "keyboard".to_string(),
            timestamp: SystemTime::now(),
        }),
        KeyCode::Char('q') | KeyCode::Esc => Some(FotoboxEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: "User requested via keyboard".to_string(),
        }),
        _ => None,
    }
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - press SPACE to take a picture, q to quit");

        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled - keyboard handler active");

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        // only presses, not releases
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(event) = event_for_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };
                        let quit = matches!(event, FotoboxEvent::ShutdownRequested { .. });
                        info!("{}", event.description());

                        let event_bus = Arc::clone(&event_bus);
                        runtime_handle.spawn(async move {
                            if let Err(e) = event_bus.publish(event).await {
                                warn!("Failed to publish keyboard event: {}", e);
                            }
                        });

                        if quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // give the blocking task a poll interval to restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert!(matches!(
            event_for_key(KeyCode::Char(' ')),
            Some(FotoboxEvent::TakePictureRequested { ref source, .. }) if source == "keyboard"
        ));
        assert!(matches!(
            event_for_key(KeyCode::Enter),
            Some(FotoboxEvent::TakePictureRequested { .. })
        ));
        assert!(matches!(
            event_for_key(KeyCode::Esc),
            Some(FotoboxEvent::ShutdownRequested { .. })
        ));
        assert!(event_for_key(KeyCode::Char('x')).is_none());
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let event_bus = Arc::new(EventBus::new(100));
        let handler = KeyboardInputHandler::new(event_bus);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
