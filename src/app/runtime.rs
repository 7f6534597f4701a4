use super::{FotoboxApp, ShutdownReason};
use crate::error::{FotoboxError, Result};
use crate::events::{EventFilter, FotoboxEvent};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

type SharedShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl FotoboxApp {
    /// Run until a signal or a shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Fotobox is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| FotoboxError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FotoboxError::system("Shutdown receiver already taken"))?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(&shutdown_sender);
        self.setup_shutdown_listener(&shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| FotoboxError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Fotobox shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&mut self, shutdown_sender: &SharedShutdownSender) {
        #[cfg(unix)]
        {
            let shutdown_sender = Arc::clone(shutdown_sender);
            self.background_tasks.push(tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    send_shutdown(&shutdown_sender, ShutdownReason::Signal("SIGTERM".to_string()))
                        .await;
                }
            }));
        }

        let shutdown_sender = Arc::clone(shutdown_sender);
        self.background_tasks.push(tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                send_shutdown(&shutdown_sender, ShutdownReason::Signal("SIGINT".to_string()))
                    .await;
            }
        }));
    }

    /// Turn a published shutdown request into a shutdown
    fn setup_shutdown_listener(&mut self, shutdown_sender: &SharedShutdownSender) {
        let mut requests = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "app.shutdown",
        );
        let shutdown_sender = Arc::clone(shutdown_sender);

        self.background_tasks.push(tokio::spawn(async move {
            if let Ok(FotoboxEvent::ShutdownRequested { reason, .. }) = requests.recv().await {
                send_shutdown(&shutdown_sender, ShutdownReason::UserRequest(reason)).await;
            }
        }));
    }
}

async fn send_shutdown(sender: &SharedShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
