//! In-process publish/subscribe between components.
//!
//! Publishing never blocks and never fails. Every subscriber runs in its own
//! task, and each event is handled in a task of its own, so a handler that
//! errors or panics is logged and affects neither the publisher nor the
//! other subscribers.

mod event;

use std::future::Future;
use std::sync::Arc;

pub use event::MaintenanceNotice;
pub use event::SystemEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: SystemEvent) {
        debug!("publishing {}", event.topic());
        if self.sender.send(event).is_err() {
            trace!("no subscribers");
        }
    }

    /// raw receiver; sees every event published from now on
    pub fn receiver(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    /// Register `handler` under `name`.
    ///
    /// The subscription is live once this returns, even if the spawned task
    /// has not been polled yet. Events are handled one at a time, in publish
    /// order.
    pub fn subscribe<F, Fut>(&self, name: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let name = name.to_string();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(subscriber = %name, "subscriber lagging, missed {missed} events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let topic = event.topic();
                let handler = handler.clone();
                match tokio::spawn(async move { handler(event).await }).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(subscriber = %name, "handler for {topic} failed: {e:#}"),
                    Err(join_error) if join_error.is_panic() => {
                        error!(subscriber = %name, "handler for {topic} panicked")
                    }
                    Err(_) => debug!(subscriber = %name, "handler for {topic} cancelled"),
                }
            }
            debug!(subscriber = %name, "event bus closed");
        })
    }
}
