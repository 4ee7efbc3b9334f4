//! Bounded worker pool in front of [`GameService`].

use std::sync::Arc;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::InboundEvent;
use crate::service::GameService;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("event queue is full")]
    QueueFull,
    #[error("dispatcher has shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_depth: 1024,
        }
    }
}

/// Queues inbound events and runs each one on its own task, with at most
/// `workers` events in flight.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<InboundEvent>,
    queue_depth: usize,
}

impl Dispatcher {
    pub fn spawn(service: Arc<GameService>, config: DispatchConfig) -> (Self, JoinHandle<()>) {
        let queue_depth = config.queue_depth.max(1);
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(queue_depth);
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.handle(event).await;
                    drop(permit);
                });
            }
            debug!("dispatcher drained");
        });
        (Self { tx, queue_depth }, handle)
    }

    /// Enqueues without waiting. A full queue sheds the event.
    pub fn submit(&self, event: InboundEvent) -> Result<(), DispatchError> {
        let result = self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(event) => {
                warn!(kind = event.kind(), "event queue full, dropping event");
                counter!("minefield_events_dropped_total", 1);
                DispatchError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        });
        let queued = self.queue_depth.saturating_sub(self.tx.capacity());
        gauge!("minefield_dispatch_queue_depth", queued as f64);
        result
    }
}
