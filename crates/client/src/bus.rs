//! Per-model broadcast bus shared by sibling client instances.

use std::sync::Arc;

use dashmap::DashMap;
use proto::{Message, ModelName};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-model buffer; slower subscribers past this lose messages.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// A message as it travels on the bus.
#[derive(Debug, Clone)]
pub struct BusEnvelope {
    /// Bus instance that published the message.
    pub origin: Uuid,
    /// Model topic the message belongs to.
    pub model: ModelName,
    /// Accepted message.
    pub message: Message,
}

/// Device-local fan-out point. Each model gets its own topic, so a
/// subscriber for one model never observes another model's traffic.
#[derive(Clone)]
pub struct BroadcastHub {
    capacity: usize,
    topics: Arc<DashMap<ModelName, broadcast::Sender<BusEnvelope>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl BroadcastHub {
    /// Creates a hub whose topics buffer `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Arc::new(DashMap::new()),
        }
    }

    /// Opens a fresh bus instance subscribed to `model`.
    pub fn join(&self, model: ModelName) -> CrossTabBus {
        self.topics.retain(|_, tx| tx.receiver_count() > 0);
        let tx = self
            .topics
            .entry(model.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        let rx = tx.subscribe();
        let origin = Uuid::new_v4();
        debug!(model = %model, %origin, "Joined cross-tab bus");
        CrossTabBus {
            model,
            origin,
            tx,
            rx,
        }
    }

    /// Number of live bus instances subscribed to `model`.
    pub fn subscriber_count(&self, model: &ModelName) -> usize {
        self.topics
            .get(model)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// One instance's view of a model topic.
///
/// Publishing is fire-and-forget and at-most-once. An instance never
/// receives its own publishes.
pub struct CrossTabBus {
    model: ModelName,
    origin: Uuid,
    tx: broadcast::Sender<BusEnvelope>,
    rx: broadcast::Receiver<BusEnvelope>,
}

impl CrossTabBus {
    /// Publishes an accepted message to sibling instances.
    pub fn publish(&self, message: &Message) {
        let envelope = BusEnvelope {
            origin: self.origin,
            model: self.model.clone(),
            message: message.clone(),
        };
        // The publisher's own receiver counts, so `Err` only means the topic is gone.
        match self.tx.send(envelope) {
            Ok(receivers) => debug!(model = %self.model, receivers, "Published to bus"),
            Err(_) => debug!(model = %self.model, "Bus publish had no receivers"),
        }
    }

    /// Waits for the next message from a sibling instance.
    ///
    /// Returns `None` once the topic is closed. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if let Some(message) = self.accept(envelope) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(model = %self.model, skipped, "Cross-tab bus lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if let Some(message) = self.accept(envelope) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(model = %self.model, skipped, "Cross-tab bus lagged; messages dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&self, envelope: BusEnvelope) -> Option<Message> {
        if envelope.origin == self.origin {
            return None;
        }
        if envelope.model != self.model {
            warn!(expected = %self.model, got = %envelope.model, "Dropping bus message for another model");
            return None;
        }
        Some(envelope.message)
    }

    pub fn model(&self) -> &ModelName {
        &self.model
    }
}
