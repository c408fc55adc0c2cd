//! Event Bus
//!
//! Broadcast channel carrying the structured records produced by the core
//! (exit decisions, reward updates, intent lifecycle) to any subscriber:
//! notification delivery, logging sinks, tests.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::utils::types::{ExitDecision, OrderIntent, RewardUpdate};

/// Events published by the core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Intent sized, levelled and handed to the broker
    IntentCreated(OrderIntent),
    IntentRejected {
        intent_id: String,
        symbol: String,
        reason: String,
    },
    /// Signal produced no order: SKIP action, or sizing skip
    SignalSkipped {
        symbol: String,
        action_id: u8,
        reason: String,
    },
    Exit(ExitDecision),
    Reward(RewardUpdate),
    PolicyPersisted {
        version: u64,
    },
    Heartbeat {
        timestamp: i64,
        open_positions: u64,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::IntentCreated(_) => "intent_created",
            Event::IntentRejected { .. } => "intent_rejected",
            Event::SignalSkipped { .. } => "signal_skipped",
            Event::Exit(_) => "exit",
            Event::Reward(_) => "reward",
            Event::PolicyPersisted { .. } => "policy_persisted",
            Event::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Event bus for broadcasting events to multiple subscribers
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(count) => debug!("Event {} sent to {} receivers", kind, count),
            // No receivers - fine during startup/shutdown
            Err(_) => debug!("No receivers for event {}", kind),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Named subscriber that tolerates lag
pub struct EventProcessor {
    receiver: broadcast::Receiver<Event>,
    name: String,
}

impl EventProcessor {
    pub fn new(bus: &EventBus, name: &str) -> Self {
        Self {
            receiver: bus.subscribe(),
            name: name.to_string(),
        }
    }

    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Event processor '{}' lagged by {} messages", self.name, count);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for processor '{}'", self.name);
                    return None;
                }
            }
        }
    }

    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Spawn a task feeding every event to `handler` until the bus closes
pub fn spawn_event_handler<F, Fut>(
    bus: &EventBus,
    name: &str,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(Event) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut processor = EventProcessor::new(bus, name);
    let name = name.to_string();

    tokio::spawn(async move {
        debug!("Event handler '{}' started", name);
        while let Some(event) = processor.next().await {
            handler(event).await;
        }
        debug!("Event handler '{}' stopped", name);
    })
}
