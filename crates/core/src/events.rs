//! Event System
//!
//! Provides a pub/sub event bus so the CLI (or any other front end) can
//! follow a debug attach while it runs.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::debug;

/// Where a debug attach currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Idle,
    Verifying,
    EnumeratingDevices,
    /// Polling every device for the requested package
    LocatingByPackage,
    /// Polling the chosen device for a web view
    LocatingWebViewOnDevice,
    Forwarding,
    Resolved,
    Failed,
}

/// Events emitted while attaching and tearing down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Resolver moved to a new stage
    StageChanged(ResolveStage),
    /// One device could not be searched; the search goes on without it
    DeviceQueryFailed { serial: String, message: String },
    PortForwarded {
        serial: String,
        local: String,
        remote: String,
    },
    PortUnforwarded { local: String },
    /// Session is shutting down
    Shutdown,
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<Event>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<Event, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Everything delivered so far, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<Event>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers, forgetting those that went away
    pub fn emit(&self, event: Event) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        let delivered = subscribers.len();

        debug!("Event {:?} delivered to {} subscribers", event, delivered);
        delivered
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
