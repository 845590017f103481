//! Event fan-out to external consumers.
//!
//! Connectivity changes and carriage transitions are published on
//! broadcast channels. Subscribing hands out an independent receiver;
//! dropping the receiver is the unsubscribe contract, so a stopped
//! consumer can never keep a dangling callback alive.

use serde::Serialize;
use tokio::sync::broadcast;

use fornax_core::{ControllerId, TransitionEvent};

/// Connectivity state change of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityChanged {
    pub controller: ControllerId,
    pub connected: bool,
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast hub for connectivity and transition events.
///
/// Cloning is cheap; every clone publishes into the same channels.
#[derive(Clone)]
pub struct EventBus {
    connectivity: broadcast::Sender<ConnectivityChanged>,
    transitions: broadcast::Sender<TransitionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (connectivity, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transitions, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus {
            connectivity,
            transitions,
        }
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityChanged> {
        self.connectivity.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<TransitionEvent> {
        self.transitions.subscribe()
    }

    pub(crate) fn publish_connectivity(&self, controller: ControllerId, connected: bool) {
        log::debug!("{}: connectivity changed, connected={}", controller, connected);
        // Nobody listening is fine; events are fan-out, not commands.
        let _ = self.connectivity.send(ConnectivityChanged {
            controller,
            connected,
        });
    }

    pub(crate) fn publish_transition(&self, event: TransitionEvent) {
        log::debug!("{}: transition {:?}", event.controller, event.kind);
        let _ = self.transitions.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}
