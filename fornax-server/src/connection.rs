//! Connect/disconnect lifecycle per controller.
//!
//! The manager owns one endpoint slot per controller and is the only
//! mutator of connection state. A successful connect publishes
//! `ConnectivityChanged(id, true)`, which is the sole trigger that
//! (re)starts the controller's poll loop. Failures are reported and
//! leave the slot Faulted; reconnection is event-driven from outside,
//! never an internal backoff loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use fornax_core::ControllerId;

use crate::client::{IoError, ModbusIo, SharedClient};
use crate::events::EventBus;

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Network parameters of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub host: String,
    pub port: u16,
    pub unit: u8,
    pub connect_timeout: Duration,
    pub receive_timeout: Duration,
}

impl ControllerEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        ControllerEndpoint {
            host: host.into(),
            port: DEFAULT_PORT,
            unit: 1,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr, ConnectError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConnectError::InvalidAddress(format!("{}:{}: {e}", self.host, self.port)))
    }
}

/// Connection state of one controller slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect timed out")]
    TimedOut,

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    #[error("unknown controller {0}")]
    UnknownController(ControllerId),
}

struct Slot {
    endpoint: ControllerEndpoint,
    state: ConnectionState,
    last_error: Option<String>,
    client: Option<SharedClient>,
}

/// Owns the connect/disconnect lifecycle for every controller.
pub struct ConnectionManager {
    slots: Mutex<HashMap<ControllerId, Slot>>,
    bus: EventBus,
}

impl ConnectionManager {
    pub fn new(bus: EventBus) -> Self {
        ConnectionManager {
            slots: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Register a controller slot. Called once per controller at startup.
    pub async fn register(&self, id: ControllerId, endpoint: ControllerEndpoint) {
        let mut slots = self.slots.lock().await;
        slots.insert(
            id,
            Slot {
                endpoint,
                state: ConnectionState::Disconnected,
                last_error: None,
                client: None,
            },
        );
    }

    /// Open the controller's connection. On success the slot holds the
    /// shared client and `ConnectivityChanged(id, true)` is published.
    pub async fn connect(&self, id: ControllerId) -> Result<SharedClient, ConnectError> {
        let endpoint = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(&id)
                .ok_or(ConnectError::UnknownController(id))?;
            if let Some(client) = &slot.client {
                // Already connected; re-announce so a stalled consumer can
                // resynchronize.
                let client = client.clone();
                drop(slots);
                self.bus.publish_connectivity(id, true);
                return Ok(client);
            }
            slot.state = ConnectionState::Connecting;
            slot.endpoint.clone()
        };

        let addr = match endpoint.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.mark_faulted(id, &e.to_string()).await;
                return Err(e);
            }
        };

        log::debug!("{}: connecting to {}", id, addr);
        match ModbusIo::connect(
            addr,
            endpoint.unit,
            endpoint.connect_timeout,
            endpoint.receive_timeout,
        )
        .await
        {
            Ok(io) => {
                let client = SharedClient::new(Box::new(io));
                self.attach(id, client.clone()).await?;
                Ok(client)
            }
            Err(IoError::Timeout) => {
                log::error!("{}: connect to {} timed out", id, addr);
                self.mark_faulted(id, "connect timed out").await;
                Err(ConnectError::TimedOut)
            }
            Err(IoError::Protocol(e)) => {
                log::error!("{}: connect to {} failed: {}", id, addr, e);
                self.mark_faulted(id, &e.to_string()).await;
                Err(ConnectError::Refused(e.to_string()))
            }
        }
    }

    /// Install an already-open client and announce connectivity. The
    /// normal path goes through [`connect`](Self::connect); tests attach
    /// scripted clients directly.
    pub async fn attach(&self, id: ControllerId, client: SharedClient) -> Result<(), ConnectError> {
        {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(&id)
                .ok_or(ConnectError::UnknownController(id))?;
            slot.client = Some(client);
            slot.state = ConnectionState::Connected;
            slot.last_error = None;
        }
        self.bus.publish_connectivity(id, true);
        Ok(())
    }

    /// Close the controller's connection and announce the change.
    pub async fn disconnect(&self, id: ControllerId) {
        let client = {
            let mut slots = self.slots.lock().await;
            let Some(slot) = slots.get_mut(&id) else {
                return;
            };
            slot.state = ConnectionState::Disconnected;
            slot.client.take()
        };
        if let Some(client) = client {
            if let Err(e) = client.lock().await.close().await {
                log::debug!("{}: close failed: {}", id, e);
            }
            self.bus.publish_connectivity(id, false);
        }
    }

    /// Mark the slot Faulted after an I/O failure, dropping the dead
    /// client if one was attached.
    pub async fn mark_faulted(&self, id: ControllerId, reason: &str) {
        let had_client = {
            let mut slots = self.slots.lock().await;
            let Some(slot) = slots.get_mut(&id) else {
                return;
            };
            slot.state = ConnectionState::Faulted;
            slot.last_error = Some(reason.to_string());
            slot.client.take().is_some()
        };
        if had_client {
            self.bus.publish_connectivity(id, false);
        }
    }

    pub async fn client(&self, id: ControllerId) -> Option<SharedClient> {
        self.slots.lock().await.get(&id)?.client.clone()
    }

    pub async fn state(&self, id: ControllerId) -> Option<ConnectionState> {
        Some(self.slots.lock().await.get(&id)?.state)
    }

    /// Reason of the last connection failure, if any.
    pub async fn last_error(&self, id: ControllerId) -> Option<String> {
        self.slots.lock().await.get(&id)?.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockIo, MockState};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_connect_refused_leaves_slot_faulted() {
        let id = ControllerId(0);
        let bus = EventBus::new();
        let manager = ConnectionManager::new(bus);
        // Port 1 on loopback refuses immediately on any sane test host.
        let mut endpoint = ControllerEndpoint::new("127.0.0.1");
        endpoint.port = 1;
        manager.register(id, endpoint).await;

        let result = manager.connect(id).await;
        assert!(matches!(
            result,
            Err(ConnectError::Refused(_)) | Err(ConnectError::TimedOut)
        ));
        let state = manager.state(id).await.unwrap();
        assert_eq!(state, ConnectionState::Faulted);
        assert!(manager.last_error(id).await.is_some());
        assert!(manager.client(id).await.is_none());
    }

    #[tokio::test]
    async fn test_attach_publishes_connectivity() {
        let id = ControllerId(2);
        let bus = EventBus::new();
        let mut rx = bus.subscribe_connectivity();
        let manager = ConnectionManager::new(bus);
        manager.register(id, ControllerEndpoint::new("10.0.0.2")).await;

        let state = Arc::new(MockState::default());
        manager
            .attach(id, SharedClient::new(Box::new(MockIo::new(state))))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.controller, id);
        assert!(event.connected);
        assert_eq!(manager.state(id).await, Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_disconnect_announces_and_clears_client() {
        let id = ControllerId(3);
        let bus = EventBus::new();
        let manager = ConnectionManager::new(bus.clone());
        manager.register(id, ControllerEndpoint::new("10.0.0.3")).await;
        let state = Arc::new(MockState::default());
        manager
            .attach(id, SharedClient::new(Box::new(MockIo::new(state))))
            .await
            .unwrap();

        let mut rx = bus.subscribe_connectivity();
        manager.disconnect(id).await;

        let event = rx.recv().await.unwrap();
        assert!(!event.connected);
        assert!(manager.client(id).await.is_none());
        assert_eq!(manager.state(id).await, Some(ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_unknown_controller() {
        let manager = ConnectionManager::new(EventBus::new());
        assert!(matches!(
            manager.connect(ControllerId(9)).await,
            Err(ConnectError::UnknownController(_))
        ));
    }

    #[tokio::test]
    async fn test_register_starts_disconnected() {
        let id = ControllerId(1);
        let manager = ConnectionManager::new(EventBus::new());
        manager.register(id, ControllerEndpoint::new("192.168.0.10")).await;
        assert_eq!(manager.state(id).await, Some(ConnectionState::Disconnected));
    }
}
