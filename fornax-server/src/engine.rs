//! The acquisition engine.
//!
//! An [`Engine`] is the explicit registry tying every per-controller
//! resource together: endpoint, register map, shared connection, latest
//! snapshot channel and the currently running poll loop. It is built once
//! at startup and passed by reference to everything that needs it; there
//! is no process-wide static state.
//!
//! Poll loop lifecycle is event-driven: every `ConnectivityChanged(id,
//! true)` cancels the controller's previous loop (if any) and starts the
//! next generation, so two loops for one controller never run
//! concurrently and a stale generation cannot outlive its replacement.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use fornax_core::{ControllerId, ControllerKind, CoreError, RegisterMap, Snapshot, TransitionEvent};

use crate::command::{self, transfer_code, CommandError, CommandRequest, CommandValue, Precondition, Station, MOVE_CODE_REGISTER, MOVE_START_COIL};
use crate::connection::{ConnectError, ConnectionManager, ConnectionState, ControllerEndpoint};
use crate::events::{ConnectivityChanged, EventBus};
use crate::poll::{PollLoop, SnapshotReceiver};

/// Static description of one controller, produced from settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub id: ControllerId,
    pub name: String,
    pub kind: ControllerKind,
    pub device_index: u16,
    pub endpoint: ControllerEndpoint,
}

/// The engine's run loop cannot fail; the type exists for the subsystem
/// boundary.
#[derive(Debug, Error)]
pub enum EngineError {}

struct Slot {
    config: ControllerConfig,
    map: Arc<RegisterMap>,
    latest: watch::Sender<Option<Arc<Snapshot>>>,
}

struct LoopHandle {
    generation: u64,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct Engine {
    bus: EventBus,
    manager: ConnectionManager,
    slots: HashMap<ControllerId, Slot>,
    loops: Mutex<HashMap<ControllerId, LoopHandle>>,
}

impl Engine {
    /// Build the registry. Register maps are validated here, so a bad
    /// field table fails before any connection is opened.
    pub async fn new(configs: Vec<ControllerConfig>, bus: EventBus) -> Result<Self, CoreError> {
        let manager = ConnectionManager::new(bus.clone());
        let mut slots = HashMap::new();
        for config in configs {
            let map = Arc::new(config.kind.register_map()?);
            let (latest, _) = watch::channel(None);
            manager.register(config.id, config.endpoint.clone()).await;
            slots.insert(config.id, Slot { config, map, latest });
        }
        Ok(Engine {
            bus,
            manager,
            slots,
            loops: Mutex::new(HashMap::new()),
        })
    }

    pub fn controllers(&self) -> Vec<ControllerId> {
        let mut ids: Vec<_> = self.slots.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn config(&self, id: ControllerId) -> Option<&ControllerConfig> {
        self.slots.get(&id).map(|slot| &slot.config)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityChanged> {
        self.bus.subscribe_connectivity()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<TransitionEvent> {
        self.bus.subscribe_transitions()
    }

    /// Most recent snapshot, if the controller has completed a cycle.
    pub fn snapshot(&self, id: ControllerId) -> Option<Arc<Snapshot>> {
        self.slots.get(&id)?.latest.borrow().clone()
    }

    /// Watch the controller's latest-snapshot channel.
    pub fn watch_snapshots(&self, id: ControllerId) -> Option<SnapshotReceiver> {
        Some(self.slots.get(&id)?.latest.subscribe())
    }

    pub async fn connection_state(&self, id: ControllerId) -> Option<ConnectionState> {
        self.manager.state(id).await
    }

    /// Reason of the controller's last connection failure, if any.
    pub async fn last_error(&self, id: ControllerId) -> Option<String> {
        self.manager.last_error(id).await
    }

    pub async fn connect(&self, id: ControllerId) -> Result<(), ConnectError> {
        self.manager.connect(id).await.map(|_| ())
    }

    pub async fn disconnect(&self, id: ControllerId) {
        self.manager.disconnect(id).await;
    }

    /// Guarded write to one controller.
    pub async fn write(
        &self,
        id: ControllerId,
        request: CommandRequest,
    ) -> Result<(), CommandError> {
        if !self.slots.contains_key(&id) {
            return Err(CommandError::UnknownController(id));
        }
        let client = self
            .manager
            .client(id)
            .await
            .ok_or(CommandError::NotConnected(id))?;
        let latest = self.snapshot(id);
        command::execute(&client, latest.as_deref(), request).await
    }

    /// Composite carriage transfer on the motion controller: pulse the
    /// start coil, then write the command code, the order the
    /// controller's ladder program expects. Guarded by all robot axes
    /// being at rest.
    pub async fn transfer(
        &self,
        id: ControllerId,
        source: Station,
        target: Station,
    ) -> Result<(), CommandError> {
        let code =
            transfer_code(source, target).ok_or(CommandError::InvalidTransfer(source, target))?;
        self.write(
            id,
            CommandRequest {
                address: MOVE_START_COIL,
                value: CommandValue::Coil(true),
                precondition: Precondition::robot_idle(),
            },
        )
        .await?;
        self.write(
            id,
            CommandRequest {
                address: MOVE_CODE_REGISTER,
                value: CommandValue::Register(code),
                precondition: Precondition::None,
            },
        )
        .await
    }

    /// Subsystem entry point: attempt the initial connects, then manage
    /// poll loop lifecycle from connectivity events until shutdown.
    pub async fn run(self: Arc<Self>, subsys: SubsystemHandle) -> Result<(), EngineError> {
        // Subscribe before connecting so no Connected signal is missed.
        let mut rx = self.bus.subscribe_connectivity();
        for id in self.controllers() {
            if let Err(e) = self.connect(id).await {
                log::error!("{}: initial connect failed: {}", id, e);
            }
        }

        tokio::select! {
            _ = subsys.on_shutdown_requested() => {}
            _ = self.dispatch(&mut rx) => {}
        }

        self.shutdown().await;
        Ok(())
    }

    /// Event-loop body, driven directly by tests in place of [`run`](Self::run).
    #[cfg(test)]
    pub(crate) async fn event_loop(&self) {
        let mut rx = self.bus.subscribe_connectivity();
        self.dispatch(&mut rx).await;
    }

    async fn dispatch(&self, rx: &mut broadcast::Receiver<ConnectivityChanged>) {
        loop {
            match rx.recv().await {
                Ok(event) if event.connected => self.restart_loop(event.controller).await,
                Ok(event) => self.stop_loop(event.controller).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("connectivity events lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Cancel the superseded loop (if any) and start the next
    /// generation for this controller.
    async fn restart_loop(&self, id: ControllerId) {
        let Some(slot) = self.slots.get(&id) else {
            return;
        };
        let Some(client) = self.manager.client(id).await else {
            return;
        };

        let mut loops = self.loops.lock().await;
        let generation = match loops.remove(&id) {
            Some(previous) => {
                log::debug!(
                    "{}: superseding poll loop generation {}",
                    id,
                    previous.generation
                );
                previous.cancel.cancel();
                previous.generation + 1
            }
            None => 1,
        };

        // Resume from the last published snapshot so sequence numbering
        // and the carriage code stay continuous across generations.
        let resume = slot.latest.borrow().clone();

        let cancel = CancellationToken::new();
        let poll = PollLoop::new(
            id,
            slot.config.device_index,
            slot.map.clone(),
            client,
            slot.latest.clone(),
            self.bus.clone(),
            resume.as_deref(),
            generation,
        );
        let task = tokio::spawn(poll.run(cancel.clone()));
        loops.insert(
            id,
            LoopHandle {
                generation,
                cancel,
                task,
            },
        );
    }

    async fn stop_loop(&self, id: ControllerId) {
        let handle = self.loops.lock().await.remove(&id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                log::debug!("{}: poll task join error: {}", id, e);
            }
        }
    }

    async fn shutdown(&self) {
        for id in self.controllers() {
            self.stop_loop(id).await;
            self.manager.disconnect(id).await;
        }
        log::debug!("engine stopped");
    }

    #[cfg(test)]
    pub(crate) async fn loop_generation(&self, id: ControllerId) -> Option<u64> {
        Some(self.loops.lock().await.get(&id)?.generation)
    }

    #[cfg(test)]
    pub(crate) async fn loop_count(&self) -> usize {
        self.loops.lock().await.len()
    }
}
