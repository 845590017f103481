//! Fornax server: the acquisition engine of the furnace-line gateway.
//!
//! One persistent Modbus TCP connection per controller, one poll loop per
//! controller at a fixed 100 ms cadence, decoded snapshots published over
//! watch channels, carriage transition events and connectivity changes
//! fanned out over broadcast channels, and a precondition-guarded write
//! path sharing each connection with its poll loop.
//!
//! The [`engine::Engine`] is the explicit registry tying these together;
//! it is built once at startup from [`settings::Settings`] and passed by
//! reference to everything that needs it.

pub mod client;
pub mod command;
pub mod connection;
pub mod engine;
pub mod events;
pub mod poll;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{IoError, ModbusIo, RegisterIo, SharedClient};
pub use command::{CommandError, CommandRequest, CommandValue, Precondition, Station};
pub use connection::{ConnectError, ConnectionManager, ConnectionState, ControllerEndpoint};
pub use engine::{ControllerConfig, Engine, EngineError};
pub use events::{ConnectivityChanged, EventBus};
pub use settings::{Settings, SettingsError};
