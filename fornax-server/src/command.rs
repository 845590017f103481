//! Guarded command writes.
//!
//! Every write carries a [`Precondition`] that is evaluated against the
//! most recent snapshot BEFORE the connection is touched: a violated
//! guard rejects the command locally and no protocol frame is ever
//! issued. Writes share the connection mutex with the poll loop, so a
//! command queued during a read cycle goes out between cycles.

use thiserror::Error;

use fornax_core::registers::fields;
use fornax_core::{ControllerId, Snapshot};

use crate::client::{IoError, SharedClient};

/// Command-block addresses on the motion controller.
pub const MOVE_START_COIL: u16 = 442;
pub const MOVE_CODE_REGISTER: u16 = 443;

/// Value carried by a write command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Coil(bool),
    Register(u16),
    Registers(Vec<u16>),
}

/// Condition that must hold in the latest snapshot for a write to pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    None,
    /// Every named speed field must currently read zero.
    AxesIdle(Vec<&'static str>),
}

impl Precondition {
    /// All robot axes at rest.
    pub fn robot_idle() -> Self {
        Precondition::AxesIdle(vec![
            fields::ROBOT_HORIZONTAL1_SPEED,
            fields::ROBOT_HORIZONTAL2_SPEED,
            fields::ROBOT_VERTICAL_SPEED,
        ])
    }

    /// Both clamp axes at rest.
    pub fn clamp_idle() -> Self {
        Precondition::AxesIdle(vec![
            fields::CLAMP_HORIZONTAL_SPEED,
            fields::CLAMP_VERTICAL_SPEED,
        ])
    }

    /// Check against the latest snapshot; `Err` carries the reason. A
    /// guard other than `None` fails when no snapshot exists yet - there
    /// is no state to prove it holds.
    pub fn check(&self, snapshot: Option<&Snapshot>) -> Result<(), String> {
        match self {
            Precondition::None => Ok(()),
            Precondition::AxesIdle(names) => {
                let Some(snapshot) = snapshot else {
                    return Err("no snapshot available yet".to_string());
                };
                for name in names {
                    match snapshot.i32_value(name) {
                        Some(0) => {}
                        Some(speed) => {
                            return Err(format!("axis {name} is moving (speed {speed})"));
                        }
                        None => {
                            return Err(format!("axis field {name} missing from snapshot"));
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// One discrete write, destroyed after acknowledgment or rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub address: u16,
    pub value: CommandValue,
    pub precondition: Precondition,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("write rejected: {0}")]
    GuardRejected(String),

    #[error("controller {0} is not connected")]
    NotConnected(ControllerId),

    #[error("unknown controller {0}")]
    UnknownController(ControllerId),

    #[error("stations {0:?} and {1:?} have no transfer code")]
    InvalidTransfer(Station, Station),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Evaluate the guard and, if it passes, issue the write on the shared
/// connection.
pub(crate) async fn execute(
    client: &SharedClient,
    latest: Option<&Snapshot>,
    request: CommandRequest,
) -> Result<(), CommandError> {
    request
        .precondition
        .check(latest)
        .map_err(CommandError::GuardRejected)?;

    let mut io = client.lock().await;
    match &request.value {
        CommandValue::Coil(value) => io.write_coil(request.address, *value).await?,
        CommandValue::Register(value) => io.write_register(request.address, *value).await?,
        CommandValue::Registers(values) => io.write_registers(request.address, values).await?,
    }
    Ok(())
}

/// Stations a carriage transfer can move material between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Station {
    Carriage,
    Storage1,
    Storage2,
    Paddle,
}

/// Command code the motion controller expects for a source/target pair.
/// Same-station pairs have no code.
pub fn transfer_code(source: Station, target: Station) -> Option<u16> {
    use Station::*;
    let code = match (source, target) {
        (Carriage, Storage1) => 1,
        (Carriage, Storage2) => 2,
        (Carriage, Paddle) => 3,
        (Storage1, Carriage) => 4,
        (Storage1, Storage2) => 5,
        (Storage1, Paddle) => 6,
        (Storage2, Carriage) => 7,
        (Storage2, Storage1) => 8,
        (Storage2, Paddle) => 9,
        (Paddle, Carriage) => 10,
        (Paddle, Storage1) => 11,
        (Paddle, Storage2) => 12,
        _ => return None,
    };
    Some(code)
}
