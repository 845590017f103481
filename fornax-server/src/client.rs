//! Register-level I/O over one persistent connection.
//!
//! [`RegisterIo`] is the seam between the engine and the wire protocol:
//! the production implementation is [`ModbusIo`] over a tokio-modbus TCP
//! context, tests substitute a scripted fake.
//!
//! [`SharedClient`] wraps the connection in an async mutex. Modbus has no
//! pipelining, so requests on one connection must be strictly serialized;
//! the poll loop additionally holds the lock for a whole read cycle, which
//! keeps command writes from interleaving mid-cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use fornax_core::decode::{decode_field, RawField};
use fornax_core::registers::FieldKind;
use fornax_core::{CoreError, Value};

/// I/O failure on the connection.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("request timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] std::io::Error),
}

/// Failure to read and decode one field.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Decode(#[from] CoreError),
}

/// One register-addressable endpoint.
///
/// Mirrors the operations the gateway needs: read coils, read holding
/// registers, write a single coil, write single/multiple registers.
#[async_trait]
pub trait RegisterIo: Send {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, IoError>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, IoError>;

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), IoError>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), IoError>;

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), IoError>;

    /// Release the underlying transport. Further calls will fail.
    async fn close(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

/// Read and decode one mapped field at an absolute address.
pub async fn read_field(
    io: &mut dyn RegisterIo,
    kind: FieldKind,
    address: u16,
) -> Result<Value, ReadError> {
    let value = if kind.is_coil() {
        let bits = io.read_coils(address, kind.span()).await?;
        decode_field(kind, RawField::Coils(&bits))?
    } else {
        let words = io.read_holding_registers(address, kind.span()).await?;
        decode_field(kind, RawField::Registers(&words))?
    };
    Ok(value)
}

/// Modbus TCP implementation of [`RegisterIo`].
///
/// Every request is bounded by the endpoint's receive timeout; an elapsed
/// timer surfaces as [`IoError::Timeout`] and the caller decides whether
/// the connection is still usable.
pub struct ModbusIo {
    ctx: Context,
    receive_timeout: Duration,
}

impl ModbusIo {
    /// Open a connection, bounded by `connect_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        unit: u8,
        connect_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<Self, IoError> {
        let ctx = timeout(connect_timeout, tcp::connect_slave(addr, Slave(unit)))
            .await
            .map_err(|_| IoError::Timeout)??;
        Ok(ModbusIo {
            ctx,
            receive_timeout,
        })
    }
}

#[async_trait]
impl RegisterIo for ModbusIo {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, IoError> {
        let bits = timeout(self.receive_timeout, self.ctx.read_coils(address, count))
            .await
            .map_err(|_| IoError::Timeout)??;
        Ok(bits)
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, IoError> {
        let words = timeout(
            self.receive_timeout,
            self.ctx.read_holding_registers(address, count),
        )
        .await
        .map_err(|_| IoError::Timeout)??;
        Ok(words)
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), IoError> {
        timeout(self.receive_timeout, self.ctx.write_single_coil(address, value))
            .await
            .map_err(|_| IoError::Timeout)??;
        Ok(())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), IoError> {
        timeout(
            self.receive_timeout,
            self.ctx.write_single_register(address, value),
        )
        .await
        .map_err(|_| IoError::Timeout)??;
        Ok(())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), IoError> {
        timeout(
            self.receive_timeout,
            self.ctx.write_multiple_registers(address, values),
        )
        .await
        .map_err(|_| IoError::Timeout)??;
        Ok(())
    }

    // close(): the default is enough; dropping the context closes the
    // TCP stream.
}

/// The per-controller connection shared by the poll path and the command
/// path.
///
/// The mutex is the serialization point the protocol requires: one
/// request/response in flight per connection. The poll loop takes the
/// lock once per cycle, so a queued write goes out between cycles, never
/// between two reads of the same cycle.
#[derive(Clone)]
pub struct SharedClient {
    io: Arc<Mutex<Box<dyn RegisterIo>>>,
}

impl SharedClient {
    pub fn new(io: Box<dyn RegisterIo>) -> Self {
        SharedClient {
            io: Arc::new(Mutex::new(io)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn RegisterIo>> {
        self.io.lock().await
    }
}
