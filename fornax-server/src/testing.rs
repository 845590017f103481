//! Scripted register I/O for tests.
//!
//! `MockIo` answers reads from in-memory coil/register tables, records
//! every operation in order and can fail selected reads by index, which
//! is enough to script partial-cycle failures and to assert frame
//! ordering on the shared connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fornax_core::decode::encode_f32;
use fornax_core::decode::encode_i32;

use crate::client::{IoError, RegisterIo, SharedClient};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    ReadCoils(u16, u16),
    ReadRegisters(u16, u16),
    WriteCoil(u16, bool),
    WriteRegister(u16, u16),
    WriteRegisters(u16, Vec<u16>),
}

#[derive(Default)]
pub struct MockState {
    coils: Mutex<HashMap<u16, bool>>,
    registers: Mutex<HashMap<u16, u16>>,
    ops: Mutex<Vec<RecordedOp>>,
    fail_reads: Mutex<HashSet<usize>>,
    reads: AtomicUsize,
}

impl MockState {
    pub fn set_coil(&self, address: u16, value: bool) {
        self.coils.lock().unwrap().insert(address, value);
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    pub fn set_i32(&self, address: u16, value: i32) {
        let [high, low] = encode_i32(value);
        self.set_register(address, high);
        self.set_register(address + 1, low);
    }

    pub fn set_f32(&self, address: u16, value: f32) {
        let [high, low] = encode_f32(value);
        self.set_register(address, high);
        self.set_register(address + 1, low);
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.coils.lock().unwrap().get(&address).copied()
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.registers.lock().unwrap().get(&address).copied()
    }

    /// Make the n-th read call (0-based, coils and registers combined)
    /// fail once with a timeout.
    pub fn fail_read(&self, index: usize) {
        self.fail_reads.lock().unwrap().insert(index);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn next_read(&self) -> Result<(), IoError> {
        let index = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.lock().unwrap().remove(&index) {
            Err(IoError::Timeout)
        } else {
            Ok(())
        }
    }
}

pub struct MockIo {
    state: Arc<MockState>,
}

impl MockIo {
    pub fn new(state: Arc<MockState>) -> Self {
        MockIo { state }
    }
}

#[async_trait]
impl RegisterIo for MockIo {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, IoError> {
        self.state.record(RecordedOp::ReadCoils(address, count));
        self.state.next_read()?;
        let coils = self.state.coils.lock().unwrap();
        Ok((address..address + count)
            .map(|a| coils.get(&a).copied().unwrap_or(false))
            .collect())
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, IoError> {
        self.state.record(RecordedOp::ReadRegisters(address, count));
        self.state.next_read()?;
        let registers = self.state.registers.lock().unwrap();
        Ok((address..address + count)
            .map(|a| registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), IoError> {
        self.state.record(RecordedOp::WriteCoil(address, value));
        self.state.set_coil(address, value);
        Ok(())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), IoError> {
        self.state.record(RecordedOp::WriteRegister(address, value));
        self.state.set_register(address, value);
        Ok(())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), IoError> {
        self.state
            .record(RecordedOp::WriteRegisters(address, values.to_vec()));
        let mut registers = self.state.registers.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            registers.insert(address + i as u16, *value);
        }
        Ok(())
    }
}

/// Shared client over a fresh mock, for wiring into poll loops.
pub fn motion_client(state: Arc<MockState>) -> SharedClient {
    SharedClient::new(Box::new(MockIo::new(state)))
}
