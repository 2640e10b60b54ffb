use crate::{MasterConfig, MasterError, ModbusMaster};
use modlink_core::pdu::{ModbusRequest, ModbusResponse};
use modlink_core::{ModbusEndian, RegisterValue};
use modlink_datalink::{Channel, Protocol};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;

#[derive(Debug, Error)]
pub enum SyncMasterError {
    #[error("runtime init error: {0}")]
    RuntimeInit(std::io::Error),
    #[error(transparent)]
    Master(#[from] MasterError),
}

/// Blocking [`ModbusMaster`] that drives its own runtime.
pub struct SyncModbusMaster {
    runtime: Runtime,
    master: ModbusMaster,
}

fn runtime() -> Result<Runtime, SyncMasterError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map_err(SyncMasterError::RuntimeInit)
}

impl SyncModbusMaster {
    pub fn connect_tcp(addr: &str, config: MasterConfig) -> Result<Self, SyncMasterError> {
        let runtime = runtime()?;
        let master = runtime.block_on(ModbusMaster::connect_tcp(addr, config))?;
        Ok(Self { runtime, master })
    }

    /// Builds a master over a channel created by `open` inside the owned
    /// runtime.
    pub fn with_channel<F>(
        open: F,
        protocol: Protocol,
        config: MasterConfig,
    ) -> Result<Self, SyncMasterError>
    where
        F: FnOnce() -> Result<Arc<dyn Channel>, MasterError>,
    {
        let runtime = runtime()?;
        let master = {
            let _guard = runtime.enter();
            ModbusMaster::with_config(open()?, protocol, config)
        };
        Ok(Self { runtime, master })
    }

    pub fn config(&self) -> MasterConfig {
        self.master.config()
    }

    pub fn request(&self, request: ModbusRequest) -> Result<ModbusResponse, SyncMasterError> {
        Ok(self.runtime.block_on(self.master.request(request))?)
    }

    pub fn read_coils(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.read_coils(slave, address, count))?)
    }

    pub fn read_discrete_inputs(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.read_discrete_inputs(slave, address, count))?)
    }

    pub fn read_holding_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.read_holding_registers(slave, address, count))?)
    }

    pub fn read_input_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.read_input_registers(slave, address, count))?)
    }

    pub fn read_holding_value<T: RegisterValue>(
        &self,
        slave: u8,
        address: u16,
        endian: ModbusEndian,
    ) -> Result<T, SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.read_holding_value(slave, address, endian))?)
    }

    pub fn write_single_coil(
        &self,
        slave: u8,
        address: u16,
        value: bool,
    ) -> Result<(), SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.write_single_coil(slave, address, value))?)
    }

    pub fn write_multiple_coils(
        &self,
        slave: u8,
        address: u16,
        values: &[bool],
    ) -> Result<(), SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.write_multiple_coils(slave, address, values))?)
    }

    pub fn write_single_register(
        &self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.write_single_register(slave, address, value))?)
    }

    pub fn write_multiple_registers(
        &self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.write_multiple_registers(slave, address, values))?)
    }

    pub fn write_holding_value<T: RegisterValue>(
        &self,
        slave: u8,
        address: u16,
        value: T,
        endian: ModbusEndian,
    ) -> Result<(), SyncMasterError> {
        Ok(self
            .runtime
            .block_on(self.master.write_holding_value(slave, address, value, endian))?)
    }

    pub fn close(&self) {
        self.runtime.block_on(self.master.close());
    }
}
