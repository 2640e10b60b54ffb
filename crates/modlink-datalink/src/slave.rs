//! Slave side request processing.
//!
//! Each served channel runs its own task:
//! await a request, check the station, dispatch to the [`SlaveHandler`],
//! write the reply, and repeat until the channel closes. Requests for
//! stations the handler does not accept are dropped without a reply.

use crate::channel::Channel;
use crate::codec::{FrameCodec, Protocol, RequestFrame};
use crate::device::SlaveDevice;
use crate::log::ChannelLog;
use crate::provider::ChannelEvents;
use crate::DataLinkError;
use modlink_core::pdu::{
    ExceptionCode, ModbusRequest, ModbusResponse, ObjectType, Operation, WriteOperation,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use modlink_core::AddressSpaceError;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Largest bit read a slave answers.
pub const MAX_SLAVE_READ_BITS: u16 = 2008;

const ADDRESS_LIMIT: usize = 0x1_0000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ServiceError {
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::Exception(code) => *code,
            Self::InvalidRequest(_) => ExceptionCode::IllegalDataValue,
            Self::Internal(_) => ExceptionCode::SlaveDeviceFailure,
        }
    }
}

impl From<AddressSpaceError> for ServiceError {
    fn from(err: AddressSpaceError) -> Self {
        Self::Exception(err.into())
    }
}

/// Request handling hooks. Every method has a default backed by the
/// station's [`SlaveDevice`]; override the ones that need custom behaviour.
pub trait SlaveHandler: Send + Sync + 'static {
    /// Decides whether a request addressed to `address` is answered.
    /// `registered` lists the stations added to the service.
    fn accept_station(&self, address: u8, registered: &[u8]) -> bool {
        if registered.is_empty() {
            address == 1
        } else {
            registered.contains(&address)
        }
    }

    fn read_coils(
        &self,
        device: &SlaveDevice,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ServiceError> {
        Ok(device.coils.read_bits(address, usize::from(count))?)
    }

    fn read_discrete_inputs(
        &self,
        device: &SlaveDevice,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ServiceError> {
        Ok(device.discrete_inputs.read_bits(address, usize::from(count))?)
    }

    /// Returns raw big-endian register bytes.
    fn read_holding_registers(
        &self,
        device: &SlaveDevice,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, ServiceError> {
        Ok(device.holding_registers.get_data(address, usize::from(count))?)
    }

    fn read_input_registers(
        &self,
        device: &SlaveDevice,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, ServiceError> {
        Ok(device.input_registers.get_data(address, usize::from(count))?)
    }

    fn write_coils(
        &self,
        device: &SlaveDevice,
        address: u16,
        values: &[bool],
    ) -> Result<(), ServiceError> {
        Ok(device.coils.write_bits(address, values)?)
    }

    fn write_registers(
        &self,
        device: &SlaveDevice,
        address: u16,
        values: &[u16],
    ) -> Result<(), ServiceError> {
        Ok(device.holding_registers.write_registers(address, values)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSlaveHandler;

impl SlaveHandler for DefaultSlaveHandler {}

#[derive(Debug, Clone)]
pub struct SlaveConfig {
    pub protocol: Protocol,
    /// How long one decode waits before the loop re-checks the channel.
    pub poll_interval: Duration,
    /// Idle time after which a provider channel is closed.
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            poll_interval: Duration::from_millis(250),
            inactivity_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl SlaveConfig {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_inactivity_timeout(mut self, inactivity_timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = inactivity_timeout;
        self
    }
}

/// What a slave sends back for an accepted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveReply {
    Response(ModbusResponse),
    /// Exception for a frame that never became a request.
    Rejected {
        slave_address: u8,
        transaction_id: u16,
        function: u8,
        exception: ExceptionCode,
    },
}

impl SlaveReply {
    pub fn encode(&self, codec: &dyn FrameCodec) -> Result<Vec<u8>, DataLinkError> {
        match self {
            Self::Response(response) => codec.encode_response(response),
            Self::Rejected {
                slave_address,
                transaction_id,
                function,
                exception,
            } => codec.encode_exception(*slave_address, *transaction_id, *function, *exception),
        }
    }
}

fn check_quantity(address: u16, count: usize, max: u16) -> Result<(), ServiceError> {
    if count == 0 || count > usize::from(max) || usize::from(address) + count > ADDRESS_LIMIT {
        return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
    }
    Ok(())
}

struct SlaveInner<H> {
    config: SlaveConfig,
    handler: H,
    stations: RwLock<BTreeMap<u8, Arc<SlaveDevice>>>,
    default_device: Arc<SlaveDevice>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_task_id: AtomicU64,
}

impl<H: SlaveHandler> SlaveInner<H> {
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn station_addresses(&self) -> Vec<u8> {
        self.stations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn device_for(&self, address: u8) -> Arc<SlaveDevice> {
        self.stations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_device))
    }

    fn process(&self, frame: RequestFrame) -> Option<SlaveReply> {
        let address = frame.slave_address();
        if !self
            .handler
            .accept_station(address, &self.station_addresses())
        {
            debug!(slave = address, "request for unserved station dropped");
            return None;
        }

        let request = match frame {
            RequestFrame::Request(request) => request,
            RequestFrame::Rejected {
                slave_address,
                transaction_id,
                function,
                exception,
            } => {
                return Some(SlaveReply::Rejected {
                    slave_address,
                    transaction_id,
                    function,
                    exception,
                })
            }
        };

        let device = self.device_for(address);
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(&device, &request)));
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!(
                    slave = address,
                    function = %request.function(),
                    error = %err,
                    "request answered with exception"
                );
                ModbusResponse::exception(request, err.exception_code())
            }
            Err(_) => {
                warn!(slave = address, function = %request.function(), "slave handler panicked");
                ModbusResponse::exception(request, ExceptionCode::SlaveDeviceFailure)
            }
        };
        Some(SlaveReply::Response(response))
    }

    fn dispatch(
        &self,
        device: &SlaveDevice,
        request: &ModbusRequest,
    ) -> Result<ModbusResponse, ServiceError> {
        let handler = &self.handler;
        match &request.operation {
            Operation::Read(read) => {
                let max = if read.object.is_bit() {
                    MAX_SLAVE_READ_BITS
                } else {
                    MAX_READ_REGISTERS
                };
                check_quantity(read.address, usize::from(read.length), max)?;

                let expected = usize::from(read.length);
                match read.object {
                    ObjectType::Coil | ObjectType::DiscreteInput => {
                        let values = if read.object == ObjectType::Coil {
                            handler.read_coils(device, read.address, read.length)?
                        } else {
                            handler.read_discrete_inputs(device, read.address, read.length)?
                        };
                        if values.len() != expected {
                            return Err(ServiceError::Internal("handler returned wrong bit count"));
                        }
                        Ok(ModbusResponse::bits(request.clone(), values))
                    }
                    ObjectType::HoldingRegister | ObjectType::InputRegister => {
                        let raw = if read.object == ObjectType::HoldingRegister {
                            handler.read_holding_registers(device, read.address, read.length)?
                        } else {
                            handler.read_input_registers(device, read.address, read.length)?
                        };
                        if raw.len() != expected * 2 {
                            return Err(ServiceError::Internal(
                                "handler returned wrong register byte count",
                            ));
                        }
                        Ok(ModbusResponse::registers(request.clone(), raw))
                    }
                }
            }
            Operation::Write(write) => {
                match write {
                    WriteOperation::SingleCoil { address, value } => {
                        handler.write_coils(device, *address, &[*value])?;
                    }
                    WriteOperation::SingleRegister { address, value } => {
                        handler.write_registers(device, *address, &[*value])?;
                    }
                    WriteOperation::MultipleCoils { address, values } => {
                        check_quantity(*address, values.len(), MAX_WRITE_COILS)?;
                        handler.write_coils(device, *address, values)?;
                    }
                    WriteOperation::MultipleRegisters { address, values } => {
                        check_quantity(*address, values.len(), MAX_WRITE_REGISTERS)?;
                        handler.write_registers(device, *address, values)?;
                    }
                }
                Ok(ModbusResponse::write_ack(request.clone()))
            }
        }
    }
}

/// Answers Modbus requests on any number of channels.
pub struct ModbusSlaveService<H = DefaultSlaveHandler> {
    inner: Arc<SlaveInner<H>>,
}

impl<H> Clone for ModbusSlaveService<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ModbusSlaveService<DefaultSlaveHandler> {
    pub fn new(config: SlaveConfig) -> Self {
        Self::with_handler(config, DefaultSlaveHandler)
    }
}

impl<H: SlaveHandler> ModbusSlaveService<H> {
    pub fn with_handler(config: SlaveConfig, handler: H) -> Self {
        Self {
            inner: Arc::new(SlaveInner {
                config,
                handler,
                stations: RwLock::new(BTreeMap::new()),
                default_device: Arc::new(SlaveDevice::new()),
                tasks: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.inner.config
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Device answering for accepted addresses that have no station of
    /// their own.
    pub fn default_device(&self) -> Arc<SlaveDevice> {
        Arc::clone(&self.inner.default_device)
    }

    /// Returns the station at `address`, creating an empty one if needed.
    pub fn add_station(&self, address: u8) -> Arc<SlaveDevice> {
        let mut stations = self
            .inner
            .stations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stations
                .entry(address)
                .or_insert_with(|| Arc::new(SlaveDevice::new())),
        )
    }

    /// Installs `device` at `address`, replacing any previous station.
    pub fn insert_station(&self, address: u8, device: SlaveDevice) -> Arc<SlaveDevice> {
        let device = Arc::new(device);
        self.inner
            .stations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, Arc::clone(&device));
        device
    }

    pub fn remove_station(&self, address: u8) -> Option<Arc<SlaveDevice>> {
        self.inner
            .stations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address)
    }

    pub fn station(&self, address: u8) -> Option<Arc<SlaveDevice>> {
        self.inner
            .stations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }

    pub fn station_addresses(&self) -> Vec<u8> {
        self.inner.station_addresses()
    }

    /// Validates and dispatches one frame without any I/O. `None` means the
    /// frame is dropped silently.
    pub fn process(&self, frame: RequestFrame) -> Option<SlaveReply> {
        self.inner.process(frame)
    }

    /// Serves `channel` until it closes. Returns the task id.
    pub fn serve_channel(&self, channel: Arc<dyn Channel>) -> u64 {
        self.spawn_channel(channel, None)
    }

    /// Serves every channel a provider creates, closing idle ones after the
    /// configured inactivity timeout.
    pub fn attach(&self, mut events: ChannelEvents) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(channel) = events.next().await {
                service.spawn_channel(channel, service.inner.config.inactivity_timeout);
            }
        })
    }

    pub fn active_channels(&self) -> usize {
        let mut tasks = self.inner.tasks();
        tasks.retain(|_, task| !task.is_finished());
        tasks.len()
    }

    /// Stops every channel task.
    pub fn shutdown(&self) {
        for (task_id, task) in self.inner.tasks().drain() {
            debug!(task_id, "stopping slave channel task");
            task.abort();
        }
    }

    fn spawn_channel(&self, channel: Arc<dyn Channel>, inactivity: Option<Duration>) -> u64 {
        let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        // Hold the table lock so the task cannot deregister before it is
        // registered.
        let mut tasks = self.inner.tasks();
        let task = tokio::spawn(async move {
            run_channel(&inner, channel.as_ref(), inactivity, task_id).await;
            inner.tasks().remove(&task_id);
        });
        tasks.insert(task_id, task);
        task_id
    }
}

async fn run_channel<H: SlaveHandler>(
    inner: &SlaveInner<H>,
    channel: &dyn Channel,
    inactivity: Option<Duration>,
    task_id: u64,
) {
    let description = channel.description().to_string();
    let mut codec = inner.config.protocol.codec();
    let mut last_activity = Instant::now();
    debug!(task_id, channel = %description, "slave channel started");

    loop {
        if channel.is_disposed() {
            break;
        }
        if inactivity.is_some_and(|limit| last_activity.elapsed() >= limit) {
            debug!(task_id, channel = %description, "closing idle slave channel");
            channel.dispose().await;
            break;
        }

        let frame = match codec
            .decode_request(channel, inner.config.poll_interval)
            .await
        {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(DataLinkError::ConnectionClosed) => break,
            Err(err) => {
                warn!(task_id, channel = %description, error = %err, "slave channel failed");
                break;
            }
        };
        last_activity = Instant::now();

        if let RequestFrame::Request(request) = &frame {
            channel.logger().log(ChannelLog::Request {
                channel: description.clone(),
                request: request.clone(),
                frame: codec.encode_request(request).unwrap_or_default(),
            });
        }

        let Some(reply) = inner.process(frame) else {
            continue;
        };
        let bytes = match reply.encode(codec.as_ref()) {
            Ok(bytes) => bytes,
            Err(err) => {
                channel.logger().log(ChannelLog::Error {
                    channel: description.clone(),
                    message: format!("failed to encode slave reply: {err}"),
                    received: Vec::new(),
                });
                continue;
            }
        };
        if let Err(err) = channel.write(&bytes).await {
            warn!(task_id, channel = %description, error = %err, "slave reply write failed");
            break;
        }

        match reply {
            SlaveReply::Response(response) => channel.logger().log(ChannelLog::Response {
                channel: description.clone(),
                response,
            }),
            SlaveReply::Rejected {
                function,
                exception,
                ..
            } => channel.logger().log(ChannelLog::Error {
                channel: description.clone(),
                message: format!("rejected function 0x{function:02X}: {exception}"),
                received: Vec::new(),
            }),
        }
    }
    debug!(task_id, channel = %description, "slave channel stopped");
}

#[cfg(test)]
mod tests {
    use super::{ModbusSlaveService, ServiceError, SlaveConfig, SlaveHandler, SlaveReply};
    use crate::codec::RequestFrame;
    use crate::device::SlaveDevice;
    use modlink_core::pdu::{ExceptionCode, ModbusRequest, ObjectType, ResponseBody, WriteOperation};

    fn response_body(reply: Option<SlaveReply>) -> ResponseBody {
        match reply {
            Some(SlaveReply::Response(response)) => response.into_body(),
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn read(slave: u8, object: ObjectType, address: u16, length: u16) -> RequestFrame {
        RequestFrame::Request(ModbusRequest::read(slave, object, address, length))
    }

    #[test]
    fn default_station_filter() {
        let service = ModbusSlaveService::new(SlaveConfig::default());
        service
            .default_device()
            .holding_registers
            .write_registers(0, &[5])
            .unwrap();

        assert_eq!(
            response_body(service.process(read(1, ObjectType::HoldingRegister, 0, 1))),
            ResponseBody::Registers(vec![0x00, 0x05])
        );
        assert!(service
            .process(read(2, ObjectType::HoldingRegister, 0, 1))
            .is_none());

        service.add_station(2);
        assert!(service
            .process(read(1, ObjectType::HoldingRegister, 0, 1))
            .is_none());
        assert_eq!(service.station_addresses(), vec![2]);
    }

    #[test]
    fn bounds_are_checked_before_dispatch() {
        let service = ModbusSlaveService::new(SlaveConfig::default());
        service.default_device().coils.allocate(0, 3000).unwrap();

        assert!(matches!(
            response_body(service.process(read(1, ObjectType::Coil, 0, 2008))),
            ResponseBody::Bits(values) if values.len() == 2008
        ));
        assert_eq!(
            response_body(service.process(read(1, ObjectType::Coil, 0, 2009))),
            ResponseBody::Exception(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            response_body(service.process(read(1, ObjectType::InputRegister, 0, 126))),
            ResponseBody::Exception(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            response_body(service.process(read(1, ObjectType::HoldingRegister, 0xFFFF, 2))),
            ResponseBody::Exception(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn writes_land_in_the_station_device() {
        let service = ModbusSlaveService::new(SlaveConfig::default());
        let device = service.add_station(7);
        let request = ModbusRequest::write(
            7,
            WriteOperation::MultipleRegisters {
                address: 10,
                values: vec![1, 2],
            },
        );
        assert_eq!(
            response_body(service.process(RequestFrame::Request(request))),
            ResponseBody::WriteAck
        );
        assert_eq!(device.holding_registers.read_registers(10, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn disabled_auto_allocation_rejects_new_addresses() {
        let service = ModbusSlaveService::new(SlaveConfig::default());
        let device = service.insert_station(1, SlaveDevice::with_auto_allocation(false));
        let request = ModbusRequest::write(
            1,
            WriteOperation::SingleRegister {
                address: 40,
                value: 1,
            },
        );
        assert_eq!(
            response_body(service.process(RequestFrame::Request(request))),
            ResponseBody::Exception(ExceptionCode::IllegalDataAddress)
        );
        assert!(device.holding_registers.is_empty());
    }

    struct Faulty;

    impl SlaveHandler for Faulty {
        fn read_coils(
            &self,
            _device: &SlaveDevice,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<bool>, ServiceError> {
            panic!("coil bank unavailable");
        }

        fn read_input_registers(
            &self,
            _device: &SlaveDevice,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<u8>, ServiceError> {
            Err(ServiceError::InvalidRequest("unsupported range"))
        }

        fn read_holding_registers(
            &self,
            _device: &SlaveDevice,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<u8>, ServiceError> {
            Ok(vec![0x00])
        }
    }

    #[test]
    fn handler_faults_map_to_exceptions() {
        let service = ModbusSlaveService::with_handler(SlaveConfig::default(), Faulty);
        assert_eq!(
            response_body(service.process(read(1, ObjectType::Coil, 0, 1))),
            ResponseBody::Exception(ExceptionCode::SlaveDeviceFailure)
        );
        assert_eq!(
            response_body(service.process(read(1, ObjectType::InputRegister, 0, 1))),
            ResponseBody::Exception(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            response_body(service.process(read(1, ObjectType::HoldingRegister, 0, 1))),
            ResponseBody::Exception(ExceptionCode::SlaveDeviceFailure)
        );
    }

    #[test]
    fn rejected_frames_are_answered_for_accepted_stations() {
        let service = ModbusSlaveService::new(SlaveConfig::default());
        let frame = RequestFrame::Rejected {
            slave_address: 1,
            transaction_id: 4,
            function: 0x2B,
            exception: ExceptionCode::IllegalFunction,
        };
        assert!(matches!(
            service.process(frame),
            Some(SlaveReply::Rejected {
                exception: ExceptionCode::IllegalFunction,
                ..
            })
        ));
    }
}
