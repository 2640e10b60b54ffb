//! Modbus master.
//!
//! [`ModbusMaster`] sends [`ModbusRequest`]s over any [`Channel`]. RTU and
//! ASCII links carry one request at a time. TCP links correlate replies by
//! transaction id through a background reader, so concurrent callers share
//! one connection.

#![forbid(unsafe_code)]

pub mod sync;
mod tcp;

pub use sync::{SyncMasterError, SyncModbusMaster};

use modlink_core::pdu::{
    CommError, ExceptionCode, FunctionCode, ModbusRequest, ModbusResponse, ObjectType,
    ResponseBody, WriteOperation,
};
use modlink_core::{EncodeError, ModbusEndian, RegisterValue};
use modlink_datalink::log::Hex;
use modlink_datalink::{Channel, ChannelLog, DataLinkError, FrameCodec, Protocol, TcpChannel};
use std::sync::Arc;
use std::time::Duration;
use tcp::TcpLink;
use thiserror::Error;
use tokio::net::ToSocketAddrs;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct MasterConfig {
    /// Bound on the wait for one reply.
    pub response_timeout: Duration,
    /// Report exception replies as [`MasterError::Exception`] instead of
    /// returning them as data.
    pub exception_as_error: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            exception_as_error: true,
        }
    }
}

impl MasterConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_exception_as_error(mut self, exception_as_error: bool) -> Self {
        self.exception_as_error = exception_as_error;
        self
    }
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("datalink error: {0}")]
    DataLink(DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("modbus exception {code} for {function}")]
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },
    #[error("communication error: {0}")]
    Communication(CommError),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

impl From<DataLinkError> for MasterError {
    fn from(err: DataLinkError) -> Self {
        match err {
            DataLinkError::Encode(err) => Self::Encode(err),
            other => Self::DataLink(other),
        }
    }
}

/// Reports the outcome of one exchange after its request record.
pub(crate) fn log_outcome(channel: &dyn Channel, outcome: &Result<ModbusResponse, DataLinkError>) {
    let description = channel.description().to_string();
    let record = match outcome {
        Ok(response) => match response.comm_error() {
            Some(err) => ChannelLog::Error {
                channel: description,
                message: err.code.to_string(),
                received: err.received.clone(),
            },
            None => ChannelLog::Response {
                channel: description,
                response: response.clone(),
            },
        },
        Err(err) => ChannelLog::Error {
            channel: description,
            message: err.to_string(),
            received: Vec::new(),
        },
    };
    channel.logger().log(record);
}

pub(crate) fn log_request(channel: &dyn Channel, request: &ModbusRequest, frame: &[u8]) {
    channel.logger().log(ChannelLog::Request {
        channel: channel.description().to_string(),
        request: request.clone(),
        frame: frame.to_vec(),
    });
}

/// One request in flight; the lock covers the whole exchange.
struct SerialLink {
    channel: Arc<dyn Channel>,
    codec: Mutex<Box<dyn FrameCodec>>,
}

impl SerialLink {
    async fn exchange(
        &self,
        request: ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError> {
        let channel = self.channel.as_ref();
        let mut codec = self.codec.lock().await;
        let frame = codec.encode_request(&request)?;

        let stale = channel.read_all_remaining().await?;
        if !stale.is_empty() {
            debug!(channel = %channel.description(), stale = %Hex(&stale), "flushed stale bytes");
            channel.logger().log(ChannelLog::Unrecognized {
                channel: channel.description().to_string(),
                bytes: stale,
            });
        }

        log_request(channel, &request, &frame);
        let outcome = match channel.write(&frame).await {
            Ok(()) => codec.decode_response(channel, &request, timeout).await,
            Err(err) => Err(err),
        };
        log_outcome(channel, &outcome);
        outcome
    }
}

enum Link {
    Serial(SerialLink),
    Tcp(TcpLink),
}

pub struct ModbusMaster {
    link: Link,
    channel: Arc<dyn Channel>,
    protocol: Protocol,
    config: MasterConfig,
}

impl ModbusMaster {
    /// Wraps `channel`. TCP masters spawn their reader task, so this must run
    /// inside a tokio runtime.
    pub fn new(channel: Arc<dyn Channel>, protocol: Protocol) -> Self {
        Self::with_config(channel, protocol, MasterConfig::default())
    }

    pub fn with_config(
        channel: Arc<dyn Channel>,
        protocol: Protocol,
        config: MasterConfig,
    ) -> Self {
        let link = match protocol {
            Protocol::Tcp => Link::Tcp(TcpLink::start(
                Arc::clone(&channel),
                config.response_timeout,
            )),
            Protocol::Rtu | Protocol::Ascii => Link::Serial(SerialLink {
                channel: Arc::clone(&channel),
                codec: Mutex::new(protocol.codec()),
            }),
        };
        Self {
            link,
            channel,
            protocol,
            config,
        }
    }

    pub async fn connect_tcp<A: ToSocketAddrs>(
        addr: A,
        config: MasterConfig,
    ) -> Result<Self, MasterError> {
        let channel = TcpChannel::connect(addr).await?;
        Ok(Self::with_config(Arc::new(channel), Protocol::Tcp, config))
    }

    #[cfg(feature = "serial")]
    pub fn open_serial(
        path: &str,
        baud_rate: u32,
        serial: &modlink_datalink::SerialConfig,
        protocol: Protocol,
        config: MasterConfig,
    ) -> Result<Self, MasterError> {
        let channel = modlink_datalink::serial::open(path, baud_rate, serial)?;
        Ok(Self::with_config(Arc::new(channel), protocol, config))
    }

    pub fn config(&self) -> MasterConfig {
        self.config
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Sends `request` and waits for its reply.
    ///
    /// Communication errors are never retried. On TCP the transaction id is
    /// assigned here and any value set on `request` is replaced.
    pub async fn request(&self, request: ModbusRequest) -> Result<ModbusResponse, MasterError> {
        let timeout = self.config.response_timeout;
        let response = match &self.link {
            Link::Serial(link) => link.exchange(request, timeout).await?,
            Link::Tcp(link) => link.exchange(request, timeout).await?,
        };

        match response.body() {
            ResponseBody::Exception(code) if self.config.exception_as_error => {
                Err(MasterError::Exception {
                    function: response.request().function(),
                    code: *code,
                })
            }
            ResponseBody::CommError(err) => Err(MasterError::Communication(err.clone())),
            _ => Ok(response),
        }
    }

    /// Closes the channel. Pending TCP callers fail with
    /// [`DataLinkError::ConnectionClosed`].
    pub async fn close(&self) {
        self.channel.dispose().await;
        if let Link::Tcp(link) = &self.link {
            link.shutdown();
        }
    }

    async fn request_data(&self, request: ModbusRequest) -> Result<ResponseBody, MasterError> {
        let function = request.function();
        let body = self.request(request).await?.into_body();
        match body {
            ResponseBody::Exception(code) => Err(MasterError::Exception { function, code }),
            other => Ok(other),
        }
    }

    async fn read_bits(
        &self,
        slave: u8,
        object: ObjectType,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, MasterError> {
        match self
            .request_data(ModbusRequest::read(slave, object, address, count))
            .await?
        {
            ResponseBody::Bits(values) => Ok(values),
            _ => Err(MasterError::UnexpectedResponse("expected bit values")),
        }
    }

    async fn read_register_bytes(
        &self,
        slave: u8,
        object: ObjectType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, MasterError> {
        match self
            .request_data(ModbusRequest::read(slave, object, address, count))
            .await?
        {
            ResponseBody::Registers(raw) => Ok(raw),
            _ => Err(MasterError::UnexpectedResponse("expected register values")),
        }
    }

    async fn read_registers(
        &self,
        slave: u8,
        object: ObjectType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, MasterError> {
        let raw = self.read_register_bytes(slave, object, address, count).await?;
        Ok(raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    async fn read_value<T: RegisterValue>(
        &self,
        slave: u8,
        object: ObjectType,
        address: u16,
        endian: ModbusEndian,
    ) -> Result<T, MasterError> {
        let count = u16::try_from(T::REGISTERS).map_err(|_| EncodeError::ValueOutOfRange)?;
        let raw = self.read_register_bytes(slave, object, address, count).await?;
        T::from_wire(&raw, endian).ok_or(MasterError::UnexpectedResponse(
            "register count does not fit the value type",
        ))
    }

    async fn write(&self, slave: u8, operation: WriteOperation) -> Result<(), MasterError> {
        match self
            .request_data(ModbusRequest::write(slave, operation))
            .await?
        {
            ResponseBody::WriteAck => Ok(()),
            _ => Err(MasterError::UnexpectedResponse("expected write echo")),
        }
    }

    pub async fn read_coils(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, MasterError> {
        self.read_bits(slave, ObjectType::Coil, address, count).await
    }

    pub async fn read_discrete_inputs(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, MasterError> {
        self.read_bits(slave, ObjectType::DiscreteInput, address, count)
            .await
    }

    pub async fn read_holding_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, MasterError> {
        self.read_registers(slave, ObjectType::HoldingRegister, address, count)
            .await
    }

    pub async fn read_input_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, MasterError> {
        self.read_registers(slave, ObjectType::InputRegister, address, count)
            .await
    }

    /// Reads `T::REGISTERS` holding registers starting at `address` as one
    /// value laid out in `endian`.
    pub async fn read_holding_value<T: RegisterValue>(
        &self,
        slave: u8,
        address: u16,
        endian: ModbusEndian,
    ) -> Result<T, MasterError> {
        self.read_value(slave, ObjectType::HoldingRegister, address, endian)
            .await
    }

    pub async fn read_input_value<T: RegisterValue>(
        &self,
        slave: u8,
        address: u16,
        endian: ModbusEndian,
    ) -> Result<T, MasterError> {
        self.read_value(slave, ObjectType::InputRegister, address, endian)
            .await
    }

    pub async fn write_single_coil(
        &self,
        slave: u8,
        address: u16,
        value: bool,
    ) -> Result<(), MasterError> {
        self.write(slave, WriteOperation::SingleCoil { address, value })
            .await
    }

    pub async fn write_multiple_coils(
        &self,
        slave: u8,
        address: u16,
        values: &[bool],
    ) -> Result<(), MasterError> {
        self.write(
            slave,
            WriteOperation::MultipleCoils {
                address,
                values: values.to_vec(),
            },
        )
        .await
    }

    pub async fn write_single_register(
        &self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), MasterError> {
        self.write(slave, WriteOperation::SingleRegister { address, value })
            .await
    }

    pub async fn write_multiple_registers(
        &self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> Result<(), MasterError> {
        self.write(
            slave,
            WriteOperation::MultipleRegisters {
                address,
                values: values.to_vec(),
            },
        )
        .await
    }

    /// Writes `value` over `T::REGISTERS` holding registers.
    pub async fn write_holding_value<T: RegisterValue>(
        &self,
        slave: u8,
        address: u16,
        value: T,
        endian: ModbusEndian,
    ) -> Result<(), MasterError> {
        let values: Vec<u16> = value
            .to_wire(endian)
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        self.write_multiple_registers(slave, address, &values).await
    }
}

#[cfg(test)]
mod tests {
    use super::{MasterConfig, MasterError, ModbusMaster};
    use modlink_core::pdu::{CommErrorCode, ExceptionCode, ModbusRequest, ObjectType};
    use modlink_core::ModbusEndian;
    use modlink_datalink::{ChannelLog, ChannelLogger, Protocol, StreamChannel};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ChannelLog>>);

    impl ChannelLogger for Recorder {
        fn log(&self, record: ChannelLog) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn rtu_master(config: MasterConfig) -> (ModbusMaster, DuplexStream, Arc<Recorder>) {
        let (near, far) = tokio::io::duplex(512);
        let recorder = Arc::new(Recorder::default());
        let channel = StreamChannel::new(near, "duplex").with_logger(recorder.clone());
        (
            ModbusMaster::with_config(Arc::new(channel), Protocol::Rtu, config),
            far,
            recorder,
        )
    }

    async fn expect_request(peer: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn exception_is_an_error_by_default() {
        let (master, mut peer, _) = rtu_master(MasterConfig::default());
        let slave = tokio::spawn(async move {
            expect_request(&mut peer, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]).await;
            peer.write_all(&[0x01, 0x83, 0x02, 0xC0, 0xF1]).await.unwrap();
            peer
        });

        let err = master.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(
            err,
            MasterError::Exception {
                code: ExceptionCode::IllegalDataAddress,
                ..
            }
        ));
        slave.await.unwrap();
    }

    #[tokio::test]
    async fn exception_can_be_returned_as_data() {
        let config = MasterConfig::default().with_exception_as_error(false);
        let (master, mut peer, _) = rtu_master(config);
        let slave = tokio::spawn(async move {
            expect_request(&mut peer, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]).await;
            peer.write_all(&[0x01, 0x83, 0x02, 0xC0, 0xF1]).await.unwrap();
            peer
        });

        let response = master
            .request(ModbusRequest::read(1, ObjectType::HoldingRegister, 0, 1))
            .await
            .unwrap();
        assert_eq!(
            response.exception_code(),
            Some(ExceptionCode::IllegalDataAddress)
        );
        slave.await.unwrap();
    }

    #[tokio::test]
    async fn stale_bytes_are_flushed_and_logged() {
        let (master, mut peer, recorder) = rtu_master(MasterConfig::default());
        peer.write_all(&[0xAA, 0xBB]).await.unwrap();
        tokio::task::yield_now().await;

        let slave = tokio::spawn(async move {
            expect_request(&mut peer, &[0x01, 0x05, 0x00, 0x03, 0xFF, 0x00, 0x7C, 0x3A]).await;
            peer.write_all(&[0x01, 0x05, 0x00, 0x03, 0xFF, 0x00, 0x7C, 0x3A])
                .await
                .unwrap();
            peer
        });
        master.write_single_coil(1, 3, true).await.unwrap();
        slave.await.unwrap();

        let records = recorder.0.lock().unwrap();
        assert!(matches!(
            &records[0],
            ChannelLog::Unrecognized { bytes, .. } if bytes == &[0xAA, 0xBB]
        ));
        assert!(matches!(records[1], ChannelLog::Request { .. }));
        assert!(matches!(records[2], ChannelLog::Response { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_communication_error_logged_after_the_request() {
        let config = MasterConfig::default().with_response_timeout(Duration::from_millis(200));
        let (master, _peer, recorder) = rtu_master(config);

        let err = master.read_coils(1, 0, 8).await.unwrap_err();
        match err {
            MasterError::Communication(err) => {
                assert_eq!(err.code, CommErrorCode::ResponseTimeout)
            }
            other => panic!("unexpected error {other:?}"),
        }

        let records = recorder.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], ChannelLog::Request { .. }));
        assert!(matches!(records[1], ChannelLog::Error { .. }));
    }

    #[tokio::test]
    async fn typed_values_use_the_requested_layout() {
        let (master, mut peer, _) = rtu_master(MasterConfig::default());
        let slave = tokio::spawn(async move {
            let mut request = [0u8; 8];
            peer.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..6], &[0x01, 0x03, 0x00, 0x10, 0x00, 0x02]);
            let pdu = [0x01, 0x03, 0x04, 0x56, 0x78, 0x12, 0x34];
            let crc = modlink_core::frame::rtu::crc16(&pdu).to_le_bytes();
            peer.write_all(&pdu).await.unwrap();
            peer.write_all(&crc).await.unwrap();
            peer
        });

        let value: u32 = master
            .read_holding_value(1, 0x10, ModbusEndian::WORD_SWAP)
            .await
            .unwrap();
        assert_eq!(value, 0x1234_5678);
        slave.await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_quantity_is_an_encode_error() {
        let (master, _peer, _) = rtu_master(MasterConfig::default());
        let err = master.read_holding_registers(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, MasterError::Encode(_)));
    }
}
