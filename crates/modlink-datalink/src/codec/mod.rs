//! Frame codecs.
//!
//! A [`FrameCodec`] turns requests and responses into wire frames and reads
//! frames back from a [`Channel`] one field at a time. Problems with a reply
//! are reported as [`ResponseBody::CommError`](modlink_core::pdu::ResponseBody)
//! values; `Err` is reserved for channel failures.

mod ascii;
mod reader;
mod rtu;
mod tcp;

pub use ascii::AsciiCodec;
pub use rtu::RtuCodec;
pub use tcp::TcpCodec;
pub use tcp::{read_frame, response_from_frame, TcpFrame};

use crate::channel::Channel;
use crate::DataLinkError;
use async_trait::async_trait;
use modlink_core::pdu::{ExceptionCode, ModbusRequest, ModbusResponse};
use modlink_core::DecodeError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Rtu,
    Ascii,
    Tcp,
}

impl Protocol {
    pub fn codec(self) -> Box<dyn FrameCodec> {
        match self {
            Self::Rtu => Box::new(RtuCodec::default()),
            Self::Ascii => Box::new(AsciiCodec),
            Self::Tcp => Box::new(TcpCodec),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rtu => "rtu",
            Self::Ascii => "ascii",
            Self::Tcp => "tcp",
        })
    }
}

impl FromStr for Protocol {
    type Err = DataLinkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rtu" => Ok(Self::Rtu),
            "ascii" => Ok(Self::Ascii),
            "tcp" => Ok(Self::Tcp),
            _ => Err(DataLinkError::InvalidFrame("unknown protocol")),
        }
    }
}

/// A request as seen by a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    Request(ModbusRequest),
    /// A well delimited frame that must be answered with `exception`.
    Rejected {
        slave_address: u8,
        transaction_id: u16,
        function: u8,
        exception: ExceptionCode,
    },
}

impl RequestFrame {
    pub fn slave_address(&self) -> u8 {
        match self {
            Self::Request(request) => request.slave_address,
            Self::Rejected { slave_address, .. } => *slave_address,
        }
    }
}

pub(crate) fn request_frame(slave_address: u8, transaction_id: u16, pdu: &[u8]) -> RequestFrame {
    match ModbusRequest::decode_pdu(slave_address, transaction_id, pdu) {
        Ok(request) => RequestFrame::Request(request),
        Err(err) => RequestFrame::Rejected {
            slave_address,
            transaction_id,
            function: pdu.first().copied().unwrap_or(0) & 0x7F,
            exception: match err {
                DecodeError::InvalidFunctionCode => ExceptionCode::IllegalFunction,
                _ => ExceptionCode::IllegalDataValue,
            },
        },
    }
}

#[async_trait]
pub trait FrameCodec: Send {
    fn protocol(&self) -> Protocol;

    /// Wraps a PDU in this protocol's framing.
    fn frame_pdu(
        &self,
        slave_address: u8,
        transaction_id: u16,
        pdu: &[u8],
    ) -> Result<Vec<u8>, DataLinkError>;

    fn encode_request(&self, request: &ModbusRequest) -> Result<Vec<u8>, DataLinkError> {
        self.frame_pdu(
            request.slave_address,
            request.transaction_id,
            &request.to_pdu()?,
        )
    }

    fn encode_response(&self, response: &ModbusResponse) -> Result<Vec<u8>, DataLinkError> {
        let request = response.request();
        self.frame_pdu(
            request.slave_address,
            request.transaction_id,
            &response.to_pdu()?,
        )
    }

    /// Encodes an exception reply for a raw function code.
    fn encode_exception(
        &self,
        slave_address: u8,
        transaction_id: u16,
        function: u8,
        exception: ExceptionCode,
    ) -> Result<Vec<u8>, DataLinkError> {
        self.frame_pdu(
            slave_address,
            transaction_id,
            &[function | 0x80, exception.as_u8()],
        )
    }

    /// Reads the reply to `request`. The whole read is bounded by `timeout`.
    async fn decode_response(
        &mut self,
        channel: &dyn Channel,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError>;

    /// Reads the next request. `Ok(None)` means no complete request arrived
    /// within `timeout`.
    async fn decode_request(
        &mut self,
        channel: &dyn Channel,
        timeout: Duration,
    ) -> Result<Option<RequestFrame>, DataLinkError>;
}
