//! Async Modbus data link layer.
//!
//! This crate moves frames between a [`Channel`] and the protocol model in
//! `modlink-core`. It provides the byte channel abstraction and the RTU, ASCII
//! and TCP [`FrameCodec`]s, plus the [`ModbusSlaveService`] that answers
//! requests from in-memory [`SlaveDevice`]s.

#![forbid(unsafe_code)]

use modlink_core::{DecodeError, EncodeError};
use thiserror::Error;

pub mod channel;
pub mod codec;
pub mod device;
pub mod log;
pub mod provider;
#[cfg(feature = "serial")]
pub mod serial;
pub mod slave;

pub use channel::{Channel, StreamChannel, TcpChannel};
pub use codec::{FrameCodec, Protocol, RequestFrame};
pub use device::SlaveDevice;
pub use log::{ChannelLog, ChannelLogger, TracingLogger};
pub use provider::{ChannelEvents, TcpChannelProvider};
#[cfg(feature = "serial")]
pub use serial::SerialConfig;
pub use slave::{
    DefaultSlaveHandler, ModbusSlaveService, ServiceError, SlaveConfig, SlaveHandler, SlaveReply,
};

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for data")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}
