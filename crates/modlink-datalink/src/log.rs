//! Protocol-level log records.
//!
//! Every channel carries a [`ChannelLogger`]. Codecs, the master and the slave
//! service report requests, responses, errors and bytes they could not frame
//! through it. The default sink forwards to `tracing`.

use modlink_core::pdu::{ModbusRequest, ModbusResponse, ResponseBody};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLog {
    Request {
        channel: String,
        request: ModbusRequest,
        frame: Vec<u8>,
    },
    Response {
        channel: String,
        response: ModbusResponse,
    },
    Error {
        channel: String,
        message: String,
        received: Vec<u8>,
    },
    Unrecognized {
        channel: String,
        bytes: Vec<u8>,
    },
}

impl ChannelLog {
    pub fn channel(&self) -> &str {
        match self {
            Self::Request { channel, .. }
            | Self::Response { channel, .. }
            | Self::Error { channel, .. }
            | Self::Unrecognized { channel, .. } => channel,
        }
    }
}

pub trait ChannelLogger: Send + Sync {
    fn log(&self, record: ChannelLog);
}

/// Formats a byte slice as space separated uppercase hex.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ChannelLogger for TracingLogger {
    fn log(&self, record: ChannelLog) {
        match record {
            ChannelLog::Request {
                channel,
                request,
                frame,
            } => debug!(
                %channel,
                slave = request.slave_address,
                function = %request.function(),
                transaction_id = request.transaction_id,
                frame = %Hex(&frame),
                "modbus request"
            ),
            ChannelLog::Response { channel, response } => {
                let request = response.request();
                match response.body() {
                    ResponseBody::Exception(code) => debug!(
                        %channel,
                        slave = request.slave_address,
                        function = %request.function(),
                        transaction_id = request.transaction_id,
                        exception = %code,
                        "modbus exception response"
                    ),
                    body => debug!(
                        %channel,
                        slave = request.slave_address,
                        function = %request.function(),
                        transaction_id = request.transaction_id,
                        ?body,
                        "modbus response"
                    ),
                }
            }
            ChannelLog::Error {
                channel,
                message,
                received,
            } => warn!(%channel, received = %Hex(&received), "{message}"),
            ChannelLog::Unrecognized { channel, bytes } => {
                debug!(%channel, bytes = %Hex(&bytes), "unrecognized bytes")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelLog, Hex};

    #[test]
    fn hex_formatting() {
        assert_eq!(Hex(&[0x01, 0xAB, 0x0F]).to_string(), "01 AB 0F");
        assert_eq!(Hex(&[]).to_string(), "");
    }

    #[test]
    fn records_name_their_channel() {
        let record = ChannelLog::Unrecognized {
            channel: "tcp 127.0.0.1:502".to_string(),
            bytes: vec![0xFF],
        };
        assert_eq!(record.channel(), "tcp 127.0.0.1:502");
    }
}
