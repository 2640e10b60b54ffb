use super::reader::{conclude, read_response_pdu, FrameReader, ReadFault};
use super::{request_frame, FrameCodec, Protocol, RequestFrame};
use crate::channel::Channel;
use crate::log::ChannelLog;
use crate::DataLinkError;
use async_trait::async_trait;
use modlink_core::encoding::{Reader, Writer};
use modlink_core::frame::tcp::{self, MbapHeader, MBAP_HEADER_LEN};
use modlink_core::pdu::{CommErrorCode, ModbusRequest, ModbusResponse, MAX_PDU_LEN};
use std::time::Duration;
use tokio::time::Instant;

/// MBAP header followed by `UNIT FUNC DATA`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpCodec;

/// One complete MBAP frame.
#[derive(Debug, Clone)]
pub struct TcpFrame {
    pub header: MbapHeader,
    pub raw: Vec<u8>,
}

impl TcpFrame {
    /// Unit id and PDU.
    pub fn body(&self) -> &[u8] {
        &self.raw[MBAP_HEADER_LEN..]
    }
}

fn discard(channel: &dyn Channel, bytes: Vec<u8>) {
    channel.logger().log(ChannelLog::Unrecognized {
        channel: channel.description().to_string(),
        bytes,
    });
}

/// Reads the next MBAP frame.
///
/// `idle` bounds the wait for a header and `frame_timeout` the wait for the
/// rest of the frame. `Ok(None)` means nothing usable arrived. A header with
/// an implausible length is dropped on its own so frames queued behind it
/// survive; a body that never completes is drained with whatever is buffered.
pub async fn read_frame(
    channel: &dyn Channel,
    idle: Duration,
    frame_timeout: Duration,
) -> Result<Option<TcpFrame>, DataLinkError> {
    let header_bytes = match channel.read_bytes(MBAP_HEADER_LEN, idle).await {
        Ok(bytes) => bytes,
        Err(DataLinkError::Timeout) => return Ok(None),
        Err(err) => return Err(err),
    };
    let header = MbapHeader::decode(&mut Reader::new(&header_bytes))?;
    if !header.has_plausible_length() {
        discard(channel, header_bytes);
        return Ok(None);
    }

    match channel
        .read_bytes(usize::from(header.length), frame_timeout)
        .await
    {
        Ok(body) => {
            let mut raw = header_bytes;
            raw.extend(body);
            Ok(Some(TcpFrame { header, raw }))
        }
        Err(DataLinkError::Timeout) => {
            let mut bytes = header_bytes;
            bytes.extend(channel.read_all_remaining().await.unwrap_or_default());
            discard(channel, bytes);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Checks a received frame against the request it claims to answer.
pub async fn response_from_frame(
    frame: &TcpFrame,
    request: &ModbusRequest,
) -> Result<ModbusResponse, DataLinkError> {
    if !frame.header.is_modbus() {
        return Ok(ModbusResponse::failed(
            request.clone(),
            CommErrorCode::ModbusTcpSymbolError,
            frame.raw.clone(),
        ));
    }

    let mut reader = FrameReader::slice(frame.body(), CommErrorCode::ResponseTcpLengthDoNotMatch);
    let outcome = async {
        let verdict = read_response_pdu(&mut reader, request).await?;
        if !reader.is_exhausted() {
            return Err(ReadFault::Comm(CommErrorCode::ResponseTcpLengthDoNotMatch));
        }
        Ok(verdict)
    }
    .await;
    conclude(request, frame.raw.clone(), outcome)
}

#[async_trait]
impl FrameCodec for TcpCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    fn frame_pdu(
        &self,
        slave_address: u8,
        transaction_id: u16,
        pdu: &[u8],
    ) -> Result<Vec<u8>, DataLinkError> {
        let mut buf = [0u8; MBAP_HEADER_LEN + 1 + MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        tcp::encode_frame(&mut w, transaction_id, slave_address, pdu)?;
        Ok(w.as_written().to_vec())
    }

    /// Reads frames until one carries the request's transaction id. Others
    /// are logged as unrecognized.
    async fn decode_response(
        &mut self,
        channel: &dyn Channel,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match read_frame(channel, remaining, remaining).await? {
                Some(frame) if frame.header.transaction_id == request.transaction_id => {
                    return response_from_frame(&frame, request).await;
                }
                Some(frame) => channel.logger().log(ChannelLog::Unrecognized {
                    channel: channel.description().to_string(),
                    bytes: frame.raw,
                }),
                None if remaining.is_zero() || Instant::now() >= deadline => {
                    return Ok(ModbusResponse::failed(
                        request.clone(),
                        CommErrorCode::ResponseTimeout,
                        Vec::new(),
                    ));
                }
                None => {}
            }
        }
    }

    async fn decode_request(
        &mut self,
        channel: &dyn Channel,
        timeout: Duration,
    ) -> Result<Option<RequestFrame>, DataLinkError> {
        let Some(frame) = read_frame(channel, timeout, timeout).await? else {
            return Ok(None);
        };
        if !frame.header.is_modbus() {
            channel.logger().log(ChannelLog::Unrecognized {
                channel: channel.description().to_string(),
                bytes: frame.raw,
            });
            return Ok(None);
        }
        let body = frame.body();
        Ok(Some(request_frame(
            body[0],
            frame.header.transaction_id,
            &body[1..],
        )))
    }
}
