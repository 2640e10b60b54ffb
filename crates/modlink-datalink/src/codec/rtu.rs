use super::reader::{conclude, read_response_pdu, FrameReader, ReadFault};
use super::{request_frame, FrameCodec, Protocol, RequestFrame};
use crate::channel::Channel;
use crate::log::ChannelLog;
use crate::DataLinkError;
use async_trait::async_trait;
use modlink_core::encoding::Writer;
use modlink_core::frame::rtu;
use modlink_core::pdu::{CommErrorCode, ModbusRequest, ModbusResponse};
use std::collections::VecDeque;
use std::time::Duration;

/// `ADDR FUNC DATA CRC16`, CRC low byte first.
#[derive(Debug, Default)]
pub struct RtuCodec {
    // Bytes read past a bad frame, re-examined before new channel input.
    replay: VecDeque<u8>,
}

async fn check_crc(reader: &mut FrameReader<'_>) -> Result<(), ReadFault> {
    let expected = rtu::crc16(reader.decoded());
    let low = reader.byte().await?;
    let high = reader.byte().await?;
    if u16::from_le_bytes([low, high]) != expected {
        return Err(ReadFault::Comm(CommErrorCode::ResponseCrcError));
    }
    Ok(())
}

async fn read_request(reader: &mut FrameReader<'_>) -> Result<RequestFrame, ReadFault> {
    let address = reader.byte().await?;
    match reader.byte().await? {
        0x01..=0x06 => {
            reader.bytes(4).await?;
        }
        0x0F | 0x10 => {
            reader.bytes(4).await?;
            let byte_count = reader.byte().await?;
            reader.bytes(usize::from(byte_count)).await?;
        }
        // Without a known layout the frame cannot be delimited.
        _ => return Err(ReadFault::Comm(CommErrorCode::ResponseFunctionDoNotMatch)),
    }
    let pdu = reader.decoded()[1..].to_vec();
    check_crc(reader).await?;
    Ok(request_frame(address, 0, &pdu))
}

#[async_trait]
impl FrameCodec for RtuCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Rtu
    }

    fn frame_pdu(
        &self,
        slave_address: u8,
        _transaction_id: u16,
        pdu: &[u8],
    ) -> Result<Vec<u8>, DataLinkError> {
        let mut buf = [0u8; rtu::MAX_FRAME_LEN];
        let mut w = Writer::new(&mut buf);
        rtu::encode_frame(&mut w, slave_address, pdu)?;
        Ok(w.as_written().to_vec())
    }

    async fn decode_response(
        &mut self,
        channel: &dyn Channel,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError> {
        let mut reader = FrameReader::channel(channel, timeout);
        let outcome = async {
            let verdict = read_response_pdu(&mut reader, request).await?;
            check_crc(&mut reader).await?;
            Ok::<_, ReadFault>(verdict)
        }
        .await;
        conclude(request, reader.into_raw(), outcome)
    }

    async fn decode_request(
        &mut self,
        channel: &dyn Channel,
        timeout: Duration,
    ) -> Result<Option<RequestFrame>, DataLinkError> {
        let mut noise = Vec::new();
        let result = loop {
            let mut reader = FrameReader::channel(channel, timeout)
                .restart_on_first_byte()
                .with_replay(&mut self.replay);
            let outcome = read_request(&mut reader).await;
            let raw = reader.into_raw();

            match outcome {
                Ok(frame) => break Ok(Some(frame)),
                // A false length in noise can swallow a real frame; retry behind it.
                Err(ReadFault::Comm(CommErrorCode::ResponseTimeout)) if raw.len() > 1 => {
                    noise.push(raw[0]);
                    for byte in raw[1..].iter().rev() {
                        self.replay.push_front(*byte);
                    }
                }
                Err(ReadFault::Comm(CommErrorCode::ResponseTimeout)) => {
                    noise.extend(raw);
                    break Ok(None);
                }
                Err(ReadFault::Link(err)) => {
                    noise.extend(raw);
                    break Err(err);
                }
                Err(ReadFault::Comm(_)) => {
                    // Drop one byte and look for a frame in the rest.
                    let Some((first, rest)) = raw.split_first() else {
                        break Ok(None);
                    };
                    noise.push(*first);
                    for byte in rest.iter().rev() {
                        self.replay.push_front(*byte);
                    }
                }
            }
        };

        if !noise.is_empty() {
            channel.logger().log(ChannelLog::Unrecognized {
                channel: channel.description().to_string(),
                bytes: noise,
            });
        }
        result
    }
}
