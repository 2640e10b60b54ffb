use super::reader::{conclude, read_response_pdu, FrameReader, ReadFault};
use super::{request_frame, FrameCodec, Protocol, RequestFrame};
use crate::channel::Channel;
use crate::log::ChannelLog;
use crate::DataLinkError;
use async_trait::async_trait;
use modlink_core::frame::ascii::{self, CR, LF, START};
use modlink_core::pdu::{CommErrorCode, ModbusRequest, ModbusResponse};
use std::time::Duration;

// ':' + 2 * (address + 253 byte PDU + LRC) + CR LF
const MAX_FRAME_SYMBOLS: usize = 1 + 2 * 255 + 2;

/// `':' HEX(ADDR FUNC DATA LRC) CR LF`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCodec;

fn log_noise(channel: &dyn Channel, noise: Vec<u8>) {
    if noise.is_empty() {
        return;
    }
    channel.logger().log(ChannelLog::Unrecognized {
        channel: channel.description().to_string(),
        bytes: noise,
    });
}

async fn check_trailer(reader: &mut FrameReader<'_>) -> Result<(), ReadFault> {
    let expected = ascii::lrc(reader.decoded());
    if reader.byte().await? != expected {
        return Err(ReadFault::Comm(CommErrorCode::ResponseLrcError));
    }
    reader.set_hex(false);
    for terminator in [CR, LF] {
        match reader.symbol().await? {
            symbol if symbol == terminator => {}
            START => return Err(ReadFault::Comm(CommErrorCode::ResponseAsciiStartError)),
            _ => return Err(ReadFault::Comm(CommErrorCode::ResponseAsciiEndError)),
        }
    }
    Ok(())
}

/// Reads one line frame. Anything that is not a valid frame ends up in `noise`.
async fn read_request(
    reader: &mut FrameReader<'_>,
    noise: &mut Vec<u8>,
) -> Result<Option<RequestFrame>, ReadFault> {
    reader.skip_until(START, noise).await?;

    let mut symbols = Vec::new();
    loop {
        let symbol = match reader.symbol().await {
            Ok(symbol) => symbol,
            Err(fault) => {
                noise.push(START);
                noise.append(&mut symbols);
                return Err(fault);
            }
        };
        match symbol {
            LF => break,
            START => {
                // A new frame started before this one ended.
                noise.push(START);
                noise.append(&mut symbols);
            }
            _ if symbols.len() >= MAX_FRAME_SYMBOLS => {
                noise.push(START);
                noise.append(&mut symbols);
                noise.push(symbol);
                return Ok(None);
            }
            _ => symbols.push(symbol),
        }
    }

    let decoded = match symbols.split_last() {
        Some((&CR, hex)) => ascii::decode_body(hex).ok().filter(|bytes| bytes.len() >= 2),
        _ => None,
    };
    let Some(bytes) = decoded else {
        noise.push(START);
        noise.append(&mut symbols);
        noise.push(LF);
        return Ok(None);
    };
    Ok(Some(request_frame(bytes[0], 0, &bytes[1..])))
}

#[async_trait]
impl FrameCodec for AsciiCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Ascii
    }

    fn frame_pdu(
        &self,
        slave_address: u8,
        _transaction_id: u16,
        pdu: &[u8],
    ) -> Result<Vec<u8>, DataLinkError> {
        Ok(ascii::encode_frame(slave_address, pdu)?)
    }

    async fn decode_response(
        &mut self,
        channel: &dyn Channel,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError> {
        let mut reader = FrameReader::channel(channel, timeout);

        let mut noise = Vec::new();
        let started = reader.skip_until(START, &mut noise).await;
        if let Err(fault) = started {
            return conclude(request, noise, Err(fault));
        }
        log_noise(channel, noise);

        reader.set_hex(true);
        let outcome = async {
            let verdict = read_response_pdu(&mut reader, request).await?;
            check_trailer(&mut reader).await?;
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
        let mut reader = FrameReader::channel(channel, timeout).restart_on_first_byte();
        let mut noise = Vec::new();
        let outcome = read_request(&mut reader, &mut noise).await;
        log_noise(channel, noise);

        match outcome {
            Ok(frame) => Ok(frame),
            Err(ReadFault::Comm(_)) => Ok(None),
            Err(ReadFault::Link(err)) => Err(err),
        }
    }
}
