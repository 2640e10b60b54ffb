use crate::channel::Channel;
use crate::DataLinkError;
use modlink_core::encoding::bits;
use modlink_core::frame::ascii;
use modlink_core::pdu::{
    CommErrorCode, ExceptionCode, ModbusRequest, ModbusResponse, Operation, ResponseBody,
    WriteOperation,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) enum ReadFault {
    Comm(CommErrorCode),
    Link(DataLinkError),
}

impl From<DataLinkError> for ReadFault {
    fn from(err: DataLinkError) -> Self {
        match err {
            DataLinkError::Timeout => Self::Comm(CommErrorCode::ResponseTimeout),
            other => Self::Link(other),
        }
    }
}

enum Source<'a> {
    Channel {
        channel: &'a dyn Channel,
        deadline: Instant,
        timeout: Duration,
        restart_on_first: bool,
        replay: Option<&'a mut VecDeque<u8>>,
    },
    Slice {
        data: &'a [u8],
        position: usize,
        exhausted: CommErrorCode,
    },
}

/// Pulls a frame one field at a time, remembering the raw bytes it consumed
/// and the decoded frame bytes the checksum covers.
pub(crate) struct FrameReader<'a> {
    source: Source<'a>,
    hex: bool,
    raw: Vec<u8>,
    decoded: Vec<u8>,
}

impl<'a> FrameReader<'a> {
    pub(crate) fn channel(channel: &'a dyn Channel, timeout: Duration) -> Self {
        Self::new(Source::Channel {
            channel,
            deadline: Instant::now() + timeout,
            timeout,
            restart_on_first: false,
            replay: None,
        })
    }

    /// Reads from an already received buffer. Running past its end is
    /// reported as `exhausted`.
    pub(crate) fn slice(data: &'a [u8], exhausted: CommErrorCode) -> Self {
        Self::new(Source::Slice {
            data,
            position: 0,
            exhausted,
        })
    }

    fn new(source: Source<'a>) -> Self {
        Self {
            source,
            hex: false,
            raw: Vec::new(),
            decoded: Vec::new(),
        }
    }

    /// Restarts the deadline when the first byte arrives, so `timeout` bounds
    /// the wait for a frame and, separately, the frame itself.
    pub(crate) fn restart_on_first_byte(mut self) -> Self {
        if let Source::Channel {
            restart_on_first, ..
        } = &mut self.source
        {
            *restart_on_first = true;
        }
        self
    }

    /// Serves bytes from `replay` before reading the channel.
    pub(crate) fn with_replay(mut self, buffer: &'a mut VecDeque<u8>) -> Self {
        if let Source::Channel { replay, .. } = &mut self.source {
            *replay = Some(buffer);
        }
        self
    }

    /// In hex mode every frame byte is two ASCII hex symbols.
    pub(crate) fn set_hex(&mut self, hex: bool) {
        self.hex = hex;
    }

    async fn next(&mut self) -> Result<u8, ReadFault> {
        match &mut self.source {
            Source::Slice {
                data,
                position,
                exhausted,
            } => {
                let byte = data
                    .get(*position)
                    .copied()
                    .ok_or(ReadFault::Comm(*exhausted))?;
                *position += 1;
                Ok(byte)
            }
            Source::Channel {
                channel,
                deadline,
                timeout,
                restart_on_first,
                replay,
            } => {
                if let Some(byte) = replay.as_mut().and_then(|buffer| buffer.pop_front()) {
                    return Ok(byte);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                let byte = channel.read_byte(remaining).await?;
                if *restart_on_first {
                    *restart_on_first = false;
                    *deadline = Instant::now() + *timeout;
                }
                Ok(byte)
            }
        }
    }

    /// One raw symbol, outside the checksummed part of a frame.
    pub(crate) async fn symbol(&mut self) -> Result<u8, ReadFault> {
        let symbol = self.next().await?;
        self.raw.push(symbol);
        Ok(symbol)
    }

    async fn hex_symbol(&mut self) -> Result<u8, ReadFault> {
        match self.symbol().await? {
            ascii::START => Err(ReadFault::Comm(CommErrorCode::ResponseAsciiStartError)),
            symbol => Ok(symbol),
        }
    }

    pub(crate) async fn byte(&mut self) -> Result<u8, ReadFault> {
        let byte = if self.hex {
            let high = self.hex_symbol().await?;
            let low = self.hex_symbol().await?;
            ascii::decode_hex_pair(high, low)
                .ok_or(ReadFault::Comm(CommErrorCode::ResponseAsciiEndError))?
        } else {
            self.symbol().await?
        };
        self.decoded.push(byte);
        Ok(byte)
    }

    pub(crate) async fn be_u16(&mut self) -> Result<u16, ReadFault> {
        let high = self.byte().await?;
        let low = self.byte().await?;
        Ok(u16::from_be_bytes([high, low]))
    }

    pub(crate) async fn bytes(&mut self, count: usize) -> Result<Vec<u8>, ReadFault> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.byte().await?);
        }
        Ok(out)
    }

    /// Discards symbols until `start`, collecting them into `skipped`.
    pub(crate) async fn skip_until(
        &mut self,
        start: u8,
        skipped: &mut Vec<u8>,
    ) -> Result<(), ReadFault> {
        loop {
            let symbol = self.next().await?;
            if symbol == start {
                self.raw.push(symbol);
                return Ok(());
            }
            skipped.push(symbol);
        }
    }

    pub(crate) fn decoded(&self) -> &[u8] {
        &self.decoded
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        match &self.source {
            Source::Slice { data, position, .. } => *position >= data.len(),
            Source::Channel { .. } => true,
        }
    }

    pub(crate) fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

/// Outcome of a fully read response PDU. Mismatches are reported only after
/// the frame checksum has been verified.
#[derive(Debug)]
pub(crate) enum PduVerdict {
    Accepted(ResponseBody),
    Mismatch(CommErrorCode),
}

/// Reads `ADDR FUNC DATA` of a reply and checks it against `request`.
pub(crate) async fn read_response_pdu(
    reader: &mut FrameReader<'_>,
    request: &ModbusRequest,
) -> Result<PduVerdict, ReadFault> {
    if reader.byte().await? != request.slave_address {
        return Err(ReadFault::Comm(CommErrorCode::ResponseSlaveAddressDoNotMatch));
    }

    let function = request.function().as_u8();
    let received = reader.byte().await?;
    if received == function | 0x80 {
        let code = reader.byte().await?;
        return Ok(PduVerdict::Accepted(ResponseBody::Exception(
            ExceptionCode::from_u8(code),
        )));
    }
    if received != function {
        return Err(ReadFault::Comm(CommErrorCode::ResponseFunctionDoNotMatch));
    }

    match &request.operation {
        Operation::Read(read) => {
            let byte_count = usize::from(reader.byte().await?);
            let data = reader.bytes(byte_count).await?;
            if byte_count != read.expected_byte_count() {
                return Ok(PduVerdict::Mismatch(CommErrorCode::ResponseLengthDoNotMatch));
            }
            let body = if read.object.is_bit() {
                ResponseBody::Bits(bits::unpack(&data, usize::from(read.length)))
            } else {
                ResponseBody::Registers(data)
            };
            Ok(PduVerdict::Accepted(body))
        }
        Operation::Write(write) => {
            let address = reader.be_u16().await?;
            let value = reader.be_u16().await?;
            if address != write.address() {
                return Ok(PduVerdict::Mismatch(CommErrorCode::ResponseAddressDoNotMatch));
            }
            if value != write.echo_value() {
                let code = match write {
                    WriteOperation::SingleCoil { .. } | WriteOperation::SingleRegister { .. } => {
                        CommErrorCode::ResponseWrittenValueDoNotMatch
                    }
                    _ => CommErrorCode::ResponseLengthDoNotMatch,
                };
                return Ok(PduVerdict::Mismatch(code));
            }
            Ok(PduVerdict::Accepted(ResponseBody::WriteAck))
        }
    }
}

/// Turns a read outcome into the response handed to the caller.
pub(crate) fn conclude(
    request: &ModbusRequest,
    raw: Vec<u8>,
    outcome: Result<PduVerdict, ReadFault>,
) -> Result<ModbusResponse, DataLinkError> {
    match outcome {
        Ok(PduVerdict::Accepted(body)) => Ok(ModbusResponse::new(request.clone(), body)),
        Ok(PduVerdict::Mismatch(code)) | Err(ReadFault::Comm(code)) => {
            Ok(ModbusResponse::failed(request.clone(), code, raw))
        }
        Err(ReadFault::Link(err)) => Err(err),
    }
}
