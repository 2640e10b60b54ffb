use crate::{DecodeError, EncodeError};

pub const START: u8 = b':';
pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Longitudinal redundancy check: two's complement of the byte sum.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

pub fn hex_value(symbol: u8) -> Option<u8> {
    match symbol {
        b'0'..=b'9' => Some(symbol - b'0'),
        b'A'..=b'F' => Some(symbol - b'A' + 10),
        b'a'..=b'f' => Some(symbol - b'a' + 10),
        _ => None,
    }
}

pub fn decode_hex_pair(high: u8, low: u8) -> Option<u8> {
    Some((hex_value(high)? << 4) | hex_value(low)?)
}

pub fn push_hex(out: &mut Vec<u8>, byte: u8) {
    out.push(HEX_DIGITS[usize::from(byte >> 4)]);
    out.push(HEX_DIGITS[usize::from(byte & 0x0F)]);
}

/// Builds `':' HEX(address pdu lrc) CR LF`.
pub fn encode_frame(address: u8, pdu: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() > 253 {
        return Err(EncodeError::ValueOutOfRange);
    }

    let mut body = Vec::with_capacity(pdu.len() + 2);
    body.push(address);
    body.extend_from_slice(pdu);
    body.push(lrc(&body));

    let mut frame = Vec::with_capacity(body.len() * 2 + 3);
    frame.push(START);
    for byte in &body {
        push_hex(&mut frame, *byte);
    }
    frame.extend_from_slice(&[CR, LF]);
    Ok(frame)
}

/// Decodes the hex body of a frame (the bytes between `:` and CR LF) and
/// verifies its LRC. Returns the address byte followed by the PDU.
pub fn decode_body(hex: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if hex.len() % 2 != 0 || hex.len() < 6 {
        return Err(DecodeError::InvalidLength);
    }
    let mut bytes = hex
        .chunks_exact(2)
        .map(|pair| decode_hex_pair(pair[0], pair[1]))
        .collect::<Option<Vec<u8>>>()
        .ok_or(DecodeError::MalformedFrame("non-hex symbol in ascii frame"))?;

    let checksum = bytes.pop().ok_or(DecodeError::InvalidLength)?;
    if lrc(&bytes) != checksum {
        return Err(DecodeError::InvalidChecksum);
    }
    Ok(bytes)
}
