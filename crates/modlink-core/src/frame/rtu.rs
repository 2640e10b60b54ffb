use crate::encoding::Writer;
use crate::{DecodeError, EncodeError};

/// Largest RTU frame on the wire: address, 253-byte PDU and CRC.
pub const MAX_FRAME_LEN: usize = 256;
pub const CRC_LEN: usize = 2;

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC16_TABLE: [u16; 256] = build_crc16_table();

/// Modbus CRC16 (polynomial 0xA001, initial value 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFFu16, |crc, byte| {
        let idx = usize::from((crc ^ u16::from(*byte)) & 0x00FF);
        (crc >> 8) ^ CRC16_TABLE[idx]
    })
}

/// Writes `address`, `pdu` and the little-endian CRC of both.
pub fn encode_frame(w: &mut Writer<'_>, address: u8, pdu: &[u8]) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() + 1 + CRC_LEN > MAX_FRAME_LEN {
        return Err(EncodeError::ValueOutOfRange);
    }

    let start = w.position();
    w.write_u8(address)?;
    w.write_all(pdu)?;
    let crc = crc16(&w.as_written()[start..]);
    w.write_all(&crc.to_le_bytes())
}

/// Verifies the trailing CRC of a complete frame and splits off the address.
pub fn decode_frame(data: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if data.len() < 2 + CRC_LEN {
        return Err(DecodeError::InvalidLength);
    }

    let (payload, crc) = data.split_at(data.len() - CRC_LEN);
    if crc16(payload).to_le_bytes() != [crc[0], crc[1]] {
        return Err(DecodeError::InvalidChecksum);
    }
    Ok((payload[0], &payload[1..]))
}

#[cfg(test)]
mod tests {
    use super::{crc16, decode_frame, encode_frame};
    use crate::encoding::Writer;
    use crate::DecodeError;

    #[test]
    fn crc16_known_vector() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    }

    #[test]
    fn crc_is_appended_low_byte_first() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        encode_frame(&mut w, 0x01, &[0x03, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(
            w.as_written(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn frame_splits_after_crc_check() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        encode_frame(&mut w, 0x11, &[0x06, 0x00, 0x01, 0x00, 0x03]).unwrap();

        let (address, pdu) = decode_frame(w.as_written()).unwrap();
        assert_eq!(address, 0x11);
        assert_eq!(pdu, &[0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn detects_bad_crc() {
        let bad = [0x11u8, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x00, 0x00];
        assert_eq!(decode_frame(&bad).unwrap_err(), DecodeError::InvalidChecksum);
    }

    #[test]
    fn refuses_oversized_pdu() {
        let mut buf = [0u8; 300];
        let mut w = Writer::new(&mut buf);
        assert!(encode_frame(&mut w, 1, &[0u8; 254]).is_err());
    }
}
