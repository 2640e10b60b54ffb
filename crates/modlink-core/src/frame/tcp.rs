use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

/// Transaction id, protocol id and length; the unit id follows as the first
/// byte counted by `length`.
pub const MBAP_HEADER_LEN: usize = 6;

/// Largest value of the MBAP length field: unit id plus a 253-byte PDU.
pub const MAX_MBAP_LENGTH: u16 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count from the unit id through the end of the PDU.
    pub length: u16,
}

impl MbapHeader {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)
    }

    /// Reads the header fields without judging them; callers decide how a
    /// non-zero protocol id or implausible length is reported.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            transaction_id: r.read_be_u16()?,
            protocol_id: r.read_be_u16()?,
            length: r.read_be_u16()?,
        })
    }

    pub const fn is_modbus(&self) -> bool {
        self.protocol_id == 0
    }

    pub const fn has_plausible_length(&self) -> bool {
        self.length >= 2 && self.length <= MAX_MBAP_LENGTH
    }
}

pub fn encode_frame(
    w: &mut Writer<'_>,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    let length = u16::try_from(pdu.len() + 1).map_err(|_| EncodeError::ValueOutOfRange)?;
    if length > MAX_MBAP_LENGTH {
        return Err(EncodeError::ValueOutOfRange);
    }

    MbapHeader {
        transaction_id,
        protocol_id: 0,
        length,
    }
    .encode(w)?;
    w.write_u8(unit_id)?;
    w.write_all(pdu)
}

#[cfg(test)]
mod tests {
    use super::{encode_frame, MbapHeader, MBAP_HEADER_LEN};
    use crate::encoding::{Reader, Writer};

    #[test]
    fn frame_layout() {
        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        encode_frame(&mut w, 1, 2, &[0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        assert_eq!(
            w.as_written(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let mut r = Reader::new(w.as_written());
        let header = MbapHeader::decode(&mut r).unwrap();
        assert_eq!(r.position(), MBAP_HEADER_LEN);
        assert_eq!(
            header,
            MbapHeader {
                transaction_id: 1,
                protocol_id: 0,
                length: 6,
            }
        );
        assert!(header.is_modbus());
        assert!(header.has_plausible_length());
    }

    #[test]
    fn decode_leaves_protocol_judgement_to_caller() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x02];
        let header = MbapHeader::decode(&mut Reader::new(&bytes)).unwrap();
        assert!(!header.is_modbus());
    }

    #[test]
    fn implausible_lengths_are_flagged() {
        let header = MbapHeader {
            transaction_id: 0,
            protocol_id: 0,
            length: 0,
        };
        assert!(!header.has_plausible_length());
        let header = MbapHeader { length: 255, ..header };
        assert!(!header.has_plausible_length());
    }
}
