use crate::encoding::bits;
use crate::EncodeError;

/// A byte writer that encodes into a caller-owned buffer.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.write_all(&[value])
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < data.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes a byte-count prefix followed by `data`.
    pub fn write_counted(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let count = u8::try_from(data.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        self.write_u8(count)?;
        self.write_all(data)
    }

    /// Writes `values` as a byte-count prefixed, LSB-first packed bit field.
    pub fn write_packed_bits(&mut self, values: &[bool]) -> Result<(), EncodeError> {
        self.write_counted(&bits::pack(values))
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::EncodeError;

    #[test]
    fn writes_counted_payloads() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        w.write_u8(0x03).unwrap();
        w.write_counted(&[0x12, 0x34]).unwrap();
        assert_eq!(w.as_written(), &[0x03, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn writes_packed_bits() {
        let mut buf = [0u8; 4];
        let mut w = Writer::new(&mut buf);
        w.write_packed_bits(&[true, false, true]).unwrap();
        assert_eq!(w.as_written(), &[0x01, 0b0000_0101]);
    }

    #[test]
    fn refuses_to_overrun() {
        let mut buf = [0u8; 2];
        let mut w = Writer::new(&mut buf);
        w.write_be_u16(0x1234).unwrap();
        assert_eq!(w.write_u8(0).unwrap_err(), EncodeError::BufferTooSmall);
        assert_eq!(w.position(), 2);
    }
}
