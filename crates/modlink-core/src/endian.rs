//! Byte ordering of multi-register values.
//!
//! Values are held canonically as big-endian bytes. A [`ModbusEndian`] maps
//! that canonical form to the order a device puts on the wire: `inner` is the
//! byte order inside each 16-bit register and `outer` is the order of the
//! registers themselves.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModbusEndian {
    pub inner: ByteOrder,
    pub outer: ByteOrder,
}

impl ModbusEndian {
    /// `ABCD`
    pub const BIG: Self = Self::new(ByteOrder::BigEndian, ByteOrder::BigEndian);
    /// `DCBA`
    pub const LITTLE: Self = Self::new(ByteOrder::LittleEndian, ByteOrder::LittleEndian);
    /// `CDAB`
    pub const WORD_SWAP: Self = Self::new(ByteOrder::BigEndian, ByteOrder::LittleEndian);
    /// `BADC`
    pub const BYTE_SWAP: Self = Self::new(ByteOrder::LittleEndian, ByteOrder::BigEndian);

    pub const fn new(inner: ByteOrder, outer: ByteOrder) -> Self {
        Self { inner, outer }
    }

    /// Reorders canonical big-endian bytes into wire order.
    ///
    /// A trailing odd byte is left where it is.
    pub fn sort(&self, bytes: &[u8]) -> Vec<u8> {
        let split = bytes.len() - bytes.len() % 2;
        let (words, tail) = bytes.split_at(split);

        let mut chunks: Vec<[u8; 2]> = words
            .chunks_exact(2)
            .map(|pair| match self.inner {
                ByteOrder::BigEndian => [pair[0], pair[1]],
                ByteOrder::LittleEndian => [pair[1], pair[0]],
            })
            .collect();
        if self.outer == ByteOrder::LittleEndian {
            chunks.reverse();
        }

        let mut out: Vec<u8> = chunks.into_iter().flatten().collect();
        out.extend_from_slice(tail);
        out
    }

    /// Reorders wire bytes back into canonical big-endian order.
    pub fn unsort(&self, bytes: &[u8]) -> Vec<u8> {
        // Both permutations are self-inverse.
        self.sort(bytes)
    }
}

/// A value that occupies one or more consecutive registers.
pub trait RegisterValue: Sized + Copy {
    const REGISTERS: usize;

    fn to_be_vec(self) -> Vec<u8>;

    fn from_be_slice(bytes: &[u8]) -> Option<Self>;

    fn to_wire(self, endian: ModbusEndian) -> Vec<u8> {
        endian.sort(&self.to_be_vec())
    }

    fn from_wire(bytes: &[u8], endian: ModbusEndian) -> Option<Self> {
        if bytes.len() != Self::REGISTERS * 2 {
            return None;
        }
        Self::from_be_slice(&endian.unsort(bytes))
    }
}

macro_rules! register_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RegisterValue for $ty {
                const REGISTERS: usize = core::mem::size_of::<$ty>() / 2;

                fn to_be_vec(self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }

                fn from_be_slice(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_be_bytes)
                }
            }
        )*
    };
}

register_value!(u16, i16, u32, i32, u64, i64, f32, f64);

#[cfg(test)]
mod tests {
    use super::{ByteOrder, ModbusEndian, RegisterValue};

    const ABCD: [u8; 4] = [0xA, 0xB, 0xC, 0xD];

    #[test]
    fn named_orders() {
        assert_eq!(ModbusEndian::BIG.sort(&ABCD), vec![0xA, 0xB, 0xC, 0xD]);
        assert_eq!(ModbusEndian::LITTLE.sort(&ABCD), vec![0xD, 0xC, 0xB, 0xA]);
        assert_eq!(ModbusEndian::WORD_SWAP.sort(&ABCD), vec![0xC, 0xD, 0xA, 0xB]);
        assert_eq!(ModbusEndian::BYTE_SWAP.sort(&ABCD), vec![0xB, 0xA, 0xD, 0xC]);
        assert_eq!(
            ModbusEndian::default(),
            ModbusEndian::new(ByteOrder::BigEndian, ByteOrder::BigEndian)
        );
    }

    #[test]
    fn odd_tail_is_kept() {
        assert_eq!(
            ModbusEndian::LITTLE.sort(&[1, 2, 3, 4, 5]),
            vec![4, 3, 2, 1, 5]
        );
    }

    #[test]
    fn typed_values_follow_endian() {
        let wire = 1.5f32.to_wire(ModbusEndian::WORD_SWAP);
        assert_eq!(wire, vec![0x00, 0x00, 0x3F, 0xC0]);
        assert_eq!(f32::from_wire(&wire, ModbusEndian::WORD_SWAP), Some(1.5));
        assert_eq!(i16::from_wire(&[0xFF, 0xFE], ModbusEndian::BIG), Some(-2));
        assert_eq!(u64::REGISTERS, 4);
        assert_eq!(u32::from_wire(&[0, 1], ModbusEndian::BIG), None);
    }
}
