//! LSB-first bit packing used by coil and discrete input payloads.

/// Sets bit `bit` (0 = least significant) in `byte`.
pub const fn set_bit(byte: u8, bit: u8) -> u8 {
    byte | (1u8 << (bit & 7))
}

/// Clears bit `bit` (0 = least significant) in `byte`.
pub const fn clear_bit(byte: u8, bit: u8) -> u8 {
    byte & !(1u8 << (bit & 7))
}

pub const fn is_bit_set(byte: u8, bit: u8) -> bool {
    (byte & (1u8 << (bit & 7))) != 0
}

/// Number of bytes needed to carry `count` packed bits.
pub const fn packed_len(count: usize) -> usize {
    count.div_ceil(8)
}

pub fn pack(values: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; packed_len(values.len())];
    for (i, value) in values.iter().enumerate() {
        let bit = (i % 8) as u8;
        out[i / 8] = if *value {
            set_bit(out[i / 8], bit)
        } else {
            clear_bit(out[i / 8], bit)
        };
    }
    out
}

/// Unpacks the first `count` bits of `bytes`. Missing bytes read as `false`.
pub fn unpack(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            bytes
                .get(i / 8)
                .is_some_and(|byte| is_bit_set(*byte, (i % 8) as u8))
        })
        .collect()
}
