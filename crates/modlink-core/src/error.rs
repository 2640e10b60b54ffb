use thiserror::Error;

/// Errors that can occur while encoding Modbus data into an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("value out of range")]
    ValueOutOfRange,
    #[error("invalid length")]
    InvalidLength,
    #[error("not encodable: {0}")]
    NotEncodable(&'static str),
}

/// Errors that can occur while decoding Modbus data from an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid function code")]
    InvalidFunctionCode,
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid value")]
    InvalidValue,
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}
