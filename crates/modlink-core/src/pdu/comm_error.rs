use std::fmt;
use thiserror::Error;

/// Locally detected failures of a reply. These never travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommErrorCode {
    ResponseSlaveAddressDoNotMatch,
    ResponseFunctionDoNotMatch,
    ResponseLengthDoNotMatch,
    ResponseAddressDoNotMatch,
    ResponseWrittenValueDoNotMatch,
    ResponseCrcError,
    ResponseLrcError,
    ResponseAsciiStartError,
    ResponseAsciiEndError,
    ResponseTcpLengthDoNotMatch,
    ModbusTcpSymbolError,
    ResponseTimeout,
}

impl fmt::Display for CommErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A communication error plus every byte observed before it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} after {} received byte(s): {received:02X?}", received.len())]
pub struct CommError {
    pub code: CommErrorCode,
    pub received: Vec<u8>,
}

impl CommError {
    pub fn new(code: CommErrorCode, received: Vec<u8>) -> Self {
        Self { code, received }
    }
}
