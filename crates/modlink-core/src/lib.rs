//! Modbus protocol model, framing primitives and device address spaces.
//!
//! `modlink-core` holds everything in the stack that never touches I/O: the
//! closed request/response model, function/exception/communication-error code
//! tables, CRC16/LRC/MBAP framing helpers, and the sparse [`AddressSpace`]
//! used to model a device's coil and register memory.

#![forbid(unsafe_code)]

pub mod encoding;
pub mod endian;
pub mod error;
pub mod frame;
pub mod pdu;
pub mod space;

pub use endian::{ByteOrder, ModbusEndian, RegisterValue};
pub use error::{DecodeError, EncodeError};
pub use space::{AddressSpace, AddressSpaceError, BitSpace, BlockRange, RegisterSpace};
