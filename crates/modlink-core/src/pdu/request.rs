use crate::encoding::{bits, Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Largest PDU allowed by the protocol.
pub const MAX_PDU_LEN: usize = 253;

fn validate_quantity(quantity: usize, max: u16) -> Result<(), EncodeError> {
    if quantity == 0 || quantity > usize::from(max) {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(())
}

/// The four Modbus memory areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl ObjectType {
    pub const fn read_function(self) -> FunctionCode {
        match self {
            Self::Coil => FunctionCode::ReadCoils,
            Self::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            Self::HoldingRegister => FunctionCode::ReadHoldingRegisters,
            Self::InputRegister => FunctionCode::ReadInputRegisters,
        }
    }

    pub const fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOperation {
    pub object: ObjectType,
    pub address: u16,
    pub length: u16,
}

impl ReadOperation {
    /// Byte count a well-formed response must announce.
    pub const fn expected_byte_count(&self) -> usize {
        if self.object.is_bit() {
            bits::packed_len(self.length as usize)
        } else {
            self.length as usize * 2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOperation {
    SingleCoil { address: u16, value: bool },
    SingleRegister { address: u16, value: u16 },
    MultipleCoils { address: u16, values: Vec<bool> },
    MultipleRegisters { address: u16, values: Vec<u16> },
}

impl WriteOperation {
    pub const fn function(&self) -> FunctionCode {
        match self {
            Self::SingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::SingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::MultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::MultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub const fn address(&self) -> u16 {
        match self {
            Self::SingleCoil { address, .. }
            | Self::SingleRegister { address, .. }
            | Self::MultipleCoils { address, .. }
            | Self::MultipleRegisters { address, .. } => *address,
        }
    }

    /// Number of addresses touched by the write.
    pub fn quantity(&self) -> usize {
        match self {
            Self::SingleCoil { .. } | Self::SingleRegister { .. } => 1,
            Self::MultipleCoils { values, .. } => values.len(),
            Self::MultipleRegisters { values, .. } => values.len(),
        }
    }

    /// The 16-bit value a slave echoes after the address.
    pub fn echo_value(&self) -> u16 {
        match self {
            Self::SingleCoil { value, .. } => coil_word(*value),
            Self::SingleRegister { value, .. } => *value,
            Self::MultipleCoils { values, .. } => values.len() as u16,
            Self::MultipleRegisters { values, .. } => values.len() as u16,
        }
    }
}

const fn coil_word(value: bool) -> u16 {
    if value {
        0xFF00
    } else {
        0x0000
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read(ReadOperation),
    Write(WriteOperation),
}

/// A request addressed to one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_address: u8,
    /// Only carried on the wire by TCP; the master assigns it.
    pub transaction_id: u16,
    pub operation: Operation,
}

impl ModbusRequest {
    pub fn read(slave_address: u8, object: ObjectType, address: u16, length: u16) -> Self {
        Self {
            slave_address,
            transaction_id: 0,
            operation: Operation::Read(ReadOperation {
                object,
                address,
                length,
            }),
        }
    }

    pub fn write(slave_address: u8, operation: WriteOperation) -> Self {
        Self {
            slave_address,
            transaction_id: 0,
            operation: Operation::Write(operation),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: u16) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn function(&self) -> FunctionCode {
        match &self.operation {
            Operation::Read(read) => read.object.read_function(),
            Operation::Write(write) => write.function(),
        }
    }

    pub fn address(&self) -> u16 {
        match &self.operation {
            Operation::Read(read) => read.address,
            Operation::Write(write) => write.address(),
        }
    }

    pub fn encode_pdu(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(self.function().as_u8())?;
        match &self.operation {
            Operation::Read(read) => {
                let max = if read.object.is_bit() {
                    MAX_READ_BITS
                } else {
                    MAX_READ_REGISTERS
                };
                validate_quantity(usize::from(read.length), max)?;
                w.write_be_u16(read.address)?;
                w.write_be_u16(read.length)
            }
            Operation::Write(WriteOperation::SingleCoil { address, value }) => {
                w.write_be_u16(*address)?;
                w.write_be_u16(coil_word(*value))
            }
            Operation::Write(WriteOperation::SingleRegister { address, value }) => {
                w.write_be_u16(*address)?;
                w.write_be_u16(*value)
            }
            Operation::Write(WriteOperation::MultipleCoils { address, values }) => {
                validate_quantity(values.len(), MAX_WRITE_COILS)?;
                w.write_be_u16(*address)?;
                w.write_be_u16(values.len() as u16)?;
                w.write_packed_bits(values)
            }
            Operation::Write(WriteOperation::MultipleRegisters { address, values }) => {
                validate_quantity(values.len(), MAX_WRITE_REGISTERS)?;
                w.write_be_u16(*address)?;
                w.write_be_u16(values.len() as u16)?;
                w.write_u8((values.len() * 2) as u8)?;
                values.iter().try_for_each(|value| w.write_be_u16(*value))
            }
        }
    }

    pub fn to_pdu(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        self.encode_pdu(&mut w)?;
        Ok(w.as_written().to_vec())
    }

    /// Parses a complete request PDU as received by a slave.
    ///
    /// Quantities are not range-checked here; the slave enforces its own
    /// bounds before dispatch.
    pub fn decode_pdu(
        slave_address: u8,
        transaction_id: u16,
        pdu: &[u8],
    ) -> Result<Self, DecodeError> {
        let mut r = Reader::new(pdu);
        let function = FunctionCode::from_u8(r.read_u8()?)?;
        let address = r.read_be_u16()?;

        let operation = match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let object = match function {
                    FunctionCode::ReadCoils => ObjectType::Coil,
                    FunctionCode::ReadDiscreteInputs => ObjectType::DiscreteInput,
                    FunctionCode::ReadHoldingRegisters => ObjectType::HoldingRegister,
                    _ => ObjectType::InputRegister,
                };
                Operation::Read(ReadOperation {
                    object,
                    address,
                    length: r.read_be_u16()?,
                })
            }
            FunctionCode::WriteSingleCoil => {
                let value = match r.read_be_u16()? {
                    0xFF00 => true,
                    0x0000 => false,
                    _ => return Err(DecodeError::InvalidValue),
                };
                Operation::Write(WriteOperation::SingleCoil { address, value })
            }
            FunctionCode::WriteSingleRegister => Operation::Write(WriteOperation::SingleRegister {
                address,
                value: r.read_be_u16()?,
            }),
            FunctionCode::WriteMultipleCoils => {
                let quantity = usize::from(r.read_be_u16()?);
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != bits::packed_len(quantity) {
                    return Err(DecodeError::InvalidLength);
                }
                let data = r.read_exact(byte_count)?;
                Operation::Write(WriteOperation::MultipleCoils {
                    address,
                    values: bits::unpack(data, quantity),
                })
            }
            FunctionCode::WriteMultipleRegisters => {
                let quantity = usize::from(r.read_be_u16()?);
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != quantity * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                let values = r
                    .read_exact(byte_count)?
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Operation::Write(WriteOperation::MultipleRegisters { address, values })
            }
        };

        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            slave_address,
            transaction_id,
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ModbusRequest, ObjectType, WriteOperation};
    use crate::pdu::FunctionCode;
    use crate::{DecodeError, EncodeError};

    #[test]
    fn read_request_pdu() {
        let request = ModbusRequest::read(1, ObjectType::HoldingRegister, 0x006B, 3);
        assert_eq!(request.function(), FunctionCode::ReadHoldingRegisters);
        assert_eq!(request.to_pdu().unwrap(), vec![0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn write_request_pdus() {
        let coil = ModbusRequest::write(
            1,
            WriteOperation::SingleCoil {
                address: 0x00AC,
                value: true,
            },
        );
        assert_eq!(coil.to_pdu().unwrap(), vec![0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let coils = ModbusRequest::write(
            1,
            WriteOperation::MultipleCoils {
                address: 0x0013,
                values: vec![true, false, true, true, false, false, true, true, true, false],
            },
        );
        assert_eq!(
            coils.to_pdu().unwrap(),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );

        let registers = ModbusRequest::write(
            1,
            WriteOperation::MultipleRegisters {
                address: 0x0001,
                values: vec![0x000A, 0x0102],
            },
        );
        assert_eq!(
            registers.to_pdu().unwrap(),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn quantities_are_bounded_on_encode() {
        let too_many = ModbusRequest::read(1, ObjectType::InputRegister, 0, 126);
        assert_eq!(too_many.to_pdu().unwrap_err(), EncodeError::ValueOutOfRange);

        let none = ModbusRequest::read(1, ObjectType::Coil, 0, 0);
        assert_eq!(none.to_pdu().unwrap_err(), EncodeError::ValueOutOfRange);

        let registers = ModbusRequest::write(
            1,
            WriteOperation::MultipleRegisters {
                address: 0,
                values: vec![0; 124],
            },
        );
        assert_eq!(registers.to_pdu().unwrap_err(), EncodeError::ValueOutOfRange);
    }

    #[test]
    fn decode_restores_encoded_requests() {
        let request = ModbusRequest::write(
            7,
            WriteOperation::MultipleCoils {
                address: 3,
                values: vec![true, true, false, true],
            },
        )
        .with_transaction_id(42);
        let pdu = request.to_pdu().unwrap();
        assert_eq!(ModbusRequest::decode_pdu(7, 42, &pdu).unwrap(), request);
    }

    #[test]
    fn decode_rejects_malformed_requests() {
        assert_eq!(
            ModbusRequest::decode_pdu(1, 0, &[0x05, 0x00, 0x01, 0x12, 0x34]).unwrap_err(),
            DecodeError::InvalidValue
        );
        assert_eq!(
            ModbusRequest::decode_pdu(1, 0, &[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x12, 0x34, 0x56])
                .unwrap_err(),
            DecodeError::InvalidLength
        );
        assert_eq!(
            ModbusRequest::decode_pdu(1, 0, &[0x2B, 0x0E]).unwrap_err(),
            DecodeError::InvalidFunctionCode
        );
        assert_eq!(
            ModbusRequest::decode_pdu(1, 0, &[0x03, 0x00, 0x00, 0x00, 0x01, 0xFF]).unwrap_err(),
            DecodeError::InvalidLength
        );
    }
}
