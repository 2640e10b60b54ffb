use crate::encoding::Writer;
use crate::endian::{ModbusEndian, RegisterValue};
use crate::pdu::request::{Operation, MAX_PDU_LEN};
use crate::pdu::{CommError, CommErrorCode, ExceptionCode, ModbusRequest};
use crate::EncodeError;

/// What came back for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Unpacked coil or discrete input states, truncated to the requested length.
    Bits(Vec<bool>),
    /// Raw register bytes in wire order.
    Registers(Vec<u8>),
    /// Acknowledgement of a write whose echo matched the request.
    WriteAck,
    /// The slave answered with an exception.
    Exception(ExceptionCode),
    /// The reply was missing or did not match the request.
    CommError(CommError),
}

/// A response paired with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    request: ModbusRequest,
    body: ResponseBody,
}

impl ModbusResponse {
    pub fn new(request: ModbusRequest, body: ResponseBody) -> Self {
        Self { request, body }
    }

    pub fn bits(request: ModbusRequest, values: Vec<bool>) -> Self {
        Self::new(request, ResponseBody::Bits(values))
    }

    pub fn registers(request: ModbusRequest, raw: Vec<u8>) -> Self {
        Self::new(request, ResponseBody::Registers(raw))
    }

    pub fn write_ack(request: ModbusRequest) -> Self {
        Self::new(request, ResponseBody::WriteAck)
    }

    pub fn exception(request: ModbusRequest, code: ExceptionCode) -> Self {
        Self::new(request, ResponseBody::Exception(code))
    }

    pub fn failed(request: ModbusRequest, code: CommErrorCode, received: Vec<u8>) -> Self {
        Self::new(request, ResponseBody::CommError(CommError::new(code, received)))
    }

    pub fn request(&self) -> &ModbusRequest {
        &self.request
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn into_parts(self) -> (ModbusRequest, ResponseBody) {
        (self.request, self.body)
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.body, ResponseBody::Exception(_))
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self.body {
            ResponseBody::Exception(code) => Some(code),
            _ => None,
        }
    }

    pub fn comm_error(&self) -> Option<&CommError> {
        match &self.body {
            ResponseBody::CommError(err) => Some(err),
            _ => None,
        }
    }

    pub fn bit_values(&self) -> Option<&[bool]> {
        match &self.body {
            ResponseBody::Bits(values) => Some(values),
            _ => None,
        }
    }

    pub fn register_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Registers(raw) => Some(raw),
            _ => None,
        }
    }

    /// Register values read as big-endian words.
    pub fn register_values(&self) -> Option<Vec<u16>> {
        self.register_bytes().map(|raw| {
            raw.chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        })
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        let raw = self.register_bytes()?;
        let offset = index.checked_mul(2)?;
        let pair = raw.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_be_bytes([pair[0], pair[1]]))
    }

    /// Decodes a typed value starting at register `index`.
    pub fn value<T: RegisterValue>(&self, index: usize, endian: ModbusEndian) -> Option<T> {
        let raw = self.register_bytes()?;
        let offset = index.checked_mul(2)?;
        let bytes = raw.get(offset..offset.checked_add(T::REGISTERS * 2)?)?;
        T::from_wire(bytes, endian)
    }

    /// Encodes the response PDU a slave would send.
    pub fn encode_pdu(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let function = self.request.function().as_u8();
        match &self.body {
            ResponseBody::Exception(code) => {
                w.write_u8(function | 0x80)?;
                w.write_u8(code.as_u8())
            }
            ResponseBody::Bits(values) => {
                w.write_u8(function)?;
                w.write_packed_bits(values)
            }
            ResponseBody::Registers(raw) => {
                w.write_u8(function)?;
                w.write_counted(raw)
            }
            ResponseBody::WriteAck => {
                let Operation::Write(write) = &self.request.operation else {
                    return Err(EncodeError::NotEncodable("write ack for a read request"));
                };
                w.write_u8(function)?;
                w.write_be_u16(write.address())?;
                w.write_be_u16(write.echo_value())
            }
            ResponseBody::CommError(_) => Err(EncodeError::NotEncodable(
                "communication errors have no wire form",
            )),
        }
    }

    pub fn to_pdu(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        self.encode_pdu(&mut w)?;
        Ok(w.as_written().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::{ModbusResponse, ResponseBody};
    use crate::pdu::{CommErrorCode, ExceptionCode, ModbusRequest, ObjectType, WriteOperation};
    use crate::{EncodeError, ModbusEndian};

    fn holding(length: u16) -> ModbusRequest {
        ModbusRequest::read(1, ObjectType::HoldingRegister, 0, length)
    }

    #[test]
    fn register_response_pdu_and_accessors() {
        let response = ModbusResponse::registers(holding(2), vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(
            response.to_pdu().unwrap(),
            vec![0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(response.register_values(), Some(vec![0x1234, 0x5678]));
        assert_eq!(response.register(1), Some(0x5678));
        assert_eq!(response.register(2), None);
        assert_eq!(response.value::<u32>(0, ModbusEndian::BIG), Some(0x1234_5678));
        assert_eq!(
            response.value::<u32>(0, ModbusEndian::WORD_SWAP),
            Some(0x5678_1234)
        );
        assert_eq!(response.value::<u32>(1, ModbusEndian::BIG), None);
    }

    #[test]
    fn huge_register_index_is_out_of_range() {
        let response = ModbusResponse::registers(holding(2), vec![0x12, 0x34, 0x56, 0x78]);
        let index = usize::MAX / 2;
        assert_eq!(response.register(index), None);
        assert_eq!(response.value::<u32>(index, ModbusEndian::BIG), None);
        assert_eq!(response.value::<f64>(index - 1, ModbusEndian::BIG), None);
    }

    #[test]
    fn bit_response_packs_lsb_first() {
        let request = ModbusRequest::read(1, ObjectType::Coil, 0x13, 10);
        let values = vec![true, false, true, true, false, false, true, true, true, false];
        let response = ModbusResponse::bits(request, values.clone());
        assert_eq!(response.to_pdu().unwrap(), vec![0x01, 0x02, 0xCD, 0x01]);
        assert_eq!(response.bit_values(), Some(values.as_slice()));
    }

    #[test]
    fn exception_sets_high_bit() {
        let response = ModbusResponse::exception(holding(1), ExceptionCode::IllegalDataAddress);
        assert!(response.is_exception());
        assert_eq!(response.to_pdu().unwrap(), vec![0x83, 0x02]);
    }

    #[test]
    fn write_acks_echo_request() {
        let coil = ModbusRequest::write(
            1,
            WriteOperation::SingleCoil {
                address: 0xAC,
                value: true,
            },
        );
        assert_eq!(
            ModbusResponse::write_ack(coil).to_pdu().unwrap(),
            vec![0x05, 0x00, 0xAC, 0xFF, 0x00]
        );

        let registers = ModbusRequest::write(
            1,
            WriteOperation::MultipleRegisters {
                address: 1,
                values: vec![1, 2, 3],
            },
        );
        assert_eq!(
            ModbusResponse::write_ack(registers).to_pdu().unwrap(),
            vec![0x10, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn comm_errors_are_not_encodable() {
        let response =
            ModbusResponse::failed(holding(1), CommErrorCode::ResponseTimeout, vec![0x01]);
        assert!(matches!(response.body(), ResponseBody::CommError(_)));
        assert!(matches!(
            response.to_pdu(),
            Err(EncodeError::NotEncodable(_))
        ));
        assert!(ModbusResponse::write_ack(holding(1)).to_pdu().is_err());
    }
}
