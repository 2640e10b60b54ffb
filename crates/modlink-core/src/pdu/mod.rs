pub mod comm_error;
pub mod exception;
pub mod function_code;
pub mod request;
pub mod response;

pub use comm_error::{CommError, CommErrorCode};
pub use exception::ExceptionCode;
pub use function_code::FunctionCode;
pub use request::{
    ModbusRequest, ObjectType, Operation, ReadOperation, WriteOperation, MAX_PDU_LEN,
    MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
pub use response::{ModbusResponse, ResponseBody};
