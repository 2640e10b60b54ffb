use modlink_core::encoding::{Reader, Writer};
use modlink_core::frame::{ascii, rtu, tcp};
use modlink_core::pdu::{ModbusRequest, ModbusResponse, ObjectType, WriteOperation};
use modlink_core::DecodeError;

const READ_TWO_HOLDING_RTU: &[u8] = &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
const READ_TWO_HOLDING_REPLY_RTU: &[u8] = &[0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78, 0x81, 0x07];

fn rtu_frame(address: u8, pdu: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; rtu::MAX_FRAME_LEN];
    let mut w = Writer::new(&mut buf);
    rtu::encode_frame(&mut w, address, pdu).unwrap();
    w.as_written().to_vec()
}

#[test]
fn rtu_read_holding_round() {
    let request = ModbusRequest::read(1, ObjectType::HoldingRegister, 0, 2);
    assert_eq!(rtu_frame(1, &request.to_pdu().unwrap()), READ_TWO_HOLDING_RTU);

    let response = ModbusResponse::registers(request, vec![0x12, 0x34, 0x56, 0x78]);
    assert_eq!(
        rtu_frame(1, &response.to_pdu().unwrap()),
        READ_TWO_HOLDING_REPLY_RTU
    );

    let (address, pdu) = rtu::decode_frame(READ_TWO_HOLDING_REPLY_RTU).unwrap();
    assert_eq!(address, 1);
    assert_eq!(pdu, &[0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);
}

#[test]
fn every_single_bit_flip_breaks_the_crc() {
    for byte in 0..READ_TWO_HOLDING_REPLY_RTU.len() {
        for bit in 0..8 {
            let mut frame = READ_TWO_HOLDING_REPLY_RTU.to_vec();
            frame[byte] ^= 1 << bit;
            assert_eq!(
                rtu::decode_frame(&frame).unwrap_err(),
                DecodeError::InvalidChecksum,
                "flip of bit {bit} in byte {byte} went unnoticed"
            );
        }
    }
}

#[test]
fn ascii_write_single_register() {
    let request = ModbusRequest::write(
        0x11,
        WriteOperation::SingleRegister {
            address: 0x0001,
            value: 0x0003,
        },
    );
    let frame = ascii::encode_frame(0x11, &request.to_pdu().unwrap()).unwrap();
    assert_eq!(frame, b":110600010003E5\r\n");

    let body = ascii::decode_body(&frame[1..frame.len() - 2]).unwrap();
    let sum = body
        .iter()
        .fold(ascii::lrc(&body), |acc, byte| acc.wrapping_add(*byte));
    assert_eq!(sum, 0);
    assert_eq!(
        ModbusRequest::decode_pdu(body[0], 0, &body[1..]).unwrap(),
        request
    );
}

#[test]
fn tcp_mbap_framing() {
    let request = ModbusRequest::read(0x11, ObjectType::HoldingRegister, 0x006B, 3)
        .with_transaction_id(1);

    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    tcp::encode_frame(
        &mut w,
        request.transaction_id,
        request.slave_address,
        &request.to_pdu().unwrap(),
    )
    .unwrap();
    assert_eq!(
        w.as_written(),
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
    );

    let mut r = Reader::new(w.as_written());
    let header = tcp::MbapHeader::decode(&mut r).unwrap();
    assert_eq!(header.transaction_id, 1);
    assert!(header.is_modbus());
    assert_eq!(usize::from(header.length), r.remaining());
}

#[test]
fn exception_reply_frames() {
    let request = ModbusRequest::read(1, ObjectType::InputRegister, 0x0800, 1);
    let response = ModbusResponse::exception(
        request,
        modlink_core::pdu::ExceptionCode::IllegalDataAddress,
    );
    let frame = rtu_frame(1, &response.to_pdu().unwrap());
    assert_eq!(&frame[..3], &[0x01, 0x84, 0x02]);
    assert!(rtu::decode_frame(&frame).is_ok());
}
