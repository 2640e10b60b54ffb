use std::collections::BTreeMap;

use modlink_core::endian::ByteOrder;
use modlink_core::frame::{ascii, rtu};
use modlink_core::pdu::ModbusRequest;
use modlink_core::{BitSpace, ModbusEndian, RegisterSpace};
use proptest::prelude::*;

fn byte_order() -> impl Strategy<Value = ByteOrder> {
    prop_oneof![Just(ByteOrder::BigEndian), Just(ByteOrder::LittleEndian)]
}

fn assert_well_formed(space: &BitSpace) {
    let blocks = space.blocks();
    for block in &blocks {
        assert!(block.start <= block.end);
    }
    for pair in blocks.windows(2) {
        // Sorted, disjoint and never touching: touching blocks get merged.
        assert!(u32::from(pair[0].end) + 1 < u32::from(pair[1].start));
    }
}

proptest! {
    #[test]
    fn writes_keep_blocks_disjoint_and_readable(
        writes in proptest::collection::vec((0u16..200, proptest::collection::vec(any::<bool>(), 1..20)), 1..30)
    ) {
        let space = BitSpace::new();
        let mut model = BTreeMap::new();

        for (start, values) in &writes {
            space.write_bits(*start, values).unwrap();
            for (offset, value) in values.iter().enumerate() {
                model.insert(*start as usize + offset, *value);
            }
            assert_well_formed(&space);
        }

        for (address, value) in &model {
            prop_assert_eq!(space.get_bit(*address as u16).unwrap(), *value);
        }
        let covered: usize = space
            .blocks()
            .iter()
            .map(|block| usize::from(block.end - block.start) + 1)
            .sum();
        prop_assert_eq!(covered, model.len());
    }

    #[test]
    fn remove_keeps_everything_outside_the_range(
        start in 0u16..100,
        len in 1usize..100,
        cut_start in 0u16..220,
        cut_len in 1usize..50,
    ) {
        let space = RegisterSpace::new();
        let values: Vec<u16> = (0..len as u16).collect();
        space.write_registers(start, &values).unwrap();
        space.remove(cut_start, cut_len);

        let cut = u32::from(cut_start)..u32::from(cut_start) + cut_len as u32;
        for (offset, value) in values.iter().enumerate() {
            let address = u32::from(start) + offset as u32;
            let read = space.get_register(address as u16);
            if cut.contains(&address) {
                prop_assert!(read.is_err());
            } else {
                prop_assert_eq!(read.unwrap(), *value);
            }
        }
        prop_assert!(space.blocks().len() <= 2);
    }

    #[test]
    fn endian_sort_round_trips(
        inner in byte_order(),
        outer in byte_order(),
        bytes in proptest::collection::vec(any::<u8>(), 0..16),
    ) {
        let endian = ModbusEndian::new(inner, outer);
        prop_assert_eq!(endian.unsort(&endian.sort(&bytes)), bytes);
    }

    #[test]
    fn typed_values_survive_the_space(value in any::<i64>(), inner in byte_order(), outer in byte_order()) {
        let endian = ModbusEndian::new(inner, outer);
        let space = RegisterSpace::new();
        space.set_value(10, value, endian).unwrap();
        prop_assert_eq!(space.get_value::<i64>(10, endian).unwrap(), value);
    }

    #[test]
    fn lrc_makes_frame_sum_zero(body in proptest::collection::vec(any::<u8>(), 1..64)) {
        let check = ascii::lrc(&body);
        let sum = body.iter().fold(check, |acc, byte| acc.wrapping_add(*byte));
        prop_assert_eq!(sum, 0);
    }

    #[test]
    fn random_request_pdus_do_not_panic(data in proptest::collection::vec(any::<u8>(), 0..260)) {
        let _ = ModbusRequest::decode_pdu(1, 0, &data);
        let _ = rtu::decode_frame(&data);
        let _ = ascii::decode_body(&data);
    }
}
