// tests/proptest.rs

use packed_bits::{BlockView, Bits, read_bits, write_bits, zero_bits};
use proptest::prelude::*;

//
// -----------------------------------------------------------------------------
// Helper Functions
// -----------------------------------------------------------------------------

/// A buffer plus a window that fits inside it.
fn buffer_and_window() -> impl Strategy<Value = (Vec<u8>, usize, usize)> {
    prop::collection::vec(any::<u8>(), 1..32).prop_flat_map(|buf| {
        let total = buf.len() * 8;
        (Just(buf), 0..=total).prop_flat_map(move |(buf, offset)| {
            (Just(buf), Just(offset), 0..=(total - offset))
        })
    })
}

fn bits_of_len(len: usize) -> impl Strategy<Value = Bits> {
    prop::collection::vec(any::<u8>(), len.div_ceil(8)).prop_map(move |raw| Bits::from_raw(raw, len))
}

fn window_and_bits() -> impl Strategy<Value = (Vec<u8>, usize, Bits)> {
    buffer_and_window()
        .prop_flat_map(|(buf, offset, len)| (Just(buf), Just(offset), bits_of_len(len)))
}

//
// -----------------------------------------------------------------------------
// Window Properties
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_write_then_read_is_identity((buf, offset, bits) in window_and_bits()) {
        let mut buf = buf;
        write_bits(&mut buf, offset, &bits).unwrap();
        prop_assert_eq!(read_bits(&buf, offset, bits.len()).unwrap(), bits);
    }
}

proptest! {
    #[test]
    fn prop_write_does_not_disturb_neighbours((buf, offset, len) in buffer_and_window()) {
        let before = buf.clone();
        let mut after = buf;
        zero_bits(&mut after, offset, len).unwrap();

        let total = before.len() * 8;
        let old = Bits::from_bytes(&before);
        let new = Bits::from_bytes(&after);
        for i in 0..total {
            if i >= offset && i < offset + len {
                prop_assert_eq!(new.get(i), Some(false));
            } else {
                prop_assert_eq!(new.get(i), old.get(i));
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_read_matches_bitwise_walk((buf, offset, len) in buffer_and_window()) {
        let whole = Bits::from_bytes(&buf);
        let window = read_bits(&buf, offset, len).unwrap();
        let expected: Vec<bool> = whole.iter().skip(offset).take(len).collect();
        let actual: Vec<bool> = window.iter().collect();
        prop_assert_eq!(actual, expected);
    }
}

proptest! {
    #[test]
    fn prop_u64_conversion(width in 0usize..=64, value in any::<u64>()) {
        let value = if width == 64 { value } else { value & ((1u64 << width) - 1) };
        let bits = Bits::from_u64(value, width).unwrap();
        prop_assert_eq!(bits.len(), width);
        prop_assert_eq!(bits.to_u64().unwrap(), value);
    }
}

//
// -----------------------------------------------------------------------------
// BlockView Properties
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_block_view_set_is_inverse_of_get(
        first in any::<u8>(),
        second in any::<u8>(),
        shift in 0u8..8,
        value in any::<u8>(),
    ) {
        let mut pair = [first, second];
        {
            let mut view = BlockView::new(&mut pair, shift).unwrap();
            view.set(value);
        }
        let view = BlockView::new(&mut pair, shift).unwrap();
        prop_assert_eq!(view.get(), value);
    }
}
