//! Property-based tests for placement and the resize cascade

use proptest::prelude::*;
use region_layout::{Binding, Bits, DeclArgs, DeclId, Layout, NumericSpec};

//
// -----------------------------------------------------------------------------
// Helper Functions
// -----------------------------------------------------------------------------

/// Offsets a packed list must assign to entries of these widths.
fn packed_offsets(widths: &[u32]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::new();
    let mut end = 0u64;
    for &width in widths {
        let align = if width % 8 == 0 { 8 } else { 1 };
        let start = end.div_ceil(align) * align;
        offsets.push(start);
        end = start + width as u64;
    }
    (offsets, end)
}

fn list_of(layout: &mut Layout, widths: &[u32]) -> (DeclId, Vec<DeclId>) {
    let list = layout.list(DeclArgs::new());
    let ids = widths
        .iter()
        .map(|w| {
            let id = layout.bitfield(*w).unwrap();
            layout.append(list, id).unwrap();
            id
        })
        .collect();
    (list, ids)
}

fn widths() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(1u32..=24, 1..12)
}

fn bits_of_len(len: usize) -> impl Strategy<Value = Bits> {
    prop::collection::vec(any::<u8>(), len.div_ceil(8)).prop_map(move |raw| Bits::from_raw(raw, len))
}

//
// -----------------------------------------------------------------------------
// Placement
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_list_offsets_are_aligned_running_sums(widths in widths()) {
        let mut layout = Layout::default();
        let (list, ids) = list_of(&mut layout, &widths);
        let (expected, end) = packed_offsets(&widths);

        for (id, offset) in ids.iter().zip(expected) {
            prop_assert_eq!(layout.offset_of(list, *id).unwrap(), offset);
        }
        prop_assert_eq!(layout.size(list).unwrap(), end);
    }
}

proptest! {
    #[test]
    fn prop_insert_then_remove_restores_offsets(
        widths in widths(),
        extra in 1u32..=24,
        at in any::<prop::sample::Index>(),
    ) {
        let mut layout = Layout::default();
        let (list, ids) = list_of(&mut layout, &widths);
        let before: Vec<u64> = ids.iter().map(|id| layout.offset_of(list, *id).unwrap()).collect();
        let size = layout.size(list).unwrap();

        let index = at.index(widths.len() + 1);
        let added = layout.bitfield(extra).unwrap();
        layout.insert(list, index, added).unwrap();
        prop_assert!(layout.size(list).unwrap() >= size);

        layout.remove(list, index).unwrap();
        let after: Vec<u64> = ids.iter().map(|id| layout.offset_of(list, *id).unwrap()).collect();
        prop_assert_eq!(after, before);
        prop_assert_eq!(layout.size(list).unwrap(), size);
    }
}

proptest! {
    #[test]
    fn prop_declare_then_remove_restores_raw_container(
        widths in widths(),
        extra in 1u32..=24,
        gap in 0u64..16,
    ) {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        for width in &widths {
            let child = layout.bitfield(*width).unwrap();
            layout.declare_subregion(raw, child, None).unwrap();
        }
        let index = layout.declaration(raw).unwrap().offset_index().clone();
        let size = layout.size(raw).unwrap();

        let added = layout.bitfield(extra).unwrap();
        let offset = layout.declare_subregion(raw, added, Some(size + gap)).unwrap();
        prop_assert!(offset >= size + gap);
        layout.remove_subregion(raw, added).unwrap();

        prop_assert_eq!(layout.declaration(raw).unwrap().offset_index(), &index);
        prop_assert_eq!(layout.size(raw).unwrap(), size);
    }
}

proptest! {
    #[test]
    fn prop_union_is_as_wide_as_its_widest_field(widths in widths()) {
        let mut layout = Layout::default();
        let union = layout.union(DeclArgs::new());
        for (i, width) in widths.iter().enumerate() {
            let field = layout.bitfield(*width).unwrap();
            prop_assert_eq!(layout.push_field(union, Some(format!("f{i}").as_str()), field).unwrap(), 0);
        }
        let widest = *widths.iter().max().unwrap() as u64;
        prop_assert_eq!(layout.size(union).unwrap(), widest);
    }
}

//
// -----------------------------------------------------------------------------
// Storage
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_region_write_then_read_is_identity(
        (size, offset, bits) in (1u64..128).prop_flat_map(|size| {
            (Just(size), 0..size).prop_flat_map(move |(size, offset)| {
                (Just(size), Just(offset), bits_of_len((size - offset) as usize))
            })
        })
    ) {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new().bits(size));
        let region = layout.instantiate(raw).unwrap();

        layout.write_bits(region, offset, &bits).unwrap();
        prop_assert_eq!(layout.read_bits(region, offset, bits.len() as u64).unwrap(), bits);
        prop_assert!(layout.read_bits(region, 0, offset).unwrap().is_zero());
    }
}

proptest! {
    #[test]
    fn prop_array_growth_zero_fills_and_preserves(
        values in prop::collection::vec(any::<u8>(), 1..16),
        grow in 1u64..8,
    ) {
        let mut layout = Layout::default();
        let byte = layout.numeric(NumericSpec::u8()).unwrap();
        let array = layout.array(byte, values.len() as u64, DeclArgs::new()).unwrap();
        let region = layout.instantiate_with(array, Binding::unbound()).unwrap();
        for (i, value) in values.iter().enumerate() {
            let element = layout.element(region, i as u64).unwrap();
            layout.set_value(element, *value as u64).unwrap();
        }

        layout.add_elements(region, grow as i64).unwrap();
        let bytes = layout.bytes(region).unwrap();
        prop_assert_eq!(&bytes[..values.len()], values.as_slice());
        prop_assert!(bytes[values.len()..].iter().all(|b| *b == 0));
        prop_assert_eq!(bytes.len() as u64, values.len() as u64 + grow);

        layout.add_elements(region, -(grow as i64)).unwrap();
        prop_assert_eq!(layout.bytes(region).unwrap(), values.clone());

        // a dropped element comes back zeroed
        layout.add_elements(region, -1).unwrap();
        layout.add_elements(region, 1).unwrap();
        let last = layout.element(region, values.len() as u64 - 1).unwrap();
        prop_assert_eq!(layout.read_value(last).unwrap(), 0);
        let bytes = layout.bytes(region).unwrap();
        prop_assert_eq!(&bytes[..values.len() - 1], &values[..values.len() - 1]);
    }
}
