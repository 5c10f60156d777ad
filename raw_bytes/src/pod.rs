//! Typed access to plain-old-data values inside an allocation.

use bytemuck::Pod;

use crate::{Allocator, Handle, error::Result};

/// Reads a `T` from the bytes at `offset`. No alignment is required.
pub fn read_pod<T: Pod, A: Allocator + ?Sized>(
    alloc: &A,
    handle: Handle,
    offset: usize,
) -> Result<T> {
    let bytes = alloc.read(handle, offset, core::mem::size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(&bytes))
}

/// Writes the bytes of `value` at `offset`.
pub fn write_pod<T: Pod, A: Allocator + ?Sized>(
    alloc: &mut A,
    handle: Handle,
    offset: usize,
    value: &T,
) -> Result<()> {
    alloc.write(handle, offset, bytemuck::bytes_of(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Heap;
    use bytemuck_derive::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Zeroable, Pod)]
    struct Packet {
        id: u32,
        value: f32,
    }

    #[test]
    fn unaligned_roundtrip() {
        let mut heap = Heap::new();
        let handle = heap.allocate(16).unwrap();
        let packet = Packet { id: 7, value: 1.5 };

        write_pod(&mut heap, handle, 3, &packet).unwrap();
        assert_eq!(read_pod::<Packet, _>(&heap, handle, 3).unwrap(), packet);
        assert!(read_pod::<Packet, _>(&heap, handle, 12).is_err());
    }
}
