use core::ops::Range;

#[cfg(not(feature = "std"))]
use alloc::vec;

use crate::{Bits, BitsError, BlockView};

/// Byte range that holds bits `bit_offset..bit_offset + len`.
#[inline]
pub fn covering_bytes(bit_offset: usize, len: usize) -> Range<usize> {
    let start = bit_offset / 8;
    let end = (bit_offset + len).div_ceil(8);
    start..end.max(start)
}

fn check_window(buf_len: usize, bit_offset: usize, len: usize) -> Result<(), BitsError> {
    let available = buf_len * 8;
    if bit_offset.checked_add(len).is_none_or(|end| end > available) {
        return Err(BitsError::OutOfBounds {
            offset: bit_offset,
            length: len,
            available,
        });
    }
    Ok(())
}

/// Copies `len` bits starting at `bit_offset` out of `buf`.
pub fn read_bits(buf: &[u8], bit_offset: usize, len: usize) -> Result<Bits, BitsError> {
    check_window(buf.len(), bit_offset, len)?;

    let shift = (bit_offset % 8) as u8;
    let first = bit_offset / 8;
    let count = len.div_ceil(8);
    let mut out = vec![0u8; count];

    if shift == 0 {
        out.copy_from_slice(&buf[first..first + count]);
    } else {
        for (j, byte) in out.iter_mut().enumerate() {
            let lead = buf[first + j];
            let next = buf.get(first + j + 1).copied().unwrap_or(0);
            *byte = crate::block::peek(lead, next, shift);
        }
    }

    Ok(Bits::from_raw(out, len))
}

/// Writes `bits` into `buf` starting at `bit_offset`.
///
/// Bits outside the window are never modified: the trailing partial byte is
/// written through a mask, and whole logical bytes go through a [`BlockView`]
/// (a direct store when the window is byte aligned).
pub fn write_bits(buf: &mut [u8], bit_offset: usize, bits: &Bits) -> Result<(), BitsError> {
    let len = bits.len();
    check_window(buf.len(), bit_offset, len)?;
    if len == 0 {
        return Ok(());
    }

    let shift = (bit_offset % 8) as u8;
    let first = bit_offset / 8;
    let whole = len / 8;

    if shift == 0 {
        buf[first..first + whole].copy_from_slice(&bits.as_bytes()[..whole]);
    } else {
        for j in 0..whole {
            let mut view = BlockView::new(&mut buf[first + j..first + j + 2], shift)?;
            view.set(bits.as_bytes()[j]);
        }
    }

    let rest = len % 8;
    if rest != 0 {
        let at = first + whole;
        let needs_second = shift as usize + rest > 8;
        let end = if needs_second { at + 2 } else { at + 1 };
        let mask = 0xFFu8 << (8 - rest);
        let mut view = BlockView::new(&mut buf[at..end], shift)?;
        view.set_masked(bits.as_bytes()[whole], mask);
    }

    Ok(())
}

/// Clears `len` bits starting at `bit_offset`.
pub fn zero_bits(buf: &mut [u8], bit_offset: usize, len: usize) -> Result<(), BitsError> {
    write_bits(buf, bit_offset, &Bits::zeros(len))
}
