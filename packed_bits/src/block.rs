//! Byte-wide views that may straddle a byte boundary.
//!
//! A [`BlockView`] lets a field that starts `s` bits into a byte read and
//! write whole logical bytes even though each logical byte is physically split
//! across two storage bytes: the low `8 - s` bits of the first byte followed by
//! the high `s` bits of the second.
//!
//! # Examples
//!
//! ```rust
//! use packed_bits::BlockView;
//!
//! let mut bytes = [0xFFu8, 0xFF];
//! let mut view = BlockView::new(&mut bytes, 3).unwrap();
//! view.set(0x00);
//! view.flush();
//! drop(view);
//!
//! // only the 8 bits under the view were cleared
//! assert_eq!(bytes, [0b1110_0000, 0b0001_1111]);
//! ```

use crate::BitsError;

/// Combines two adjacent bytes into the logical byte seen at `shift`.
#[inline]
pub fn peek(first: u8, second: u8, shift: u8) -> u8 {
    if shift == 0 {
        first
    } else {
        (first << shift) | (second >> (8 - shift))
    }
}

/// A buffered, shifted view over one or two adjacent bytes.
///
/// Writes are held until [`BlockView::flush`] is called or the view is
/// dropped. When only one byte is supplied with a non-zero shift, the missing
/// second byte reads as zero and the part of a write that would land in it is
/// discarded; this is how the trailing partial byte of a bit window is written.
#[derive(Debug)]
pub struct BlockView<'a> {
    bytes: &'a mut [u8],
    shift: u8,
    pending: Option<u8>,
}

impl<'a> BlockView<'a> {
    /// Creates a view over `bytes` (one or two bytes) at `shift` (0..8).
    pub fn new(bytes: &'a mut [u8], shift: u8) -> Result<Self, BitsError> {
        if shift > 7 {
            return Err(BitsError::InvalidShift(shift));
        }
        if bytes.is_empty() || bytes.len() > 2 {
            return Err(BitsError::InvalidBlock(bytes.len()));
        }
        Ok(Self {
            bytes,
            shift,
            pending: None,
        })
    }

    #[inline]
    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Returns `true` if the view spans two physical bytes.
    #[inline]
    pub fn straddles(&self) -> bool {
        self.shift > 0 && self.bytes.len() == 2
    }

    /// Reads the logical byte, including any buffered write.
    pub fn get(&self) -> u8 {
        self.pending.unwrap_or_else(|| {
            let second = self.bytes.get(1).copied().unwrap_or(0);
            peek(self.bytes[0], second, self.shift)
        })
    }

    /// Buffers a write of the whole logical byte.
    pub fn set(&mut self, value: u8) {
        self.pending = Some(value);
    }

    /// Buffers a write of the logical bits selected by `mask`.
    pub fn set_masked(&mut self, value: u8, mask: u8) {
        let current = self.get();
        self.pending = Some((current & !mask) | (value & mask));
    }

    /// Writes any buffered value into the underlying bytes.
    pub fn flush(&mut self) {
        let Some(value) = self.pending.take() else {
            return;
        };

        if self.shift == 0 {
            self.bytes[0] = value;
            return;
        }

        let low = 0xFFu8 >> self.shift;
        self.bytes[0] = (self.bytes[0] & !low) | (value >> self.shift);

        if let Some(second) = self.bytes.get_mut(1) {
            let high = 0xFFu8 << (8 - self.shift);
            *second = (*second & !high) | (value << (8 - self.shift));
        }
    }
}

impl Drop for BlockView<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unshifted_view_is_the_byte() -> Result<(), BitsError> {
        let mut bytes = [0xA5u8];
        let mut view = BlockView::new(&mut bytes, 0)?;
        assert_eq!(view.get(), 0xA5);
        view.set(0x3C);
        view.flush();
        drop(view);
        assert_eq!(bytes[0], 0x3C);
        Ok(())
    }

    #[test]
    fn shifted_get_joins_two_bytes() -> Result<(), BitsError> {
        let mut bytes = [0b0000_0101u8, 0b1100_0000];
        let view = BlockView::new(&mut bytes, 5)?;
        assert_eq!(view.get(), 0b1011_1000);
        Ok(())
    }

    #[test]
    fn set_leaves_outside_bits_alone() -> Result<(), BitsError> {
        for shift in 0..8u8 {
            let mut bytes = [0xFFu8, 0xFF];
            {
                let mut view = BlockView::new(&mut bytes, shift)?;
                view.set(0);
            }
            let expected_first = if shift == 0 { 0 } else { !(0xFFu8 >> shift) };
            let expected_second = if shift == 0 { 0xFF } else { 0xFFu8 >> shift };
            assert_eq!(bytes, [expected_first, expected_second], "shift {shift}");
        }
        Ok(())
    }

    #[test]
    fn masked_write_without_second_byte() -> Result<(), BitsError> {
        // 3 logical bits at shift 2 fit inside the first byte
        let mut bytes = [0b1100_0011u8];
        {
            let mut view = BlockView::new(&mut bytes, 2)?;
            view.set_masked(0b1010_0000, 0b1110_0000);
        }
        assert_eq!(bytes[0], 0b1110_1011);
        Ok(())
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut three = [0u8; 3];
        assert_eq!(
            BlockView::new(&mut three, 1).unwrap_err(),
            BitsError::InvalidBlock(3)
        );
        let mut one = [0u8; 1];
        assert_eq!(
            BlockView::new(&mut one, 8).unwrap_err(),
            BitsError::InvalidShift(8)
        );
    }
}
