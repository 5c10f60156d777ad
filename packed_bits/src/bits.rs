//! Owned, MSB-first bit strings.

use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::BitsError;

/// An owned sequence of bits, stored MSB-first and left aligned.
///
/// Bit `i` lives in byte `i / 8` at position `7 - i % 8`. Bits past `len` in
/// the last byte are always zero, so two `Bits` with the same content compare
/// equal regardless of how they were built.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bits {
    bytes: Vec<u8>,
    len: usize,
}

impl Bits {
    /// `len` zero bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Every bit of `bytes`, in order.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            len: bytes.len() * 8,
        }
    }

    /// The first `len` bits of `bytes`; missing bytes read as zero.
    pub fn from_raw(mut bytes: Vec<u8>, len: usize) -> Self {
        bytes.resize(len.div_ceil(8), 0);
        let mut bits = Self { bytes, len };
        bits.clear_tail();
        bits
    }

    /// The low `width` bits of `value`, most significant first.
    ///
    /// ```
    /// use packed_bits::Bits;
    ///
    /// let bits = Bits::from_u64(0x0101, 16).unwrap();
    /// assert_eq!(bits.as_bytes(), &[0x01, 0x01]);
    /// assert!(Bits::from_u64(16, 4).is_err());
    /// ```
    pub fn from_u64(value: u64, width: usize) -> Result<Self, BitsError> {
        if width > 64 {
            return Err(BitsError::TooWide(width));
        }
        if width < 64 && value >> width != 0 {
            return Err(BitsError::ValueOverflow(value, width));
        }
        if width == 0 {
            return Ok(Self::default());
        }

        let aligned = value << (64 - width);
        let bytes = aligned.to_be_bytes()[..width.div_ceil(8)].to_vec();
        Ok(Self { bytes, len: width })
    }

    /// Interprets the bits as an unsigned big-endian integer.
    pub fn to_u64(&self) -> Result<u64, BitsError> {
        if self.len > 64 {
            return Err(BitsError::TooWide(self.len));
        }
        if self.len == 0 {
            return Ok(0);
        }

        let mut word = [0u8; 8];
        word[..self.bytes.len()].copy_from_slice(&self.bytes);
        Ok(u64::from_be_bytes(word) >> (64 - self.len))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    pub fn set(&mut self, index: usize, bit: bool) -> Result<(), BitsError> {
        if index >= self.len {
            return Err(BitsError::OutOfBounds {
                offset: index,
                length: 1,
                available: self.len,
            });
        }
        let mask = 0x80u8 >> (index % 8);
        if bit {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bytes[i / 8] & (0x80 >> (i % 8)) != 0)
    }

    /// Copies `len` bits starting at `start`.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self, BitsError> {
        if start.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(BitsError::OutOfBounds {
                offset: start,
                length: len,
                available: self.len,
            });
        }
        crate::read_bits(&self.bytes, start, len)
    }

    /// Returns `true` if every bit is zero.
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    fn clear_tail(&mut self) {
        let used = self.len % 8;
        if used != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFFu8 << (8 - used);
            }
        }
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bits(")?;
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversion() -> Result<(), BitsError> {
        let bits = Bits::from_u64(0b1011, 4)?;
        assert_eq!(bits.len(), 4);
        assert_eq!(bits.as_bytes(), &[0b1011_0000]);
        assert_eq!(bits.to_u64()?, 0b1011);

        let full = Bits::from_u64(u64::MAX, 64)?;
        assert_eq!(full.to_u64()?, u64::MAX);

        assert_eq!(Bits::from_u64(0, 0)?.to_u64()?, 0);
        assert!(matches!(
            Bits::from_u64(8, 3),
            Err(BitsError::ValueOverflow(8, 3))
        ));
        assert!(matches!(Bits::zeros(65).to_u64(), Err(BitsError::TooWide(65))));
        Ok(())
    }

    #[test]
    fn raw_construction_clears_padding() {
        let a = Bits::from_raw(vec![0xFF], 3);
        let b = Bits::from_raw(vec![0b1110_0000, 0xAA], 3);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), &[0b1110_0000]);
    }

    #[test]
    fn get_and_set_single_bits() -> Result<(), BitsError> {
        let mut bits = Bits::zeros(10);
        bits.set(0, true)?;
        bits.set(9, true)?;
        assert_eq!(bits.get(0), Some(true));
        assert_eq!(bits.get(1), Some(false));
        assert_eq!(bits.get(9), Some(true));
        assert_eq!(bits.get(10), None);
        assert!(bits.set(10, true).is_err());
        assert_eq!(bits.as_bytes(), &[0x80, 0x40]);
        Ok(())
    }

    #[test]
    fn slicing() -> Result<(), BitsError> {
        let bits = Bits::from_bytes(&[0b0001_1110, 0b1000_0000]);
        assert_eq!(bits.slice(3, 5)?.to_u64()?, 0b11110);
        assert_eq!(bits.slice(7, 2)?.to_u64()?, 0b01);
        assert!(bits.slice(10, 7).is_err());
        Ok(())
    }
}
