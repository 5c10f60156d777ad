//! Integer leaves.

use packed_bits::{Bits, BitsError};

use crate::{LayoutError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// An integer of 1 to 64 bits. Little-endian values must be whole bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericSpec {
    pub bits: u32,
    pub endian: Endian,
    pub signed: bool,
}

impl NumericSpec {
    pub fn unsigned(bits: u32, endian: Endian) -> Self {
        Self {
            bits,
            endian,
            signed: false,
        }
    }

    pub fn signed(bits: u32, endian: Endian) -> Self {
        Self {
            bits,
            endian,
            signed: true,
        }
    }

    /// Unsigned big-endian bitfield.
    pub fn bitfield(bits: u32) -> Self {
        Self::unsigned(bits, Endian::Big)
    }

    pub fn u8() -> Self {
        Self::bitfield(8)
    }

    pub fn be(bits: u32) -> Self {
        Self::unsigned(bits, Endian::Big)
    }

    pub fn le(bits: u32) -> Self {
        Self::unsigned(bits, Endian::Little)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_width(self.bits as u64, self.endian)
    }

    pub(crate) fn decode(&self, raw: &Bits) -> Result<u64> {
        let value = raw.to_u64()?;
        Ok(match self.endian {
            Endian::Big => value,
            Endian::Little => swap(value, self.bits),
        })
    }

    pub(crate) fn encode(&self, value: u64) -> Result<Bits> {
        let width = self.bits as usize;
        if width < 64 && value >> width != 0 {
            return Err(BitsError::ValueOverflow(value, width).into());
        }
        let ordered = match self.endian {
            Endian::Big => value,
            Endian::Little => swap(value, self.bits),
        };
        Ok(Bits::from_u64(ordered, width)?)
    }

    pub(crate) fn to_signed(&self, value: u64) -> i64 {
        let unused = 64 - self.bits;
        ((value << unused) as i64) >> unused
    }

    pub(crate) fn from_signed(&self, value: i64) -> Result<u64> {
        let width = self.bits;
        if width < 64 {
            let min = -(1i64 << (width - 1));
            let max = (1i64 << (width - 1)) - 1;
            if value < min || value > max {
                return Err(BitsError::ValueOverflow(value as u64, width as usize).into());
            }
            return Ok((value as u64) & ((1u64 << width) - 1));
        }
        Ok(value as u64)
    }
}

pub(crate) fn validate_width(bits: u64, endian: Endian) -> Result<()> {
    if bits == 0 || bits > 64 || (endian == Endian::Little && bits % 8 != 0) {
        return Err(LayoutError::NumericWidth(bits));
    }
    Ok(())
}

/// Reverses the byte order of the low `bits` bits.
fn swap(value: u64, bits: u32) -> u64 {
    value.swap_bytes() >> (64 - bits)
}
