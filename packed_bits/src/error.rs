#[cfg(feature = "std")]
use thiserror::Error;

#[cfg_attr(feature = "std", derive(Error))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitsError {
    #[cfg_attr(feature = "std", error("Bit shift must be in the range 0..8, got {0}"))]
    InvalidShift(u8),

    #[cfg_attr(
        feature = "std",
        error("Block view needs 1 or 2 bytes, got {0}")
    )]
    InvalidBlock(usize),

    #[cfg_attr(
        feature = "std",
        error("Window of {length} bits at bit {offset} exceeds {available} available bits")
    )]
    OutOfBounds {
        offset: usize,
        length: usize,
        available: usize,
    },

    #[cfg_attr(feature = "std", error("Value {0} does not fit in {1} bits"))]
    ValueOverflow(u64, usize),

    #[cfg_attr(feature = "std", error("{0} bits do not fit in a 64-bit integer"))]
    TooWide(usize),
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for BitsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BitsError::InvalidShift(s) => {
                write!(f, "Bit shift must be in the range 0..8, got {}", s)
            }
            BitsError::InvalidBlock(n) => write!(f, "Block view needs 1 or 2 bytes, got {}", n),
            BitsError::OutOfBounds {
                offset,
                length,
                available,
            } => write!(
                f,
                "Window of {} bits at bit {} exceeds {} available bits",
                length, offset, available
            ),
            BitsError::ValueOverflow(v, n) => write!(f, "Value {} does not fit in {} bits", v, n),
            BitsError::TooWide(n) => write!(f, "{} bits do not fit in a 64-bit integer", n),
        }
    }
}
