//! # packed_bits
//!
//! A `no_std` compatible toolkit for reading and writing bit windows inside
//! byte buffers.
//!
//! Bits are addressed MSB-first: bit 0 is the most significant bit of the
//! first byte. A window that starts `s` bits into a byte is said to have a
//! *bit shift* of `s`.
//!
//! ```rust
//! use packed_bits::{Bits, read_bits, write_bits};
//!
//! // Two 4-bit fields sharing one byte
//! let mut buf = [0u8; 1];
//! write_bits(&mut buf, 0, &Bits::from_u64(0b0010, 4).unwrap()).unwrap();
//! write_bits(&mut buf, 4, &Bits::from_u64(0b1010, 4).unwrap()).unwrap();
//!
//! assert_eq!(buf[0], 0b0010_1010);
//! assert_eq!(read_bits(&buf, 4, 4).unwrap().to_u64().unwrap(), 0b1010);
//! ```
//!
//! ## Shifted byte views
//!
//! ```rust
//! use packed_bits::BlockView;
//!
//! let mut pair = [0b1111_0000u8, 0b1010_1111];
//! {
//!     let mut view = BlockView::new(&mut pair, 4).unwrap();
//!     assert_eq!(view.get(), 0b0000_1010);
//!     view.set(0b0110_1001);
//! } // dropping the view flushes the write
//!
//! assert_eq!(pair, [0b1111_0110, 0b1001_1111]);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod error;
pub use error::BitsError;

mod bit_ops;
pub mod bits;
pub mod block;

pub use bit_ops::{covering_bytes, read_bits, write_bits, zero_bits};
pub use bits::Bits;
pub use block::BlockView;
