//! Byte-addressable storage for bit-level layouts.
//!
//! Everything above this crate sees storage through two traits:
//!
//! - [`ByteStore`]: one contiguous, resizable byte range (heap memory, a
//!   memory-mapped file, or a [`DiskStore`]).
//! - [`Allocator`]: a set of byte stores addressed by generation-checked
//!   [`Handle`]s, with `allocate` / `reallocate` / `free` / `read` / `write`.
//!
//! [`Heap`] is the allocator used by default; it hands out zero-filled
//! in-memory stores and can adopt any other [`ByteStore`].
//!
//! # Examples
//!
//! ```
//! use raw_bytes::{Allocator, Heap};
//!
//! let mut heap = Heap::new();
//! let handle = heap.allocate(4).unwrap();
//! heap.write(handle, 1, &[0xAB, 0xCD]).unwrap();
//! heap.reallocate(handle, 6).unwrap();
//!
//! assert_eq!(heap.read(handle, 0, 6).unwrap(), vec![0, 0xAB, 0xCD, 0, 0, 0]);
//! heap.free(handle).unwrap();
//! assert!(heap.read(handle, 0, 1).is_err());
//! ```

pub mod disk;
pub mod error;
pub mod heap;
pub mod pod;
pub mod storage;

pub use disk::DiskStore;
pub use error::StorageError;
pub use heap::{Allocator, Handle, Heap};
pub use pod::{read_pod, write_pod};
pub use storage::{ByteStore, Storage};
